//! Shutdown signal handling.

use tokio::signal;
use tracing::info;

/// Resolves once the process is asked to stop, returning the signal's name.
///
/// Unix hosts listen for SIGINT and SIGTERM, Windows hosts for Ctrl+C.
pub async fn shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    let received = {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        }
    };

    #[cfg(not(unix))]
    let received = {
        signal::ctrl_c().await?;
        "Ctrl+C"
    };

    info!("📡 Received {}", received);
    Ok(received)
}
