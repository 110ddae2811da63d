//! Lifecycle host
//!
//! Boots every discovered service and module, saves the world on a timer and
//! disposes everything on shutdown. A failure or panic in the host loop itself
//! disposes plugins through the crash path before exiting.

mod builtin;
mod cli;
mod config;
mod logging;
mod signals;

use cli::CliArgs;
use config::AppConfig;
use logging::setup_logging;
use plugin_lifecycle::{LifecycleError, Orchestrator};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

type HostResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> HostResult<()> {
    let args = CliArgs::parse();

    // Configuration first so logging can honour it.
    let mut config = AppConfig::load_from_file(&args.config_path).await?;
    config.apply_cli(&args);
    config.validate()?;
    setup_logging(&config.logging.level, config.logging.json_format)?;

    info!(
        "🚀 Lifecycle host v{} | config: {}",
        env!("CARGO_PKG_VERSION"),
        args.config_path.display()
    );

    let host = Arc::new(
        Orchestrator::builder(config.to_orchestrator_config())
            .catalog(builtin::catalog())
            .build(),
    );

    let task = tokio::spawn(run(host.clone(), config));
    match task.await {
        Ok(Ok(())) => {
            let report = host.shutdown()?;
            info!(
                disposed = report.succeeded,
                failed = report.failed,
                "✅ Shutdown complete"
            );
            Ok(())
        }
        Ok(Err(e)) => {
            error!("❌ Host error: {}", e);
            crash(&host);
            Err(e)
        }
        Err(join) if join.is_panic() => {
            error!("❌ Host loop panicked");
            crash(&host);
            Err("host loop panicked".into())
        }
        Err(join) => Err(join.into()),
    }
}

/// Boots, then saves the world on every tick until a shutdown signal.
async fn run(host: Arc<Orchestrator>, config: AppConfig) -> HostResult<()> {
    let boot = host.boot()?;
    info!(
        "🔌 Booted {} plugins from {} catalogs ({} filtered by whitelist)",
        host.plugin_count()?,
        boot.compile.catalogs,
        boot.compile.filtered.len()
    );
    for phase in &boot.phases {
        if phase.failed > 0 {
            warn!(phase = %phase.phase, failed = phase.failed, "⚠️ Boot phase had failures");
        }
    }

    let shutdown = signals::shutdown_signal();
    tokio::pin!(shutdown);

    if config.world.save_interval_secs == 0 {
        info!("🛑 World save timer disabled; press Ctrl+C to shut down");
        shutdown.await?;
        return Ok(());
    }

    let period = Duration::from_secs(config.world.save_interval_secs);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    info!(
        "🌍 Saving the world every {}s; press Ctrl+C to shut down",
        config.world.save_interval_secs
    );

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal?;
                return Ok(());
            }
            _ = ticker.tick() => match host.world_save() {
                Ok(report) => info!(
                    saved = report.succeeded,
                    failed = report.failed,
                    "💾 World save finished"
                ),
                Err(LifecycleError::Busy { running, .. }) => {
                    warn!("⏳ Skipping world save, {} still running", running)
                }
                Err(e) => return Err(e.into()),
            },
        }
    }
}

fn crash(host: &Orchestrator) {
    match host.crash() {
        Ok(report) => warn!(disposed = report.succeeded, "💥 Plugins disposed after crash"),
        Err(e) => error!("❌ Could not dispose plugins after crash: {}", e),
    }
}
