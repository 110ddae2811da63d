//! Plugins compiled into the host.

use plugin_lifecycle::{
    priority, Catalog, Configurable, DeclarationMetadata, Disposable, HasOptions, Invokable,
    Plugin, PluginDeclaration, PluginError, Savable, TypedOptions,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

pub const CATALOG_NAME: &str = "lifecycle_host";

/// The host's built-in catalog.
pub fn catalog() -> Catalog {
    let status = DeclarationMetadata::service()
        .name("HostStatus")
        .priority(priority::HIGHEST)
        .quiet(false);
    Catalog::new(CATALOG_NAME, env!("CARGO_PKG_VERSION"))
        .with(PluginDeclaration::service::<HostStatus>(status))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusOptions {
    /// Printed once the host has finished booting.
    pub motd: String,
    /// Log every world save.
    pub announce_saves: bool,
}

impl Default for StatusOptions {
    fn default() -> Self {
        Self {
            motd: "Server is up".to_string(),
            announce_saves: true,
        }
    }
}

/// Reports host uptime and world saves. Runs first and is disposed last.
#[derive(Default)]
pub struct HostStatus {
    started: Option<Instant>,
    saves: u64,
    options: TypedOptions<StatusOptions>,
}

impl HostStatus {
    pub fn saves(&self) -> u64 {
        self.saves
    }

    fn uptime_secs(&self) -> u64 {
        self.started.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }
}

impl Configurable for HostStatus {
    fn configure(&mut self) -> Result<(), PluginError> {
        self.started = Some(Instant::now());
        Ok(())
    }
}

impl Invokable for HostStatus {
    fn invoke(&mut self) -> Result<(), PluginError> {
        info!("📣 {}", self.options.get().motd);
        Ok(())
    }
}

impl Savable for HostStatus {
    fn save(&mut self) -> Result<(), PluginError> {
        self.saves += 1;
        if self.options.get().announce_saves {
            info!(saves = self.saves, uptime_secs = self.uptime_secs(), "💾 World saved");
        }
        Ok(())
    }
}

impl Disposable for HostStatus {
    fn dispose(&mut self) -> Result<(), PluginError> {
        info!(
            saves = self.saves,
            uptime_secs = self.uptime_secs(),
            "👋 Host status shutting down"
        );
        Ok(())
    }
}

impl Plugin for HostStatus {
    fn as_configurable(&mut self) -> Option<&mut dyn Configurable> {
        Some(self)
    }

    fn as_invokable(&mut self) -> Option<&mut dyn Invokable> {
        Some(self)
    }

    fn as_savable(&mut self) -> Option<&mut dyn Savable> {
        Some(self)
    }

    fn as_disposable(&mut self) -> Option<&mut dyn Disposable> {
        Some(self)
    }

    fn as_options(&mut self) -> Option<&mut dyn HasOptions> {
        Some(&mut self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_lifecycle::{MemoryStateStore, Orchestrator, OrchestratorConfig, PluginKind};
    use serde_json::json;
    use std::sync::Arc;

    fn host() -> Orchestrator {
        Orchestrator::builder(OrchestratorConfig::default())
            .store(Arc::new(MemoryStateStore::new()))
            .catalog(catalog())
            .build()
    }

    #[test]
    fn builtin_catalog_boots() {
        let host = host();
        let boot = host.boot().unwrap();
        assert_eq!(boot.compile.registered, vec!["HostStatus".to_string()]);

        let status = host.snapshot("hoststatus").unwrap();
        assert_eq!(status.kind, PluginKind::Service);
        assert!(status.configured && status.invoked);
        assert!(host.recent_faults().is_empty());
    }

    #[test]
    fn status_counts_saves() {
        let mut status = HostStatus::default();
        status.configure().unwrap();
        status.save().unwrap();
        status.save().unwrap();
        assert_eq!(status.saves(), 2);
    }

    #[test]
    fn options_are_editable_through_the_host() {
        let host = host();
        host.boot().unwrap();

        host.update_options(
            "HostStatus",
            json!({ "motd": "Maintenance at noon", "announce_saves": false }),
        )
        .unwrap();
        assert_eq!(
            host.options_json("HostStatus").unwrap(),
            json!({ "motd": "Maintenance at noon", "announce_saves": false })
        );
    }
}
