//! Greeter service
//!
//! A sample service delivered as a shared library. Drop the built `cdylib`
//! into the host's services directory and it is picked up at the next boot.

use plugin_lifecycle::{
    declare_plugins, priority, Configurable, DeclarationMetadata, Disposable, HasOptions,
    Invokable, Plugin, PluginDeclaration, PluginError, Savable, TypedOptions,
};
use serde::{Deserialize, Serialize};
use tracing::info;

declare_plugins! {
    catalog = "service_greeter",
    version = env!("CARGO_PKG_VERSION");
    PluginDeclaration::service::<GreeterService>(
        DeclarationMetadata::service()
            .name("Greeter")
            .priority(priority::HIGH),
    ),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreeterOptions {
    /// `{player}` is replaced with the player's name.
    pub greeting: String,
    pub farewell: String,
}

impl Default for GreeterOptions {
    fn default() -> Self {
        Self {
            greeting: "Welcome to Horizon, {player}!".to_string(),
            farewell: "The greeter is going home.".to_string(),
        }
    }
}

/// Welcomes players and keeps count of how many it has greeted.
#[derive(Default)]
pub struct GreeterService {
    options: TypedOptions<GreeterOptions>,
    welcomed: u32,
    ready: bool,
}

impl GreeterService {
    /// Greets one player. Fails until the service has been invoked.
    pub fn welcome(&mut self, player: &str) -> Result<String, PluginError> {
        if !self.ready {
            return Err(PluginError::ExecutionError(
                "greeter has not been invoked yet".to_string(),
            ));
        }
        self.welcomed += 1;
        Ok(self.options.get().greeting.replace("{player}", player))
    }

    pub fn welcomed(&self) -> u32 {
        self.welcomed
    }
}

impl Configurable for GreeterService {
    fn configure(&mut self) -> Result<(), PluginError> {
        if self.options.get().greeting.trim().is_empty() {
            return Err(PluginError::InitializationFailed(
                "greeting cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Invokable for GreeterService {
    fn invoke(&mut self) -> Result<(), PluginError> {
        self.ready = true;
        info!("🎉 Greeter ready: {}", self.options.get().greeting);
        Ok(())
    }
}

impl Savable for GreeterService {
    fn save(&mut self) -> Result<(), PluginError> {
        info!(welcomed = self.welcomed, "🎉 Greeter saved");
        Ok(())
    }
}

impl Disposable for GreeterService {
    fn dispose(&mut self) -> Result<(), PluginError> {
        self.ready = false;
        info!("🎉 {} ({} players welcomed)", self.options.get().farewell, self.welcomed);
        Ok(())
    }
}

impl Plugin for GreeterService {
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
    use plugin_lifecycle::{
        MemoryStateStore, Orchestrator, OrchestratorConfig, PluginKind, PLUGIN_ABI_VERSION,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn exported_catalog() -> plugin_lifecycle::Catalog {
        let raw = plugin_catalog();
        assert!(!raw.is_null());
        // SAFETY: `plugin_catalog` hands out a fresh `Box::into_raw`.
        *unsafe { Box::from_raw(raw) }
    }

    #[test]
    fn exports_match_the_host_abi() {
        assert_eq!(plugin_abi_version(), PLUGIN_ABI_VERSION);

        let catalog = exported_catalog();
        assert_eq!(catalog.id().name, "service_greeter");
        assert_eq!(catalog.declarations().len(), 1);
        assert_eq!(catalog.declarations()[0].tags[0].kind, PluginKind::Service);
    }

    #[test]
    fn greets_only_after_invoke() {
        let mut greeter = GreeterService::default();
        assert!(greeter.welcome("Ada").is_err());

        greeter.configure().unwrap();
        greeter.invoke().unwrap();
        assert_eq!(greeter.welcome("Ada").unwrap(), "Welcome to Horizon, Ada!");
        assert_eq!(greeter.welcomed(), 1);
    }

    #[test]
    fn runs_under_the_orchestrator() {
        let host = Orchestrator::builder(OrchestratorConfig::default())
            .store(Arc::new(MemoryStateStore::new()))
            .catalog(exported_catalog())
            .build();

        host.boot().unwrap();
        let greeter = host.snapshot("Greeter").unwrap();
        assert!(greeter.configured && greeter.invoked);
        assert_eq!(greeter.version, env!("CARGO_PKG_VERSION"));

        host.update_options("Greeter", json!({ "greeting": "Hi {player}", "farewell": "bye" }))
            .unwrap();
        assert_eq!(host.options_json("Greeter").unwrap()["greeting"], "Hi {player}");
        assert!(host.recent_faults().is_empty());
    }
}
