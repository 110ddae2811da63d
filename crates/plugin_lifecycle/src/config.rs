//! Settings for the lifecycle orchestrator.

use crate::debug_log::DEFAULT_MAX_BYTES;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Orchestrator settings. Hosts usually build this from their own config
/// file; every field has a usable default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Directory scanned for Service libraries at compile time.
    pub services_dir: Option<PathBuf>,
    /// Directory scanned for Module libraries at compile time.
    pub modules_dir: Option<PathBuf>,
    /// Root of the persisted state and options records.
    pub cache_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub max_backups: usize,
    /// When non-empty, only plugins with one of these names are registered.
    pub whitelist: Vec<String>,
    /// Per-plugin debug logs. `None` disables them.
    pub debug_log_dir: Option<PathBuf>,
    pub debug_log_max_bytes: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            services_dir: None,
            modules_dir: None,
            cache_dir: PathBuf::from("cache/plugins"),
            backup_dir: PathBuf::from("backups/plugins"),
            max_backups: 5,
            whitelist: Vec::new(),
            debug_log_dir: None,
            debug_log_max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl OrchestratorConfig {
    /// Whether a plugin with this name may be registered.
    pub fn allows(&self, name: &str) -> bool {
        self.whitelist.is_empty()
            || self
                .whitelist
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(name))
    }

    /// The plugin directories that are configured, services first.
    pub fn plugin_dirs(&self) -> impl Iterator<Item = &PathBuf> {
        self.services_dir.iter().chain(self.modules_dir.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_whitelist_allows_everything() {
        let config = OrchestratorConfig::default();
        assert!(config.allows("Anything"));
    }

    #[test]
    fn whitelist_is_case_insensitive() {
        let config = OrchestratorConfig {
            whitelist: vec!["Vendors".to_string()],
            ..Default::default()
        };
        assert!(config.allows("vendors"));
        assert!(!config.allows("Battles"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{ "max_backups": 2, "services_dir": "svc" }"#).unwrap();
        assert_eq!(config.max_backups, 2);
        assert_eq!(config.services_dir, Some(PathBuf::from("svc")));
        assert_eq!(config.cache_dir, PathBuf::from("cache/plugins"));
        assert_eq!(config.plugin_dirs().count(), 1);
    }
}
