//! Host configuration.
//!
//! Loaded from a TOML file, overridden from the command line, then turned
//! into the orchestrator's own [`OrchestratorConfig`].

use crate::cli::CliArgs;
use plugin_lifecycle::{is_within, OrchestratorConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to write default config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Application configuration loaded from TOML. Missing sections and fields
/// take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub plugins: PluginSettings,
    pub storage: StorageSettings,
    pub world: WorldSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    pub services_dir: String,
    pub modules_dir: String,
    /// Scan both directories at boot.
    pub auto_compile: bool,
    /// If non-empty, only plugins with these names are registered.
    pub whitelist: Vec<String>,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            services_dir: "plugins/services".to_string(),
            modules_dir: "plugins/modules".to_string(),
            auto_compile: true,
            whitelist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub cache_dir: String,
    pub backup_dir: String,
    pub max_backups: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            cache_dir: "cache/plugins".to_string(),
            backup_dir: "backups/plugins".to_string(),
            max_backups: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    /// Seconds between world saves. 0 disables the timer.
    pub save_interval_secs: u64,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            save_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json_format: bool,
    /// Where debug-flagged plugins write their own log. Unset disables them.
    pub debug_log_dir: Option<String>,
    pub debug_log_max_bytes: u64,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            debug_log_dir: Some("logs/plugins".to_string()),
            debug_log_max_bytes: plugin_lifecycle::debug_log::DEFAULT_MAX_BYTES,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, writing the defaults to `path`
    /// first if it doesn't exist.
    pub async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if tokio::fs::try_exists(path).await? {
            let content = tokio::fs::read_to_string(path).await?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = AppConfig::default();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, toml::to_string_pretty(&config)?).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(config)
        }
    }

    /// Applies command-line overrides.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(dir) = &args.services_dir {
            self.plugins.services_dir = dir.to_string_lossy().into_owned();
        }
        if let Some(dir) = &args.modules_dir {
            self.plugins.modules_dir = dir.to_string_lossy().into_owned();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if args.no_compile {
            self.plugins.auto_compile = false;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let dirs = [
            ("plugins.services_dir", &self.plugins.services_dir),
            ("plugins.modules_dir", &self.plugins.modules_dir),
            ("storage.cache_dir", &self.storage.cache_dir),
            ("storage.backup_dir", &self.storage.backup_dir),
        ];
        for (key, value) in dirs {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{key} cannot be empty")));
            }
        }

        // Backups copy the whole cache tree, so they cannot live inside it.
        if is_within(
            Path::new(&self.storage.backup_dir),
            Path::new(&self.storage.cache_dir),
        ) {
            return Err(ConfigError::Invalid(format!(
                "storage.backup_dir ({}) must not be inside storage.cache_dir ({})",
                self.storage.backup_dir, self.storage.cache_dir
            )));
        }

        if matches!(&self.logging.debug_log_dir, Some(dir) if dir.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "logging.debug_log_dir cannot be empty; omit it to disable debug logs".to_string(),
            ));
        }

        if !VALID_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "invalid log level: {}. Must be one of: {VALID_LEVELS:?}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// The orchestrator settings this host runs with. Plugin directories are
    /// left out when auto-compile is off, so boot only registers built-ins.
    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        let scan = |dir: &String| self.plugins.auto_compile.then(|| PathBuf::from(dir));
        OrchestratorConfig {
            services_dir: scan(&self.plugins.services_dir),
            modules_dir: scan(&self.plugins.modules_dir),
            cache_dir: PathBuf::from(&self.storage.cache_dir),
            backup_dir: PathBuf::from(&self.storage.backup_dir),
            max_backups: self.storage.max_backups,
            whitelist: self.plugins.whitelist.clone(),
            debug_log_dir: self.logging.debug_log_dir.as_ref().map(PathBuf::from),
            debug_log_max_bytes: self.logging.debug_log_max_bytes,
        }
    }
}
