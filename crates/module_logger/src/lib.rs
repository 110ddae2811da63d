//! Activity logger module
//!
//! A sample module delivered as a shared library. It ships disabled; enabling
//! it at runtime loads it for the first time.

use plugin_lifecycle::{
    declare_plugins, Configurable, DeclarationMetadata, Disposable, HasOptions, Loadable, Plugin,
    PluginDeclaration, PluginError, Savable, Toggleable, TypedOptions,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

declare_plugins! {
    catalog = "module_logger",
    version = env!("CARGO_PKG_VERSION");
    PluginDeclaration::module::<ActivityLogger>(
        DeclarationMetadata::module().name("ActivityLogger"),
    ),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerOptions {
    pub channel: String,
    /// Buffered entries kept in memory between saves.
    pub capacity: usize,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            channel: "activity".to_string(),
            capacity: 256,
        }
    }
}

/// Buffers server activity while enabled and flushes it on every save.
#[derive(Default)]
pub struct ActivityLogger {
    options: TypedOptions<LoggerOptions>,
    active: bool,
    buffer: Vec<String>,
    dropped: usize,
    flushed: usize,
}

impl ActivityLogger {
    /// Records one activity. Ignored while disabled.
    pub fn record(&mut self, activity: impl Into<String>) {
        if !self.active {
            return;
        }
        if self.buffer.len() >= self.options.get().capacity {
            self.dropped += 1;
            return;
        }
        self.buffer.push(activity.into());
    }

    pub fn buffered(&self) -> &[String] {
        &self.buffer
    }

    pub fn flushed(&self) -> usize {
        self.flushed
    }

    fn flush(&mut self) {
        let channel = &self.options.get().channel;
        for entry in self.buffer.drain(..) {
            info!(channel = %channel, "📝 {}", entry);
            self.flushed += 1;
        }
        if self.dropped > 0 {
            info!(channel = %channel, dropped = self.dropped, "📝 Buffer overflowed");
            self.dropped = 0;
        }
    }
}

impl Configurable for ActivityLogger {
    fn configure(&mut self) -> Result<(), PluginError> {
        if self.options.get().capacity == 0 {
            return Err(PluginError::InitializationFailed(
                "capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Loadable for ActivityLogger {
    fn load(&mut self) -> Result<(), PluginError> {
        self.active = true;
        debug!("📝 Activity logger loaded on channel {}", self.options.get().channel);
        Ok(())
    }
}

impl Savable for ActivityLogger {
    fn save(&mut self) -> Result<(), PluginError> {
        self.flush();
        Ok(())
    }
}

impl Toggleable for ActivityLogger {
    fn enable(&mut self) -> Result<(), PluginError> {
        self.active = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), PluginError> {
        self.active = false;
        Ok(())
    }
}

impl Disposable for ActivityLogger {
    fn dispose(&mut self) -> Result<(), PluginError> {
        self.flush();
        self.active = false;
        Ok(())
    }
}

impl Plugin for ActivityLogger {
    fn as_configurable(&mut self) -> Option<&mut dyn Configurable> {
        Some(self)
    }

    fn as_loadable(&mut self) -> Option<&mut dyn Loadable> {
        Some(self)
    }

    fn as_savable(&mut self) -> Option<&mut dyn Savable> {
        Some(self)
    }

    fn as_disposable(&mut self) -> Option<&mut dyn Disposable> {
        Some(self)
    }

    fn as_toggleable(&mut self) -> Option<&mut dyn Toggleable> {
        Some(self)
    }

    fn as_options(&mut self) -> Option<&mut dyn HasOptions> {
        Some(&mut self.options)
    }
}
