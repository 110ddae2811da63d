//! Plugin capability traits.
//!
//! A plugin is any type implementing [`Plugin`]. Each lifecycle hook is a
//! separate capability trait; a plugin opts into a hook by implementing the
//! trait and returning itself from the matching `as_*` accessor. A plugin that
//! returns `None` simply doesn't take part in that phase.
//!
//! ```rust
//! use plugin_lifecycle::{Configurable, Plugin, PluginError};
//!
//! #[derive(Default)]
//! struct Vendors {
//!     stock: Vec<String>,
//! }
//!
//! impl Configurable for Vendors {
//!     fn configure(&mut self) -> Result<(), PluginError> {
//!         self.stock.push("bandage".to_string());
//!         Ok(())
//!     }
//! }
//!
//! impl Plugin for Vendors {
//!     fn as_configurable(&mut self) -> Option<&mut dyn Configurable> {
//!         Some(self)
//!     }
//! }
//! ```

use crate::error::PluginError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Base trait for every Service and Module instance.
///
/// All accessors default to `None`. Plugins are owned by the registry and
/// only ever touched from the orchestrator's phase passes, so `Send` is all
/// that is required.
pub trait Plugin: Send {
    fn as_configurable(&mut self) -> Option<&mut dyn Configurable> {
        None
    }

    fn as_invokable(&mut self) -> Option<&mut dyn Invokable> {
        None
    }

    fn as_loadable(&mut self) -> Option<&mut dyn Loadable> {
        None
    }

    fn as_savable(&mut self) -> Option<&mut dyn Savable> {
        None
    }

    fn as_disposable(&mut self) -> Option<&mut dyn Disposable> {
        None
    }

    /// Enable/disable hooks. Only bound for modules.
    fn as_toggleable(&mut self) -> Option<&mut dyn Toggleable> {
        None
    }

    /// Plugin-owned options. Plugins without one get a generic property bag
    /// held by their descriptor.
    fn as_options(&mut self) -> Option<&mut dyn HasOptions> {
        None
    }
}

/// Runs once, before any plugin is invoked.
pub trait Configurable {
    fn configure(&mut self) -> Result<(), PluginError>;
}

/// Runs once, after every plugin has been configured.
pub trait Invokable {
    fn invoke(&mut self) -> Result<(), PluginError>;
}

/// Runs on each world load, after the plugin's options were restored.
pub trait Loadable {
    fn load(&mut self) -> Result<(), PluginError>;
}

/// Runs on each world save, after the plugin's options were persisted.
pub trait Savable {
    fn save(&mut self) -> Result<(), PluginError>;
}

/// Runs once at shutdown, in reverse priority order.
pub trait Disposable {
    fn dispose(&mut self) -> Result<(), PluginError>;
}

/// Module activation hooks.
pub trait Toggleable {
    fn enable(&mut self) -> Result<(), PluginError>;
    fn disable(&mut self) -> Result<(), PluginError>;
}

/// A plugin's configuration object, exchanged with the state store as JSON.
pub trait HasOptions {
    /// Tag written next to the stored data. A stored blob whose tag no longer
    /// matches is discarded on load.
    fn options_type(&self) -> &str;

    fn export_options(&self) -> Result<serde_json::Value, PluginError>;

    /// Replace the options with `value`. Must not partially apply on error.
    fn import_options(&mut self, value: serde_json::Value) -> Result<(), PluginError>;

    /// Restore the default-constructed options.
    fn reset_options(&mut self);
}

/// [`HasOptions`] for any serde type with a `Default`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedOptions<T> {
    value: T,
    type_tag: String,
}

impl<T: Default + 'static> Default for TypedOptions<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: 'static> TypedOptions<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            type_tag: std::any::type_name::<T>().to_string(),
        }
    }

    /// Override the stored type tag, e.g. to keep reading blobs written
    /// before a type was moved to another module.
    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.type_tag = tag.into();
        self
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T> HasOptions for TypedOptions<T>
where
    T: Serialize + DeserializeOwned + Default + 'static,
{
    fn options_type(&self) -> &str {
        &self.type_tag
    }

    fn export_options(&self) -> Result<serde_json::Value, PluginError> {
        serde_json::to_value(&self.value).map_err(|e| PluginError::ExecutionError(e.to_string()))
    }

    fn import_options(&mut self, value: serde_json::Value) -> Result<(), PluginError> {
        let parsed: T =
            serde_json::from_value(value).map_err(|e| PluginError::ExecutionError(e.to_string()))?;
        self.value = parsed;
        Ok(())
    }

    fn reset_options(&mut self) {
        self.value = T::default();
    }
}

/// The hook points a descriptor can bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    Configure,
    Invoke,
    Load,
    Save,
    Dispose,
    Enable,
    Disable,
    Options,
}

impl Hook {
    pub const ALL: [Hook; 8] = [
        Hook::Configure,
        Hook::Invoke,
        Hook::Load,
        Hook::Save,
        Hook::Dispose,
        Hook::Enable,
        Hook::Disable,
        Hook::Options,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::Configure => "configure",
            Hook::Invoke => "invoke",
            Hook::Load => "load",
            Hook::Save => "save",
            Hook::Dispose => "dispose",
            Hook::Enable => "enable",
            Hook::Disable => "disable",
            Hook::Options => "options",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
