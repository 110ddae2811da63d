//! Lazy, cached binding of lifecycle hooks.
//!
//! A hook is bound by asking the plugin instance for the matching capability
//! trait (`as_configurable`, `as_toggleable`, ...). The answer is cached per
//! descriptor on first use; every later call reuses the stored function
//! pointer.

use crate::declaration::PluginKind;
use crate::error::{HookSignatureError, PluginError};
use crate::plugin::{Hook, Plugin};
use tracing::{debug, warn};

/// A bound hook. Plain function pointer that re-borrows the capability from
/// the instance at call time.
pub type HookFn = fn(&mut dyn Plugin) -> Result<(), PluginError>;

/// Cached resolution result for one hook.
#[derive(Debug, Clone)]
pub enum Binding {
    Bound(HookFn),
    /// The plugin doesn't implement the capability. Not an error.
    Unsupported,
    /// The capability exists but can't be bound for this plugin.
    Rejected(HookSignatureError),
}

impl Binding {
    pub fn is_bound(&self) -> bool {
        matches!(self, Binding::Bound(_))
    }
}

/// Per-descriptor hook cache.
#[derive(Debug)]
pub struct HookTable {
    kind: PluginKind,
    manifest: Option<Vec<Hook>>,
    slots: [Option<Binding>; 8],
    resolutions: usize,
}

impl HookTable {
    pub fn new(kind: PluginKind, manifest: Option<Vec<Hook>>) -> Self {
        Self {
            kind,
            manifest,
            slots: Default::default(),
            resolutions: 0,
        }
    }

    /// Resolve `hook` against `plugin`, caching the result.
    pub fn resolve(&mut self, hook: Hook, plugin_name: &str, plugin: &mut dyn Plugin) -> &Binding {
        let slot = hook.index();
        if self.slots[slot].is_none() {
            let binding = self.bind(hook, plugin_name, plugin);
            self.resolutions += 1;
            match &binding {
                Binding::Rejected(e) => warn!("{}", e),
                Binding::Unsupported => {
                    debug!("{}.{} not supported by {}", self.kind.hook_prefix(), hook, plugin_name)
                }
                Binding::Bound(_) => {}
            }
            self.slots[slot] = Some(binding);
        }
        self.slots[slot].get_or_insert(Binding::Unsupported)
    }

    /// The bound function, if any.
    pub fn get(&mut self, hook: Hook, plugin_name: &str, plugin: &mut dyn Plugin) -> Option<HookFn> {
        match self.resolve(hook, plugin_name, plugin) {
            Binding::Bound(f) => Some(*f),
            _ => None,
        }
    }

    pub fn supported(&mut self, hook: Hook, plugin_name: &str, plugin: &mut dyn Plugin) -> bool {
        self.resolve(hook, plugin_name, plugin).is_bound()
    }

    /// Resolve every hook and list the bound ones.
    pub fn bound_hooks(&mut self, plugin_name: &str, plugin: &mut dyn Plugin) -> Vec<Hook> {
        Hook::ALL
            .into_iter()
            .filter(|hook| self.supported(*hook, plugin_name, plugin))
            .collect()
    }

    /// Number of actual (uncached) resolutions performed so far.
    pub fn resolutions(&self) -> usize {
        self.resolutions
    }

    fn bind(&self, hook: Hook, plugin_name: &str, plugin: &mut dyn Plugin) -> Binding {
        let present = has_capability(hook, plugin);
        let listed = self
            .manifest
            .as_ref()
            .map(|hooks| hooks.contains(&hook));

        let reject = |reason: &str| {
            Binding::Rejected(HookSignatureError {
                plugin: plugin_name.to_string(),
                kind: self.kind,
                hook,
                reason: reason.to_string(),
            })
        };

        if matches!(hook, Hook::Enable | Hook::Disable) && self.kind == PluginKind::Service {
            return if present || listed == Some(true) {
                reject("services cannot be toggled")
            } else {
                Binding::Unsupported
            };
        }

        match (present, listed) {
            (false, Some(true)) => reject("listed in the hook manifest but not implemented"),
            (false, _) => Binding::Unsupported,
            (true, Some(false)) => Binding::Unsupported,
            (true, _) => Binding::Bound(hook_fn(hook)),
        }
    }
}

fn has_capability(hook: Hook, plugin: &mut dyn Plugin) -> bool {
    match hook {
        Hook::Configure => plugin.as_configurable().is_some(),
        Hook::Invoke => plugin.as_invokable().is_some(),
        Hook::Load => plugin.as_loadable().is_some(),
        Hook::Save => plugin.as_savable().is_some(),
        Hook::Dispose => plugin.as_disposable().is_some(),
        Hook::Enable | Hook::Disable => plugin.as_toggleable().is_some(),
        Hook::Options => plugin.as_options().is_some(),
    }
}

fn withdrawn(hook: Hook) -> PluginError {
    PluginError::NotFound(format!("{} capability is no longer exposed", hook))
}

fn hook_fn(hook: Hook) -> HookFn {
    match hook {
        Hook::Configure => call_configure,
        Hook::Invoke => call_invoke,
        Hook::Load => call_load,
        Hook::Save => call_save,
        Hook::Dispose => call_dispose,
        Hook::Enable => call_enable,
        Hook::Disable => call_disable,
        Hook::Options => check_options,
    }
}

fn call_configure(plugin: &mut dyn Plugin) -> Result<(), PluginError> {
    plugin
        .as_configurable()
        .ok_or_else(|| withdrawn(Hook::Configure))?
        .configure()
}

fn call_invoke(plugin: &mut dyn Plugin) -> Result<(), PluginError> {
    plugin.as_invokable().ok_or_else(|| withdrawn(Hook::Invoke))?.invoke()
}

fn call_load(plugin: &mut dyn Plugin) -> Result<(), PluginError> {
    plugin.as_loadable().ok_or_else(|| withdrawn(Hook::Load))?.load()
}

fn call_save(plugin: &mut dyn Plugin) -> Result<(), PluginError> {
    plugin.as_savable().ok_or_else(|| withdrawn(Hook::Save))?.save()
}

fn call_dispose(plugin: &mut dyn Plugin) -> Result<(), PluginError> {
    plugin.as_disposable().ok_or_else(|| withdrawn(Hook::Dispose))?.dispose()
}

fn call_enable(plugin: &mut dyn Plugin) -> Result<(), PluginError> {
    plugin.as_toggleable().ok_or_else(|| withdrawn(Hook::Enable))?.enable()
}

fn call_disable(plugin: &mut dyn Plugin) -> Result<(), PluginError> {
    plugin.as_toggleable().ok_or_else(|| withdrawn(Hook::Disable))?.disable()
}

// Options are read and written by the descriptor directly; the binding only
// records that the plugin owns them.
fn check_options(plugin: &mut dyn Plugin) -> Result<(), PluginError> {
    plugin.as_options().map(|_| ()).ok_or_else(|| withdrawn(Hook::Options))
}
