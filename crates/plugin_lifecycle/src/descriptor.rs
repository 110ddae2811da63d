//! Runtime record for one discovered plugin type.

use crate::barrier::{FaultBarrier, FaultScope, Phase};
use crate::declaration::{Catalog, CatalogSource, DeclarationMetadata, PluginDeclaration, PluginKind, PluginTypeId};
use crate::error::StoreError;
use crate::hooks::HookTable;
use crate::plugin::{HasOptions, Hook, Plugin, TypedOptions};
use crate::store::{OptionsEnvelope, StateRecord, StateStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Property bag used for plugins that don't own an options object.
pub type PropertyBag = BTreeMap<String, serde_json::Value>;

const PROPERTY_BAG_TAG: &str = "plugin_lifecycle::PropertyBag";

/// Module-only state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleState {
    pub enabled: bool,
    /// Set while a disabled module has never completed its first
    /// Configure/Load/Invoke sequence.
    pub deferred: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Service,
    Module(ModuleState),
}

impl DescriptorKind {
    pub fn plugin_kind(&self) -> PluginKind {
        match self {
            DescriptorKind::Service => PluginKind::Service,
            DescriptorKind::Module(_) => PluginKind::Module,
        }
    }
}

/// Where a plugin type came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub dynamic: bool,
    pub dynamic_assembly: Option<String>,
    pub dynamic_assembly_file: Option<PathBuf>,
}

/// Shared collaborators for phase transitions.
#[derive(Clone, Copy)]
pub struct PhaseContext<'a> {
    pub barrier: &'a FaultBarrier,
    pub store: &'a dyn StateStore,
}

/// What happened to an options record on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionsLoad {
    Restored,
    /// Nothing stored yet.
    Missing,
    /// The stored blob was written for a different options type and was
    /// discarded; options are back at their defaults.
    TypeMismatch,
}

/// Result of a single hook call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookOutcome {
    Unsupported,
    Succeeded,
    Failed,
}

/// Read-only view of a descriptor for admin tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginSnapshot {
    pub type_id: PluginTypeId,
    pub name: String,
    pub kind: PluginKind,
    pub version: String,
    pub priority: i32,
    pub configured: bool,
    pub invoked: bool,
    pub disposed: bool,
    pub enabled: Option<bool>,
    pub deferred: Option<bool>,
    pub debug: bool,
    pub quiet: bool,
    pub provenance: Provenance,
    pub hooks: Vec<Hook>,
}

/// One registered Service or Module.
///
/// Equality and hashing are by [`type_of`](Self::type_of) only.
pub struct PluginDescriptor {
    type_of: PluginTypeId,
    ancestors: Vec<PluginTypeId>,
    pub(crate) name: String,
    version: String,
    pub(crate) priority: i32,
    configured: bool,
    invoked: bool,
    disposed: bool,
    pub(crate) debug: bool,
    pub(crate) quiet: bool,
    kind: DescriptorKind,
    hooks: HookTable,
    plugin: Box<dyn Plugin>,
    internal_options: TypedOptions<PropertyBag>,
    provenance: Provenance,
    pub(crate) sequence: u64,
}

impl PluginDescriptor {
    /// Build a descriptor from a declaration and the tag it was scanned with.
    /// This constructs the plugin instance.
    pub fn new(declaration: &PluginDeclaration, tag: &DeclarationMetadata, catalog: &Catalog) -> Self {
        let provenance = match catalog.source() {
            CatalogSource::BuiltIn => Provenance::default(),
            CatalogSource::Library(path) => Provenance {
                dynamic: true,
                dynamic_assembly: Some(catalog.id().to_string()),
                dynamic_assembly_file: Some(path.clone()),
            },
        };

        let kind = match tag.kind {
            PluginKind::Service => DescriptorKind::Service,
            PluginKind::Module => DescriptorKind::Module(ModuleState {
                enabled: tag.enabled,
                deferred: !tag.enabled,
            }),
        };

        Self {
            type_of: declaration.type_id.clone(),
            ancestors: declaration.ancestors.clone(),
            name: tag
                .name
                .clone()
                .unwrap_or_else(|| declaration.type_id.short_name().to_string()),
            version: tag
                .version
                .clone()
                .unwrap_or_else(|| catalog.id().version.clone()),
            priority: tag.priority,
            configured: false,
            invoked: false,
            disposed: false,
            debug: tag.debug,
            quiet: tag.quiet,
            kind,
            hooks: HookTable::new(tag.kind, tag.hooks.clone()),
            plugin: (declaration.factory)(),
            internal_options: TypedOptions::default().tagged(PROPERTY_BAG_TAG),
            provenance,
            sequence: 0,
        }
    }

    /// The concrete plugin type. Identity, equality and the store key all
    /// derive from it.
    pub fn type_of(&self) -> &PluginTypeId {
        &self.type_of
    }

    /// Extra type ids this descriptor answers to in lookups.
    pub fn ancestors(&self) -> &[PluginTypeId] {
        &self.ancestors
    }

    /// Whether this descriptor answers to `type_id`, directly or through one
    /// of its declared ancestors.
    pub fn answers_to(&self, type_id: &PluginTypeId) -> bool {
        &self.type_of == type_id || self.ancestors.contains(type_id)
    }

    /// Display name: the tag's name, or the type's short name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tag's version, or the catalog's when the tag has none.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Sort key for phase passes. Lower values run first; dispose runs
    /// highest first.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Whether this is a Service or a Module.
    pub fn kind(&self) -> PluginKind {
        self.kind.plugin_kind()
    }

    pub fn is_module(&self) -> bool {
        matches!(self.kind, DescriptorKind::Module(_))
    }

    /// Set once Configure has succeeded. A failed Configure leaves it unset so
    /// the next pass retries.
    pub fn configured(&self) -> bool {
        self.configured
    }

    /// Set once Invoke has been attempted, whether or not it succeeded.
    pub fn invoked(&self) -> bool {
        self.invoked
    }

    /// Set by Dispose. Every later transition is a no-op.
    pub fn disposed(&self) -> bool {
        self.disposed
    }

    /// Per-plugin debug logging, persisted with the state record.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Suppresses per-hook info logs, persisted with the state record.
    pub fn quiet(&self) -> bool {
        self.quiet
    }

    /// `None` for services.
    pub fn enabled(&self) -> Option<bool> {
        match self.kind {
            DescriptorKind::Service => None,
            DescriptorKind::Module(state) => Some(state.enabled),
        }
    }

    /// `None` for services.
    pub fn deferred(&self) -> Option<bool> {
        match self.kind {
            DescriptorKind::Service => None,
            DescriptorKind::Module(state) => Some(state.deferred),
        }
    }

    /// Where the plugin type was loaded from.
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Registration order, used to break priority ties.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Services are always active; modules only while enabled. Disposed
    /// descriptors are never active.
    pub fn is_active(&self) -> bool {
        !self.disposed
            && match self.kind {
                DescriptorKind::Service => true,
                DescriptorKind::Module(state) => state.enabled,
            }
    }

    /// The plugin instance itself.
    pub fn plugin_mut(&mut self) -> &mut dyn Plugin {
        self.plugin.as_mut()
    }

    /// Whether the plugin implements `hook`. Binds the hook on first use.
    pub fn supports(&mut self, hook: Hook) -> bool {
        self.hooks.supported(hook, &self.name, self.plugin.as_mut())
    }

    /// The options object: the plugin's own, or the internal property bag.
    pub fn options_mut(&mut self) -> &mut dyn HasOptions {
        let owned = self.hooks.supported(Hook::Options, &self.name, self.plugin.as_mut());
        if owned {
            if let Some(options) = self.plugin.as_options() {
                return options;
            }
        }
        &mut self.internal_options
    }

    pub fn snapshot(&mut self) -> PluginSnapshot {
        let hooks = self.hooks.bound_hooks(&self.name, self.plugin.as_mut());
        PluginSnapshot {
            type_id: self.type_of.clone(),
            name: self.name.clone(),
            kind: self.kind(),
            version: self.version.clone(),
            priority: self.priority,
            configured: self.configured,
            invoked: self.invoked,
            disposed: self.disposed,
            enabled: self.enabled(),
            deferred: self.deferred(),
            debug: self.debug,
            quiet: self.quiet,
            provenance: self.provenance.clone(),
            hooks,
        }
    }

    // ----------------------------------------------------------------------
    // Persistence
    // ----------------------------------------------------------------------

    pub fn state_record(&self) -> StateRecord {
        StateRecord {
            name: self.name.clone(),
            priority: self.priority,
            debug: self.debug,
            quiet: self.quiet,
            enabled: self.enabled(),
        }
    }

    pub fn save_state(&self, store: &dyn StateStore) -> Result<(), StoreError> {
        store.save_state(&self.type_of, &self.state_record())
    }

    /// Restore persisted flags. A missing record leaves the declared
    /// defaults untouched. Returns whether a record was applied.
    pub fn load_state(&mut self, store: &dyn StateStore) -> Result<bool, StoreError> {
        let Some(record) = store.load_state(&self.type_of)? else {
            return Ok(false);
        };

        self.name = record.name;
        self.priority = record.priority;
        self.debug = record.debug;
        self.quiet = record.quiet;
        let invoked = self.invoked;
        if let (DescriptorKind::Module(state), Some(enabled)) = (&mut self.kind, record.enabled) {
            state.enabled = enabled;
            if !invoked {
                state.deferred = !enabled;
            }
        }
        Ok(true)
    }

    pub fn save_options(&mut self, store: &dyn StateStore) -> Result<(), StoreError> {
        let key = self.type_of.clone();
        let options = self.options_mut();
        let envelope = OptionsEnvelope {
            type_tag: options.options_type().to_string(),
            data: options.export_options()?,
        };
        store.save_options(&key, &envelope)
    }

    /// Restore the options object. A blob tagged with a different options
    /// type is discarded and the options are reset to their defaults. Data
    /// that fails to import also resets, then reports the error.
    pub fn load_options(&mut self, store: &dyn StateStore) -> Result<OptionsLoad, StoreError> {
        let Some(envelope) = store.load_options(&self.type_of)? else {
            return Ok(OptionsLoad::Missing);
        };

        let name = self.name.clone();
        let options = self.options_mut();
        if envelope.type_tag != options.options_type() {
            debug!(
                "Discarding stored options for {}: stored as {}, expected {}",
                name,
                envelope.type_tag,
                options.options_type()
            );
            options.reset_options();
            return Ok(OptionsLoad::TypeMismatch);
        }

        if let Err(e) = options.import_options(envelope.data) {
            options.reset_options();
            return Err(e.into());
        }
        Ok(OptionsLoad::Restored)
    }

    // ----------------------------------------------------------------------
    // Phase transitions
    // ----------------------------------------------------------------------

    fn announce(&self, what: &str) {
        if self.quiet {
            debug!("{} {}", self.name, what);
        } else {
            info!("{} {}", self.name, what);
        }
    }

    fn run_hook(&mut self, hook: Hook, phase: Phase, barrier: &FaultBarrier) -> HookOutcome {
        let Some(func) = self.hooks.get(hook, &self.name, self.plugin.as_mut()) else {
            return HookOutcome::Unsupported;
        };

        let plugin = self.plugin.as_mut();
        let scope = FaultScope::new(&self.name, phase).debug(self.debug);
        if barrier.invoke(scope, || func(plugin)) {
            HookOutcome::Succeeded
        } else {
            HookOutcome::Failed
        }
    }

    fn persist_state(&self, ctx: PhaseContext<'_>, phase: Phase) -> bool {
        let scope = FaultScope::new(&self.name, phase).debug(self.debug);
        ctx.barrier.invoke(scope, || self.save_state(ctx.store))
    }

    /// Run Configure once. Returns whether the descriptor is configured
    /// afterwards; a failing hook leaves it unconfigured so later phases
    /// retry.
    pub fn configure(&mut self, ctx: PhaseContext<'_>) -> bool {
        if self.disposed {
            return false;
        }
        if self.configured {
            return true;
        }

        if self.run_hook(Hook::Configure, Phase::Configure, ctx.barrier) != HookOutcome::Failed {
            self.configured = true;
            self.announce("configured");
        }
        self.configured
    }

    /// Run Invoke once, configuring first if needed. A failing Invoke hook
    /// still marks the descriptor invoked; only Configure failures are sticky.
    pub fn invoke(&mut self, ctx: PhaseContext<'_>) -> bool {
        if self.disposed {
            return false;
        }
        if self.invoked {
            return true;
        }
        if !self.configure(ctx) {
            return false;
        }

        let outcome = self.run_hook(Hook::Invoke, Phase::Invoke, ctx.barrier);
        self.invoked = true;
        self.announce("invoked");
        outcome != HookOutcome::Failed
    }

    /// Restore options then run the Load hook.
    pub fn load(&mut self, ctx: PhaseContext<'_>) -> bool {
        if self.disposed || !self.configure(ctx) {
            return false;
        }

        let name = self.name.clone();
        let scope = FaultScope::new(&name, Phase::Load).debug(self.debug);
        let restored = ctx.barrier.invoke(scope, || self.load_options(ctx.store).map(|_| ()));
        let hook = self.run_hook(Hook::Load, Phase::Load, ctx.barrier);
        restored && hook != HookOutcome::Failed
    }

    /// Persist options then run the Save hook.
    pub fn save(&mut self, ctx: PhaseContext<'_>) -> bool {
        if self.disposed || !self.configure(ctx) {
            return false;
        }

        let name = self.name.clone();
        let scope = FaultScope::new(&name, Phase::Save).debug(self.debug);
        let persisted = ctx.barrier.invoke(scope, || self.save_options(ctx.store));
        let hook = self.run_hook(Hook::Save, Phase::Save, ctx.barrier);
        persisted && hook != HookOutcome::Failed
    }

    /// Turn a disabled module on. Runs Configure and Invoke if they haven't
    /// run yet, Load on the first activation only, then the Enable hook, and
    /// persists state.
    ///
    /// Returns whether the module changed state. Services, disposed
    /// descriptors and already enabled modules are left alone. If Configure
    /// fails the module stays disabled.
    pub fn enable(&mut self, ctx: PhaseContext<'_>) -> bool {
        let state = match self.kind {
            DescriptorKind::Module(state) if !self.disposed && !state.enabled => state,
            _ => return false,
        };

        if !self.configure(ctx) {
            return false;
        }
        if state.deferred {
            self.load(ctx);
        }
        if !self.invoke(ctx) {
            return false;
        }
        self.run_hook(Hook::Enable, Phase::Enable, ctx.barrier);

        self.kind = DescriptorKind::Module(ModuleState {
            enabled: true,
            deferred: false,
        });
        self.persist_state(ctx, Phase::Enable);
        self.announce("enabled");
        true
    }

    /// Turn an enabled module off: Save, Disable hook, then persist. A module
    /// that never got as far as Invoke just flips back to deferred.
    pub fn disable(&mut self, ctx: PhaseContext<'_>) -> bool {
        match self.kind {
            DescriptorKind::Module(state) if !self.disposed && state.enabled => {}
            _ => return false,
        }

        let deferred = if self.invoked {
            self.save(ctx);
            self.run_hook(Hook::Disable, Phase::Disable, ctx.barrier);
            false
        } else {
            true
        };

        self.kind = DescriptorKind::Module(ModuleState {
            enabled: false,
            deferred,
        });
        self.persist_state(ctx, Phase::Disable);
        self.announce("disabled");
        true
    }

    /// Run the Dispose hook (if the plugin was ever configured) and mark the
    /// descriptor disposed. A second call does nothing.
    pub fn dispose(&mut self, ctx: PhaseContext<'_>) -> bool {
        if self.disposed {
            return false;
        }

        if self.configured {
            self.run_hook(Hook::Dispose, Phase::Dispose, ctx.barrier);
        }
        self.disposed = true;
        self.announce("disposed");
        true
    }
}

impl PartialEq for PluginDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.type_of == other.type_of
    }
}

impl Eq for PluginDescriptor {}

impl std::hash::Hash for PluginDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_of.hash(state);
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("type_of", &self.type_of)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("kind", &self.kind)
            .field("configured", &self.configured)
            .field("invoked", &self.invoked)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}
