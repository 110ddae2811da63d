//! Top-level lifecycle driver.
//!
//! The [`Orchestrator`] owns the registry, the known catalogs and the state
//! store, and runs the phase passes:
//!
//! ```text
//! boot:        compile -> configure -> load -> invoke
//! world save:  backup -> save
//! shutdown:    dispose (descending priority)
//! ```
//!
//! Every pass and every administrative operation is exclusive: starting one
//! while another runs, including from inside a plugin hook, fails with
//! [`LifecycleError::Busy`] instead of waiting.

use crate::barrier::{panic_message, FaultBarrier, FaultHandler, FaultReport, FaultScope, LogFaultHandler, Phase};
use crate::config::OrchestratorConfig;
use crate::debug_log::DebugLog;
use crate::declaration::{Catalog, CatalogId};
use crate::descriptor::{PhaseContext, PluginDescriptor, PluginSnapshot};
use crate::error::{LifecycleError, PluginError};
use crate::loader::{AssemblyLoader, CatalogSet};
use crate::registry::PluginRegistry;
use crate::scanner::TypeScanner;
use crate::store::{FileStateStore, StateStore};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::{debug, error, info, warn};

/// Outcome of one phase pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    /// Descriptors the pass acted on.
    pub visited: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl PhaseReport {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            visited: 0,
            succeeded: 0,
            failed: 0,
        }
    }

    fn record(&mut self, ok: bool) {
        self.visited += 1;
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Outcome of [`Orchestrator::compile`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompileReport {
    /// Libraries loaded from the plugin directories on this run.
    pub libraries: usize,
    /// Catalogs known after the run.
    pub catalogs: usize,
    /// Names of the newly registered plugins.
    pub registered: Vec<String>,
    /// Plugins left out by the whitelist.
    pub filtered: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootReport {
    pub compile: CompileReport,
    pub phases: Vec<PhaseReport>,
}

/// Held while an exclusive operation runs.
#[must_use = "the operation ends when the guard is dropped"]
pub struct OperationGuard<'a> {
    busy: &'a AtomicBool,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Builds an [`Orchestrator`] with non-default collaborators.
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    store: Option<Arc<dyn StateStore>>,
    fault_handler: Option<Arc<dyn FaultHandler>>,
    catalogs: Vec<Catalog>,
}

impl OrchestratorBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            store: None,
            fault_handler: None,
            catalogs: Vec::new(),
        }
    }

    /// The store descriptors persist their state and options to.
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn fault_handler(mut self, handler: Arc<dyn FaultHandler>) -> Self {
        self.fault_handler = Some(handler);
        self
    }

    /// A built-in catalog, compiled into the host.
    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalogs.push(catalog);
        self
    }

    pub fn build(self) -> Orchestrator {
        let debug_log = self
            .config
            .debug_log_dir
            .as_ref()
            .map(|dir| Arc::new(DebugLog::new(dir, self.config.debug_log_max_bytes)));
        let handler = self
            .fault_handler
            .unwrap_or_else(|| Arc::new(LogFaultHandler::new(debug_log.clone())));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(FileStateStore::new(&self.config.cache_dir)));
        let barrier = FaultBarrier::new(handler);

        let mut catalogs = CatalogSet::new();
        for catalog in self.catalogs {
            catalogs.add(catalog);
        }

        Orchestrator {
            registry: Mutex::new(PluginRegistry::new()),
            catalogs: Mutex::new(catalogs),
            scanner: TypeScanner::new(),
            loader: AssemblyLoader::new(barrier.clone()),
            store,
            barrier,
            debug_log,
            config: self.config,
            busy: AtomicBool::new(false),
            running: Mutex::new("nothing"),
        }
    }
}

/// Drives every registered plugin through its lifecycle.
pub struct Orchestrator {
    // Declared before `catalogs`: descriptors own plugin instances whose code
    // may live in a loaded library, so they must drop first.
    registry: Mutex<PluginRegistry>,
    catalogs: Mutex<CatalogSet>,
    scanner: TypeScanner,
    loader: AssemblyLoader,
    store: Arc<dyn StateStore>,
    barrier: FaultBarrier,
    debug_log: Option<Arc<DebugLog>>,
    config: OrchestratorConfig,
    busy: AtomicBool,
    running: Mutex<&'static str>,
}

impl Orchestrator {
    /// An orchestrator with a file-backed store and the logging fault
    /// handler.
    pub fn new(config: OrchestratorConfig) -> Self {
        OrchestratorBuilder::new(config).build()
    }

    /// Start building an orchestrator with a custom store, fault handler or
    /// built-in catalogs.
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The state store shared by every descriptor.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Add a built-in catalog. Returns `false` if one with the same identity
    /// is already known. Takes effect on the next [`compile`](Self::compile).
    pub fn add_catalog(&self, catalog: Catalog) -> Result<bool, LifecycleError> {
        let _guard = self.begin_exclusive("add catalog")?;
        Ok(self.try_lock(&self.catalogs, "add catalog")?.add(catalog))
    }

    /// Identities of every known catalog, built-in and loaded.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::Busy`] while a compile pass holds the catalogs.
    pub fn catalog_ids(&self) -> Result<Vec<CatalogId>, LifecycleError> {
        let catalogs = self.try_lock(&self.catalogs, "list catalogs")?;
        Ok(catalogs.iter().map(|c| c.id().clone()).collect())
    }

    /// Number of registered plugins.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::Busy`] while a pass holds the registry, for example
    /// when called from a plugin hook.
    pub fn plugin_count(&self) -> Result<usize, LifecycleError> {
        Ok(self.try_lock(&self.registry, "count plugins")?.len())
    }

    /// Whether an exclusive operation is running right now.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Faults caught by the barrier so far, oldest first.
    pub fn recent_faults(&self) -> Vec<FaultReport> {
        self.barrier.recent_faults()
    }

    /// Claim the exclusive-operation flag. Fails immediately if another
    /// exclusive operation holds it.
    pub fn begin_exclusive(
        &self,
        operation: &'static str,
    ) -> Result<OperationGuard<'_>, LifecycleError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let running = *self.running.lock().unwrap_or_else(|p| p.into_inner());
            warn!("Rejected {}: {} is already in progress", operation, running);
            return Err(LifecycleError::Busy {
                requested: operation,
                running,
            });
        }

        *self.running.lock().unwrap_or_else(|p| p.into_inner()) = operation;
        Ok(OperationGuard { busy: &self.busy })
    }

    // ----------------------------------------------------------------------
    // Host lifecycle events
    // ----------------------------------------------------------------------

    /// Process start: compile, configure, load, invoke.
    pub fn boot(&self) -> Result<BootReport, LifecycleError> {
        info!("Booting plugins");
        let compile = self.compile()?;
        let configure = self.configure()?;
        let load = self.load()?;
        let invoke = self.invoke()?;

        info!(
            "Boot complete: {} plugins from {} catalogs",
            self.plugin_count()?,
            compile.catalogs
        );
        Ok(BootReport {
            compile,
            phases: vec![configure, load, invoke],
        })
    }

    /// World save: back up persisted state, then run the Save pass.
    pub fn world_save(&self) -> Result<PhaseReport, LifecycleError> {
        self.backup()?;
        self.save()
    }

    /// Orderly shutdown: dispose every plugin, highest priority value first.
    pub fn shutdown(&self) -> Result<PhaseReport, LifecycleError> {
        info!("Shutting down plugins");
        self.dispose()
    }

    /// Crash: same teardown as shutdown, reported loudly.
    pub fn crash(&self) -> Result<PhaseReport, LifecycleError> {
        error!("Host crashed, disposing plugins");
        self.dispose()
    }

    // ----------------------------------------------------------------------
    // Phases
    // ----------------------------------------------------------------------

    /// Load libraries from the plugin directories, scan every catalog and
    /// register the plugin types not registered yet. Each new descriptor
    /// restores its persisted state.
    pub fn compile(&self) -> Result<CompileReport, LifecycleError> {
        let _guard = self.begin_exclusive("compile")?;
        let mut report = CompileReport::default();
        let mut catalogs = self.try_lock(&self.catalogs, "compile")?;

        let mut added = false;
        for dir in self.config.plugin_dirs() {
            for library in self.loader.load_from(dir) {
                report.libraries += 1;
                added |= catalogs.add_library(library);
            }
        }
        if added {
            self.scanner.invalidate();
        }
        report.catalogs = catalogs.len();

        let scanned = self.scanner.scan_all(catalogs.iter());
        let mut registry = self.try_lock(&self.registry, "compile")?;
        for found in scanned {
            if registry.contains(&found.declaration.type_id) {
                continue;
            }
            let Some(catalog) = catalogs.get(&found.catalog) else {
                continue;
            };

            let name = found
                .tag
                .name
                .clone()
                .unwrap_or_else(|| found.declaration.type_id.short_name().to_string());
            if !self.config.allows(&name) {
                debug!("{} is not whitelisted, skipping", name);
                report.filtered.push(name);
                continue;
            }

            let scope = FaultScope::new(&name, Phase::Register).debug(found.tag.debug);
            let Some(mut descriptor) = self.barrier.invoke_get(scope, || {
                Ok::<_, PluginError>(PluginDescriptor::new(&found.declaration, &found.tag, catalog))
            }) else {
                continue;
            };

            let store = self.store.as_ref();
            self.barrier
                .invoke(scope, || descriptor.load_state(store).map(|_| ()));

            info!(
                kind = %descriptor.kind(),
                dynamic = descriptor.provenance().dynamic,
                "Registered {} v{} (priority {})",
                descriptor.name(),
                descriptor.version(),
                descriptor.priority()
            );
            report.registered.push(descriptor.name().to_string());
            registry.register(descriptor);
        }

        Ok(report)
    }

    /// Configure every unconfigured Service and enabled Module.
    pub fn configure(&self) -> Result<PhaseReport, LifecycleError> {
        self.exclusive_pass("configure", Phase::Configure, false, |d, ctx| {
            if !d.is_active() || d.configured() {
                return None;
            }
            Some(d.configure(ctx))
        })
    }

    /// Invoke every uninvoked Service and enabled Module.
    pub fn invoke(&self) -> Result<PhaseReport, LifecycleError> {
        self.exclusive_pass("invoke", Phase::Invoke, false, |d, ctx| {
            if !d.is_active() || d.invoked() {
                return None;
            }
            Some(d.invoke(ctx))
        })
    }

    /// Restore options and run Load on every active descriptor.
    pub fn load(&self) -> Result<PhaseReport, LifecycleError> {
        self.exclusive_pass("load", Phase::Load, false, |d, ctx| {
            d.is_active().then(|| d.load(ctx))
        })
    }

    /// Persist options and run Save on every active descriptor.
    pub fn save(&self) -> Result<PhaseReport, LifecycleError> {
        self.exclusive_pass("save", Phase::Save, false, |d, ctx| {
            d.is_active().then(|| d.save(ctx))
        })
    }

    /// Dispose every descriptor, highest priority value first.
    pub fn dispose(&self) -> Result<PhaseReport, LifecycleError> {
        self.exclusive_pass("dispose", Phase::Dispose, true, |d, ctx| {
            (!d.disposed()).then(|| d.dispose(ctx))
        })
    }

    /// Copy the persisted state tree into a new timestamped backup.
    pub fn backup(&self) -> Result<Option<PathBuf>, LifecycleError> {
        let _guard = self.begin_exclusive("backup")?;
        let scope = FaultScope::new("state store", Phase::Backup);
        Ok(self
            .barrier
            .invoke_get(scope, || {
                self.store
                    .backup(&self.config.backup_dir, self.config.max_backups)
            })
            .flatten())
    }

    // ----------------------------------------------------------------------
    // Administration
    // ----------------------------------------------------------------------

    /// Enable or disable a module. Returns whether its state changed.
    pub fn set_active(&self, key: &str, active: bool) -> Result<bool, LifecycleError> {
        let requested = if active { "enable" } else { "disable" };
        self.with_descriptor(requested, key, |d, ctx| {
            if !d.is_module() {
                return Err(LifecycleError::NotAModule(d.name().to_string()));
            }
            Ok(if active { d.enable(ctx) } else { d.disable(ctx) })
        })
    }

    /// Enable a module. See [`set_active`](Self::set_active).
    pub fn enable(&self, key: &str) -> Result<bool, LifecycleError> {
        self.set_active(key, true)
    }

    /// Disable a module. See [`set_active`](Self::set_active).
    pub fn disable(&self, key: &str) -> Result<bool, LifecycleError> {
        self.set_active(key, false)
    }

    /// Toggle per-plugin debug logging and persist the state record.
    pub fn set_debug(&self, key: &str, debug: bool) -> Result<(), LifecycleError> {
        self.with_descriptor("set debug", key, |d, ctx| {
            d.debug = debug;
            Ok(d.save_state(ctx.store)?)
        })
    }

    /// Toggle per-hook info logging and persist the state record.
    pub fn set_quiet(&self, key: &str, quiet: bool) -> Result<(), LifecycleError> {
        self.with_descriptor("set quiet", key, |d, ctx| {
            d.quiet = quiet;
            Ok(d.save_state(ctx.store)?)
        })
    }

    /// Change a plugin's priority. Takes effect from the next pass.
    pub fn set_priority(&self, key: &str, priority: i32) -> Result<(), LifecycleError> {
        self.with_descriptor("set priority", key, |d, ctx| {
            d.priority = priority;
            Ok(d.save_state(ctx.store)?)
        })
    }

    /// The plugin's options as JSON.
    pub fn options_json(&self, key: &str) -> Result<serde_json::Value, LifecycleError> {
        self.with_descriptor("read options", key, |d, _| {
            let plugin = d.name().to_string();
            guarded(|| d.options_mut().export_options())
                .map_err(|source| LifecycleError::InvalidOptions { plugin, source })
        })
    }

    /// Replace the plugin's options and persist them. Invalid data leaves
    /// the current options untouched.
    pub fn update_options(&self, key: &str, value: serde_json::Value) -> Result<(), LifecycleError> {
        self.with_descriptor("update options", key, |d, ctx| {
            let plugin = d.name().to_string();
            guarded(|| d.options_mut().import_options(value))
                .map_err(|source| LifecycleError::InvalidOptions { plugin, source })?;
            Ok(d.save_options(ctx.store)?)
        })
    }

    /// Read-only view of one plugin, looked up by name or type id.
    pub fn snapshot(&self, key: &str) -> Result<PluginSnapshot, LifecycleError> {
        self.with_descriptor("snapshot", key, |d, _| Ok(d.snapshot()))
    }

    /// Every plugin, in phase order.
    pub fn snapshots(&self) -> Result<Vec<PluginSnapshot>, LifecycleError> {
        let _guard = self.begin_exclusive("snapshot")?;
        let mut registry = self.try_lock(&self.registry, "snapshot")?;
        let order = registry.phase_order();
        Ok(order
            .into_iter()
            .filter_map(|index| registry.get_mut(index).map(|d| d.snapshot()))
            .collect())
    }

    // ----------------------------------------------------------------------
    // Internals
    // ----------------------------------------------------------------------

    fn context(&self) -> PhaseContext<'_> {
        PhaseContext {
            barrier: &self.barrier,
            store: self.store.as_ref(),
        }
    }

    /// Lock `mutex` without waiting. Passes run plugin code while holding the
    /// registry and catalogs.
    fn try_lock<'a, T>(
        &self,
        mutex: &'a Mutex<T>,
        requested: &'static str,
    ) -> Result<MutexGuard<'a, T>, LifecycleError> {
        match mutex.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(p)) => Ok(p.into_inner()),
            Err(TryLockError::WouldBlock) => {
                let running = if self.is_busy() {
                    *self.running.lock().unwrap_or_else(|p| p.into_inner())
                } else {
                    "another operation"
                };
                warn!("Rejected {}: {} is already in progress", requested, running);
                Err(LifecycleError::Busy { requested, running })
            }
        }
    }

    fn with_descriptor<T, F>(
        &self,
        requested: &'static str,
        key: &str,
        f: F,
    ) -> Result<T, LifecycleError>
    where
        F: FnOnce(&mut PluginDescriptor, PhaseContext<'_>) -> Result<T, LifecycleError>,
    {
        let _guard = self.begin_exclusive(requested)?;
        let mut registry = self.try_lock(&self.registry, requested)?;
        let not_found = || LifecycleError::NotFound(key.to_string());
        let index = registry.locate(key).ok_or_else(not_found)?;
        let descriptor = registry.get_mut(index).ok_or_else(not_found)?;
        f(descriptor, self.context())
    }

    /// Claim the exclusive flag and the registry, then run `step` over every
    /// descriptor in phase order.
    fn exclusive_pass<F>(
        &self,
        operation: &'static str,
        phase: Phase,
        descending: bool,
        mut step: F,
    ) -> Result<PhaseReport, LifecycleError>
    where
        F: FnMut(&mut PluginDescriptor, PhaseContext<'_>) -> Option<bool>,
    {
        let _guard = self.begin_exclusive(operation)?;
        let mut registry = self.try_lock(&self.registry, operation)?;
        let ctx = self.context();
        let mut order = registry.phase_order();
        if descending {
            order.reverse();
        }

        let mut report = PhaseReport::new(phase);
        for index in order {
            let Some(descriptor) = registry.get_mut(index) else {
                continue;
            };
            let Some(ok) = step(descriptor, ctx) else {
                continue;
            };
            report.record(ok);
            if descriptor.debug() {
                self.debug_trace(descriptor.name(), phase, ok);
            }
        }

        if report.failed > 0 {
            warn!(
                "{} pass: {} of {} plugins failed",
                phase, report.failed, report.visited
            );
        } else {
            debug!("{} pass: {} plugins", phase, report.visited);
        }
        Ok(report)
    }

    fn debug_trace(&self, plugin: &str, phase: Phase, ok: bool) {
        if let Some(log) = &self.debug_log {
            let line = format!("{} {}", phase, if ok { "ok" } else { "failed" });
            if let Err(e) = log.append(plugin, &line) {
                warn!("Failed to write debug log for {}: {}", plugin, e);
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

/// Run plugin options code, turning a panic into an error.
fn guarded<T>(f: impl FnOnce() -> Result<T, PluginError>) -> Result<T, PluginError> {
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(PluginError::Runtime(panic_message(payload.as_ref()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;

    fn orchestrator() -> Orchestrator {
        Orchestrator::builder(OrchestratorConfig::default())
            .store(Arc::new(MemoryStateStore::new()))
            .build()
    }

    #[test]
    fn exclusive_operations_reject_reentry() {
        let orchestrator = orchestrator();
        let guard = orchestrator.begin_exclusive("save").unwrap();

        match orchestrator.dispose() {
            Err(LifecycleError::Busy { requested, running }) => {
                assert_eq!(requested, "dispose");
                assert_eq!(running, "save");
            }
            other => panic!("expected busy, got {:?}", other),
        }
        assert!(orchestrator.is_busy());

        drop(guard);
        assert!(!orchestrator.is_busy());
        assert!(orchestrator.dispose().is_ok());
    }

    #[test]
    fn duplicate_catalogs_are_ignored() {
        let orchestrator = orchestrator();
        assert!(orchestrator.add_catalog(Catalog::new("core", "1")).unwrap());
        assert!(!orchestrator.add_catalog(Catalog::new("core", "1")).unwrap());
        assert_eq!(orchestrator.catalog_ids().unwrap().len(), 1);
    }

    #[test]
    fn unknown_plugin_is_not_found() {
        let orchestrator = orchestrator();
        assert!(matches!(
            orchestrator.enable("Nobody"),
            Err(LifecycleError::NotFound(_))
        ));
    }
}
