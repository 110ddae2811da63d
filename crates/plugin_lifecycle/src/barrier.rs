//! Fault barrier around every plugin-supplied callable.
//!
//! Hooks may fail by returning an error or by panicking. Either way the
//! barrier catches it, hands a [`FaultReport`] to the configured
//! [`FaultHandler`] and returns `None`/`false` to the caller. Nothing is ever
//! rethrown, so one plugin's defect cannot abort a phase pass over its
//! siblings.

use crate::debug_log::DebugLog;
use serde::Serialize;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

/// Number of fault reports kept for introspection.
const RECENT_FAULTS: usize = 64;

/// Named lifecycle steps, used for ordering and in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Compile,
    Register,
    Configure,
    Invoke,
    Load,
    Save,
    Enable,
    Disable,
    Dispose,
    Backup,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Compile => "compile",
            Phase::Register => "register",
            Phase::Configure => "configure",
            Phase::Invoke => "invoke",
            Phase::Load => "load",
            Phase::Save => "save",
            Phase::Enable => "enable",
            Phase::Disable => "disable",
            Phase::Dispose => "dispose",
            Phase::Backup => "backup",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the barrier caught.
#[derive(Debug, Clone, Serialize)]
pub struct FaultReport {
    pub plugin: String,
    pub phase: Phase,
    pub message: String,
    pub panicked: bool,
    /// The plugin's debug flag at the time of the fault.
    pub debug: bool,
}

/// Who a guarded call runs on behalf of.
#[derive(Debug, Clone, Copy)]
pub struct FaultScope<'a> {
    pub plugin: &'a str,
    pub phase: Phase,
    pub debug: bool,
}

impl<'a> FaultScope<'a> {
    pub fn new(plugin: &'a str, phase: Phase) -> Self {
        Self {
            plugin,
            phase,
            debug: false,
        }
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Receives every fault the barrier catches.
pub trait FaultHandler: Send + Sync {
    fn handle(&self, report: &FaultReport);
}

/// Default handler: structured console log, plus the plugin's debug log file
/// when its debug flag is set.
#[derive(Debug, Default)]
pub struct LogFaultHandler {
    debug_log: Option<Arc<DebugLog>>,
}

impl LogFaultHandler {
    pub fn new(debug_log: Option<Arc<DebugLog>>) -> Self {
        Self { debug_log }
    }
}

impl FaultHandler for LogFaultHandler {
    fn handle(&self, report: &FaultReport) {
        if !report.debug {
            error!("{} failed during {}: {}", report.plugin, report.phase, report.message);
            return;
        }

        error!(
            plugin = %report.plugin,
            phase = %report.phase,
            panicked = report.panicked,
            "Plugin hook failed: {}",
            report.message
        );

        if let Some(log) = &self.debug_log {
            let kind = if report.panicked { "panicked" } else { "failed" };
            let line = format!("{} {}: {}", report.phase, kind, report.message);
            if let Err(e) = log.append(&report.plugin, &line) {
                warn!("Failed to write debug log for {}: {}", report.plugin, e);
            }
        }
    }
}

/// Executes plugin-supplied callables without letting failures escape.
#[derive(Clone)]
pub struct FaultBarrier {
    handler: Arc<dyn FaultHandler>,
    recent: Arc<Mutex<VecDeque<FaultReport>>>,
}

impl FaultBarrier {
    pub fn new(handler: Arc<dyn FaultHandler>) -> Self {
        Self {
            handler,
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_FAULTS))),
        }
    }

    /// Run `action`, reporting failure. Returns whether it succeeded.
    pub fn invoke<E, F>(&self, scope: FaultScope<'_>, action: F) -> bool
    where
        E: fmt::Display,
        F: FnOnce() -> Result<(), E>,
    {
        self.invoke_get(scope, action).is_some()
    }

    /// Run `func`, returning its value or `None` if it failed or panicked.
    pub fn invoke_get<T, E, F>(&self, scope: FaultScope<'_>, func: F) -> Option<T>
    where
        E: fmt::Display,
        F: FnOnce() -> Result<T, E>,
    {
        match catch_unwind(AssertUnwindSafe(func)) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.report(scope, e.to_string(), false);
                None
            }
            Err(payload) => {
                self.report(scope, panic_message(payload.as_ref()), true);
                None
            }
        }
    }

    /// Faults caught so far, oldest first (bounded).
    pub fn recent_faults(&self) -> Vec<FaultReport> {
        self.recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn report(&self, scope: FaultScope<'_>, message: String, panicked: bool) {
        let report = FaultReport {
            plugin: scope.plugin.to_string(),
            phase: scope.phase,
            message,
            panicked,
            debug: scope.debug,
        };

        {
            let mut recent = self
                .recent
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if recent.len() == RECENT_FAULTS {
                recent.pop_front();
            }
            recent.push_back(report.clone());
        }

        // A misbehaving handler must not break the barrier either.
        if catch_unwind(AssertUnwindSafe(|| self.handler.handle(&report))).is_err() {
            error!("Fault handler panicked while reporting {}", report.plugin);
        }
    }
}

impl Default for FaultBarrier {
    fn default() -> Self {
        Self::new(Arc::new(LogFaultHandler::default()))
    }
}

impl fmt::Debug for FaultBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultBarrier").finish_non_exhaustive()
    }
}

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked with unknown payload".to_string()
    }
}
