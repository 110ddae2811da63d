//! Error types for the plugin lifecycle core.
//!
//! Plugin authors only ever see [`PluginError`]; everything else is raised by
//! the host side of the lifecycle machinery and mostly ends up in a log line
//! rather than at a call site.

use crate::plugin::Hook;
use crate::declaration::PluginKind;

/// Errors returned from plugin hooks.
///
/// # Error Categories
///
/// - **InitializationFailed**: the plugin could not set itself up
/// - **ExecutionError**: a hook failed during normal operation
/// - **NotFound**: a resource the plugin needed was missing
/// - **Runtime**: a panic or other unexpected runtime condition
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    /// Plugin initialization failed during startup
    #[error("Plugin initialization failed: {0}")]
    InitializationFailed(String),
    /// Error occurred during hook execution
    #[error("Plugin execution error: {0}")]
    ExecutionError(String),
    /// Requested resource was not found
    #[error("Plugin resource not found: {0}")]
    NotFound(String),
    /// Runtime error such as a caught panic
    #[error("Plugin runtime error: {0}")]
    Runtime(String),
}

/// A hook capability exists on a plugin but cannot be bound for it.
///
/// The hook is disabled for that plugin; the plugin itself stays registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot bind {kind_prefix}.{hook} on {plugin}: {reason}", kind_prefix = .kind.hook_prefix())]
pub struct HookSignatureError {
    pub plugin: String,
    pub kind: PluginKind,
    pub hook: Hook,
    pub reason: String,
}

/// Errors from the persistent state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("plugin options error: {0}")]
    Options(#[from] PluginError),

    #[error("backup directory {backup} lies inside the state directory {root}")]
    NestedBackup { backup: String, root: String },
}

/// Errors raised while loading a plugin library from disk.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("failed to load library {path}: {message}")]
    LibraryLoad { path: String, message: String },

    #[error("library {path} does not export `{symbol}`")]
    MissingSymbol { path: String, symbol: String },

    #[error("library {path} returned a null catalog")]
    NullCatalog { path: String },

    #[error("library {path} was built for plugin ABI {found}, host expects {expected}")]
    AbiMismatch { path: String, found: u32, expected: u32 },

    #[error("failed to read plugin directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Declarations the type scanner refuses to yield.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("{type_id} carries more than one {kind} tag")]
    DuplicateTag { type_id: String, kind: PluginKind },

    #[error("{type_id} is tagged as both a service and a module")]
    ConflictingTags { type_id: String },
}

/// Errors surfaced by the orchestrator's top-level operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Another top-level operation is already running.
    #[error("cannot start {requested}: {running} is already in progress")]
    Busy {
        requested: &'static str,
        running: &'static str,
    },

    #[error("no plugin registered for {0}")]
    NotFound(String),

    #[error("{0} is a service and cannot be toggled")]
    NotAModule(String),

    #[error("invalid options for {plugin}: {source}")]
    InvalidOptions {
        plugin: String,
        #[source]
        source: PluginError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
