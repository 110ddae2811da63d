//! # Plugin Lifecycle
//!
//! Discovers, sequences, persists and fault-isolates the Services and
//! Modules a game server is assembled from.
//!
//! ## Overview
//!
//! - **Services** are always active once the host has booted.
//! - **Modules** can be enabled and disabled at runtime. A module that
//!   starts disabled is *deferred*: it does no work until first enabled.
//!
//! Plugins are plain Rust types implementing [`Plugin`] plus whichever
//! capability traits they need ([`Configurable`], [`Invokable`],
//! [`Loadable`], [`Savable`], [`Disposable`], [`Toggleable`],
//! [`HasOptions`]). They are published in a [`Catalog`], either compiled into
//! the host or exported from a shared library with [`declare_plugins!`].
//!
//! The [`Orchestrator`] runs them through their phases:
//!
//! ```text
//! Registered -> Configured -> Invoked -> {Enabled <-> Disabled}* -> Disposed
//! ```
//!
//! Within a phase plugins run by ascending priority, ties in registration
//! order. Dispose runs in reverse. Every hook call goes through a
//! [`FaultBarrier`], so a failing or panicking plugin is logged and the pass
//! moves on.
//!
//! ## Persistence
//!
//! Each plugin type has two independent records in the [`StateStore`]: its
//! lifecycle state (name, priority, debug, quiet, enabled) and its options.

pub mod barrier;
pub mod config;
pub mod debug_log;
pub mod declaration;
pub mod descriptor;
pub mod error;
pub mod hooks;
pub mod loader;
mod macros;
pub mod orchestrator;
pub mod plugin;
pub mod registry;
pub mod scanner;
pub mod store;

pub use barrier::{FaultBarrier, FaultHandler, FaultReport, FaultScope, LogFaultHandler, Phase};
pub use config::OrchestratorConfig;
pub use debug_log::DebugLog;
pub use declaration::{
    priority, Catalog, CatalogId, CatalogSource, DeclarationMetadata, PluginDeclaration, PluginKind,
    PluginTypeId,
};
pub use descriptor::{OptionsLoad, PluginDescriptor, PluginSnapshot, Provenance};
pub use error::{HookSignatureError, LifecycleError, LoaderError, PluginError, ScanError, StoreError};
pub use loader::{AssemblyLoader, CatalogSet, PLUGIN_ABI_VERSION};
pub use orchestrator::{BootReport, CompileReport, Orchestrator, OrchestratorBuilder, PhaseReport};
pub use plugin::{
    Configurable, Disposable, HasOptions, Hook, Invokable, Loadable, Plugin, Savable, Toggleable,
    TypedOptions,
};
pub use registry::PluginRegistry;
pub use scanner::{ScannedType, TypeScanner};
pub use store::{
    is_within, FileStateStore, MemoryStateStore, OptionsEnvelope, StateRecord, StateStore,
};
