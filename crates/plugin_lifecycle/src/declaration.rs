//! Plugin declarations and catalogs.
//!
//! A [`Catalog`] is the unit the host discovers plugins in: either the
//! host's own built-in list, or the catalog exported by a plugin library
//! loaded from disk. Each catalog holds [`PluginDeclaration`]s, and each
//! declaration carries the tags ([`DeclarationMetadata`]) that make it a
//! Service or a Module.

use crate::plugin::{Hook, Plugin};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Scheduling priorities. Lower values run first within a phase.
pub mod priority {
    pub const HIGHEST: i32 = 0;
    pub const HIGH: i32 = 250;
    pub const MEDIUM: i32 = 500;
    pub const LOW: i32 = 750;
    pub const LOWEST: i32 = 1000;
}

/// The two plugin variants the lifecycle core manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    /// Always active once booted.
    Service,
    /// Can be toggled on and off after boot.
    Module,
}

impl PluginKind {
    /// Prefix used when naming this kind's hooks (`service.configure`,
    /// `module.enable`, ...).
    pub fn hook_prefix(&self) -> &'static str {
        match self {
            PluginKind::Service => "service",
            PluginKind::Module => "module",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hook_prefix())
    }
}

/// Stable identity of a plugin type.
///
/// `TypeId` is not stable across separately compiled libraries, so identity
/// is the declared type path instead. Two descriptors are the same plugin iff
/// their type ids are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginTypeId(String);

impl PluginTypeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity derived from the Rust type path of `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(std::any::type_name::<T>().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, used as the default display name.
    pub fn short_name(&self) -> &str {
        let path = self.0.split('<').next().unwrap_or(&self.0);
        path.rsplit("::").next().unwrap_or(path)
    }
}

impl fmt::Display for PluginTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PluginTypeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Declared metadata for one Service or Module tag.
///
/// Defaults follow the declaration surface: priority `MEDIUM`, not debug,
/// quiet, and (for modules) disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationMetadata {
    pub kind: PluginKind,
    pub name: Option<String>,
    pub version: Option<String>,
    pub priority: i32,
    /// Initial enabled state. Ignored for services.
    pub enabled: bool,
    pub debug: bool,
    pub quiet: bool,
    /// Optional explicit hook manifest. When present, every listed hook must
    /// be backed by a capability and no unlisted hook is bound.
    pub hooks: Option<Vec<Hook>>,
}

impl DeclarationMetadata {
    /// A Service tag with default settings.
    pub fn service() -> Self {
        Self::with_kind(PluginKind::Service)
    }

    /// A Module tag with default settings (starts disabled).
    pub fn module() -> Self {
        Self::with_kind(PluginKind::Module)
    }

    fn with_kind(kind: PluginKind) -> Self {
        Self {
            kind,
            name: None,
            version: None,
            priority: priority::MEDIUM,
            enabled: false,
            debug: false,
            quiet: true,
            hooks: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn hooks(mut self, hooks: &[Hook]) -> Self {
        self.hooks = Some(hooks.to_vec());
        self
    }
}

/// Constructs a fresh plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// One plugin type as published by a catalog.
#[derive(Clone)]
pub struct PluginDeclaration {
    pub type_id: PluginTypeId,
    /// Supertype identities this type also answers to in registry lookups.
    pub ancestors: Vec<PluginTypeId>,
    pub tags: Vec<DeclarationMetadata>,
    pub factory: PluginFactory,
}

impl PluginDeclaration {
    /// An untagged declaration. Untagged declarations are ignored by the
    /// scanner until a tag is attached.
    pub fn new<F>(type_id: PluginTypeId, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        Self {
            type_id,
            ancestors: Vec::new(),
            tags: Vec::new(),
            factory: Arc::new(factory),
        }
    }

    /// Declare `T` as a Service built from `T::default()`.
    pub fn service<T: Plugin + Default + 'static>(tag: DeclarationMetadata) -> Self {
        Self::new(PluginTypeId::of::<T>(), || Box::new(T::default()) as Box<dyn Plugin>)
            .with_tag(DeclarationMetadata { kind: PluginKind::Service, ..tag })
    }

    /// Declare `T` as a Module built from `T::default()`.
    pub fn module<T: Plugin + Default + 'static>(tag: DeclarationMetadata) -> Self {
        Self::new(PluginTypeId::of::<T>(), || Box::new(T::default()) as Box<dyn Plugin>)
            .with_tag(DeclarationMetadata { kind: PluginKind::Module, ..tag })
    }

    pub fn with_tag(mut self, tag: DeclarationMetadata) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn extends(mut self, ancestor: impl Into<PluginTypeId>) -> Self {
        self.ancestors.push(ancestor.into());
        self
    }
}

impl fmt::Debug for PluginDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDeclaration")
            .field("type_id", &self.type_id)
            .field("ancestors", &self.ancestors)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Identity used to de-duplicate catalogs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogId {
    pub name: String,
    pub version: String,
}

impl fmt::Display for CatalogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

/// Where a catalog came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    /// Compiled into the host.
    BuiltIn,
    /// Loaded from a shared library on disk.
    Library(PathBuf),
}

/// A set of plugin declarations published together.
#[derive(Debug, Clone)]
pub struct Catalog {
    id: CatalogId,
    source: CatalogSource,
    declarations: Vec<PluginDeclaration>,
}

impl Catalog {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: CatalogId {
                name: name.into(),
                version: version.into(),
            },
            source: CatalogSource::BuiltIn,
            declarations: Vec::new(),
        }
    }

    pub fn with(mut self, declaration: PluginDeclaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    pub fn push(&mut self, declaration: PluginDeclaration) {
        self.declarations.push(declaration);
    }

    pub fn id(&self) -> &CatalogId {
        &self.id
    }

    pub fn source(&self) -> &CatalogSource {
        &self.source
    }

    pub(crate) fn set_source(&mut self, source: CatalogSource) {
        self.source = source;
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.source, CatalogSource::Library(_))
    }

    pub fn declarations(&self) -> &[PluginDeclaration] {
        &self.declarations
    }
}
