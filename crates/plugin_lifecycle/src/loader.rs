//! Loading plugin catalogs from shared libraries.
//!
//! A plugin library is a `cdylib` built with [`declare_plugins!`], which
//! exports two symbols:
//!
//! - `plugin_abi_version() -> u32`, checked against [`PLUGIN_ABI_VERSION`];
//! - `plugin_catalog() -> *mut Catalog`, an owned, boxed catalog.
//!
//! The library must stay loaded for as long as anything built from its
//! catalog is alive, so [`CatalogSet`] keeps the handles and drops them last.
//!
//! [`declare_plugins!`]: crate::declare_plugins

use crate::barrier::{FaultBarrier, FaultScope, Phase};
use crate::declaration::{Catalog, CatalogId, CatalogSource};
use crate::error::LoaderError;
use libloading::{Library, Symbol};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Bumped whenever the layout of [`Catalog`] or the plugin traits changes
/// incompatibly.
pub const PLUGIN_ABI_VERSION: u32 = 3;

pub const ABI_SYMBOL: &[u8] = b"plugin_abi_version";
pub const CATALOG_SYMBOL: &[u8] = b"plugin_catalog";

/// A catalog together with the library that backs it.
pub struct LoadedLibrary {
    // Field order matters: the catalog holds code from the library and must
    // drop first.
    pub catalog: Catalog,
    pub path: PathBuf,
    library: Library,
}

impl LoadedLibrary {
    pub fn id(&self) -> &CatalogId {
        self.catalog.id()
    }
}

impl std::fmt::Debug for LoadedLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedLibrary")
            .field("catalog", self.catalog.id())
            .field("path", &self.path)
            .finish()
    }
}

/// Scans directories for plugin libraries and loads them.
#[derive(Debug, Clone)]
pub struct AssemblyLoader {
    barrier: FaultBarrier,
}

impl AssemblyLoader {
    pub fn new(barrier: FaultBarrier) -> Self {
        Self { barrier }
    }

    /// Load every plugin library under `directory`, recursively. A library
    /// that fails to load is reported and skipped. A missing directory
    /// yields nothing.
    pub fn load_from(&self, directory: &Path) -> Vec<LoadedLibrary> {
        let files = match discover(directory) {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot scan plugin directory {}: {}", directory.display(), e);
                return Vec::new();
            }
        };

        let mut loaded = Vec::new();
        for path in files {
            let label = path.display().to_string();
            let scope = FaultScope::new(&label, Phase::Compile);
            // SAFETY: loading a library runs its initializers; plugin
            // directories are trusted by the host.
            if let Some(library) = self.barrier.invoke_get(scope, || unsafe { load_library(&path) }) {
                info!("Loaded plugin library {} ({})", library.id(), label);
                loaded.push(library);
            }
        }
        loaded
    }
}

/// Whether `path` looks like a shared library on this platform.
pub fn is_plugin_library(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some(ext) if ext == std::env::consts::DLL_EXTENSION
    )
}

/// All plugin libraries under `directory`, sorted for a stable load order.
pub fn discover(directory: &Path) -> Result<Vec<PathBuf>, LoaderError> {
    let mut found = Vec::new();
    if directory.is_dir() {
        walk(directory, &mut found)?;
    } else {
        debug!("Plugin directory {} does not exist", directory.display());
    }
    found.sort();
    Ok(found)
}

fn walk(directory: &Path, found: &mut Vec<PathBuf>) -> Result<(), LoaderError> {
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, found)?;
        } else if is_plugin_library(&path) {
            found.push(path);
        }
    }
    Ok(())
}

/// Load one plugin library and take ownership of its catalog.
///
/// # Safety
///
/// Loading runs arbitrary code from the library, and the library must have
/// been built against this crate with a matching [`PLUGIN_ABI_VERSION`].
pub unsafe fn load_library(path: &Path) -> Result<LoadedLibrary, LoaderError> {
    let display = path.display().to_string();

    let library = Library::new(path).map_err(|e| LoaderError::LibraryLoad {
        path: display.clone(),
        message: e.to_string(),
    })?;

    let found = {
        let abi: Symbol<unsafe extern "C" fn() -> u32> =
            library.get(ABI_SYMBOL).map_err(|_| LoaderError::MissingSymbol {
                path: display.clone(),
                symbol: String::from_utf8_lossy(ABI_SYMBOL).into_owned(),
            })?;
        abi()
    };
    check_abi(path, found)?;

    let raw = {
        let catalog_fn: Symbol<unsafe extern "C" fn() -> *mut Catalog> =
            library.get(CATALOG_SYMBOL).map_err(|_| LoaderError::MissingSymbol {
                path: display.clone(),
                symbol: String::from_utf8_lossy(CATALOG_SYMBOL).into_owned(),
            })?;
        catalog_fn()
    };
    let catalog = adopt_catalog(path, raw)?;

    Ok(LoadedLibrary {
        catalog,
        path: path.to_path_buf(),
        library,
    })
}

/// Reject a library built for another plugin ABI. Runs before the catalog
/// symbol is called.
fn check_abi(path: &Path, found: u32) -> Result<(), LoaderError> {
    if found == PLUGIN_ABI_VERSION {
        return Ok(());
    }
    Err(LoaderError::AbiMismatch {
        path: path.display().to_string(),
        found,
        expected: PLUGIN_ABI_VERSION,
    })
}

/// Take ownership of the catalog a library handed out and mark it as
/// coming from `path`.
///
/// # Safety
///
/// `raw` must be null or come from `Box::into_raw` on a [`Catalog`], and must
/// not be used again by the caller.
unsafe fn adopt_catalog(path: &Path, raw: *mut Catalog) -> Result<Catalog, LoaderError> {
    if raw.is_null() {
        return Err(LoaderError::NullCatalog {
            path: path.display().to_string(),
        });
    }
    let mut catalog = *Box::from_raw(raw);
    catalog.set_source(CatalogSource::Library(path.to_path_buf()));
    Ok(catalog)
}

/// Every catalog the host knows about, de-duplicated by [`CatalogId`].
#[derive(Default)]
pub struct CatalogSet {
    catalogs: Vec<Catalog>,
    // Dropped after the catalogs.
    libraries: Vec<(PathBuf, Library)>,
}

impl CatalogSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &CatalogId) -> bool {
        self.catalogs.iter().any(|c| c.id() == id)
    }

    /// Add a catalog unless one with the same identity is already present.
    pub fn add(&mut self, catalog: Catalog) -> bool {
        if self.contains(catalog.id()) {
            debug!("Catalog {} already known, skipping", catalog.id());
            return false;
        }
        self.catalogs.push(catalog);
        true
    }

    /// Merge a loaded library. A duplicate is dropped, unloading its handle.
    pub fn add_library(&mut self, loaded: LoadedLibrary) -> bool {
        let LoadedLibrary {
            catalog,
            path,
            library,
        } = loaded;
        if self.add(catalog) {
            self.libraries.push((path, library));
            true
        } else {
            debug!("Duplicate plugin library {} ignored", path.display());
            false
        }
    }

    pub fn get(&self, id: &CatalogId) -> Option<&Catalog> {
        self.catalogs.iter().find(|c| c.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Catalog> {
        self.catalogs.iter()
    }

    pub fn len(&self) -> usize {
        self.catalogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalogs.is_empty()
    }

    /// Files of every dynamically loaded library.
    pub fn library_paths(&self) -> impl Iterator<Item = &Path> {
        self.libraries.iter().map(|(path, _)| path.as_path())
    }
}

impl std::fmt::Debug for CatalogSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogSet")
            .field("catalogs", &self.catalogs.iter().map(Catalog::id).collect::<Vec<_>>())
            .field("libraries", &self.libraries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn discover_finds_libraries_recursively_in_order() {
        let dir = TempDir::new().unwrap();
        let ext = std::env::consts::DLL_EXTENSION;
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join(format!("b.{}", ext)), b"").unwrap();
        fs::write(dir.path().join("nested").join(format!("a.{}", ext)), b"").unwrap();
        fs::write(dir.path().join("readme.txt"), b"").unwrap();

        let found = discover(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| is_plugin_library(p)));
        assert!(found.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(discover(&dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn bad_library_is_skipped_and_reported() {
        let dir = TempDir::new().unwrap();
        let ext = std::env::consts::DLL_EXTENSION;
        fs::write(dir.path().join(format!("broken.{}", ext)), b"not a library").unwrap();

        let barrier = FaultBarrier::default();
        let loader = AssemblyLoader::new(barrier.clone());
        assert!(loader.load_from(dir.path()).is_empty());

        let faults = barrier.recent_faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].phase, Phase::Compile);
        assert!(faults[0].plugin.ends_with(&format!("broken.{}", ext)));
    }

    #[test]
    fn abi_version_must_match() {
        let path = Path::new("plugins/old.so");
        assert!(check_abi(path, PLUGIN_ABI_VERSION).is_ok());

        match check_abi(path, PLUGIN_ABI_VERSION + 1) {
            Err(LoaderError::AbiMismatch {
                path,
                found,
                expected,
            }) => {
                assert_eq!(path, "plugins/old.so");
                assert_eq!(found, PLUGIN_ABI_VERSION + 1);
                assert_eq!(expected, PLUGIN_ABI_VERSION);
            }
            other => panic!("expected an ABI mismatch, got {:?}", other),
        }
    }

    #[test]
    fn adopted_catalog_is_owned_and_marked_dynamic() {
        let path = Path::new("plugins/services/shop.so");
        let raw = Box::into_raw(Box::new(Catalog::new("shop", "2.0.0")));

        let catalog = unsafe { adopt_catalog(path, raw) }.unwrap();
        assert_eq!(catalog.id().name, "shop");
        assert_eq!(catalog.id().version, "2.0.0");
        assert!(catalog.is_dynamic());
        assert_eq!(
            catalog.source(),
            &CatalogSource::Library(path.to_path_buf())
        );
    }

    #[test]
    fn null_catalog_is_rejected() {
        let result = unsafe { adopt_catalog(Path::new("plugins/empty.so"), std::ptr::null_mut()) };
        assert!(matches!(
            result,
            Err(LoaderError::NullCatalog { path }) if path == "plugins/empty.so"
        ));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn library_without_plugin_exports_is_rejected() {
        // Any real shared library that is not a plugin will do.
        let result = unsafe { load_library(Path::new("libc.so.6")) };
        assert!(matches!(
            result,
            Err(LoaderError::MissingSymbol { symbol, .. }) if symbol == "plugin_abi_version"
        ));
    }

    #[test]
    fn catalog_set_deduplicates_by_identity() {
        let mut set = CatalogSet::new();
        assert!(set.add(Catalog::new("core", "1")));
        assert!(!set.add(Catalog::new("core", "1")));
        assert!(set.add(Catalog::new("core", "2")));
        assert_eq!(set.len(), 2);
        assert_eq!(set.library_paths().count(), 0);
    }
}
