//! Discovery of tagged plugin declarations.
//!
//! Scanning is pure: it reads catalogs and yields `(declaration, tag)` pairs
//! without constructing plugins. Results are cached per catalog until
//! [`TypeScanner::invalidate`] is called.

use crate::declaration::{Catalog, CatalogId, DeclarationMetadata, PluginDeclaration, PluginKind};
use crate::error::ScanError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// A declaration that passed tag validation.
#[derive(Debug, Clone)]
pub struct ScannedType {
    pub declaration: PluginDeclaration,
    pub tag: DeclarationMetadata,
    pub catalog: CatalogId,
}

#[derive(Debug, Default)]
pub struct TypeScanner {
    cache: DashMap<CatalogId, Arc<Vec<ScannedType>>>,
    scans: AtomicUsize,
}

impl TypeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tagged declarations of one catalog, from cache when possible.
    pub fn scan(&self, catalog: &Catalog) -> Arc<Vec<ScannedType>> {
        if let Some(cached) = self.cache.get(catalog.id()) {
            return Arc::clone(cached.value());
        }

        self.scans.fetch_add(1, Ordering::Relaxed);
        let mut found = Vec::new();
        for declaration in catalog.declarations() {
            match validate_tags(declaration) {
                Ok(Some(tag)) => found.push(ScannedType {
                    declaration: declaration.clone(),
                    tag,
                    catalog: catalog.id().clone(),
                }),
                Ok(None) => debug!("Skipping untagged type {}", declaration.type_id),
                Err(e) => warn!("Skipping {} from {}: {}", declaration.type_id, catalog.id(), e),
            }
        }

        debug!("Scanned {}: {} plugin types", catalog.id(), found.len());
        let found = Arc::new(found);
        self.cache.insert(catalog.id().clone(), Arc::clone(&found));
        found
    }

    /// Scan every catalog, in order.
    pub fn scan_all<'a>(&self, catalogs: impl IntoIterator<Item = &'a Catalog>) -> Vec<ScannedType> {
        catalogs
            .into_iter()
            .flat_map(|catalog| self.scan(catalog).iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Drop all cached results.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    /// Number of catalogs actually scanned (cache misses).
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }
}

/// The single tag a declaration may carry, if any.
pub fn validate_tags(declaration: &PluginDeclaration) -> Result<Option<DeclarationMetadata>, ScanError> {
    let count = |kind: PluginKind| declaration.tags.iter().filter(|t| t.kind == kind).count();
    let services = count(PluginKind::Service);
    let modules = count(PluginKind::Module);

    for (kind, n) in [(PluginKind::Service, services), (PluginKind::Module, modules)] {
        if n > 1 {
            return Err(ScanError::DuplicateTag {
                type_id: declaration.type_id.to_string(),
                kind,
            });
        }
    }
    if services == 1 && modules == 1 {
        return Err(ScanError::ConflictingTags {
            type_id: declaration.type_id.to_string(),
        });
    }

    Ok(declaration.tags.first().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::PluginTypeId;
    use crate::plugin::Plugin;

    #[derive(Default)]
    struct Stub;
    impl Plugin for Stub {}

    fn catalog() -> Catalog {
        Catalog::new("core", "1.0")
            .with(PluginDeclaration::service::<Stub>(DeclarationMetadata::service()))
            .with(PluginDeclaration::new(PluginTypeId::new("untagged"), || {
                Box::new(Stub) as Box<dyn Plugin>
            }))
            .with(
                PluginDeclaration::new(PluginTypeId::new("twice"), || Box::new(Stub) as Box<dyn Plugin>)
                    .with_tag(DeclarationMetadata::module())
                    .with_tag(DeclarationMetadata::module()),
            )
            .with(
                PluginDeclaration::new(PluginTypeId::new("both"), || Box::new(Stub) as Box<dyn Plugin>)
                    .with_tag(DeclarationMetadata::module())
                    .with_tag(DeclarationMetadata::service()),
            )
    }

    #[test]
    fn yields_only_validly_tagged_types() {
        let scanner = TypeScanner::new();
        let found = scanner.scan(&catalog());
        assert_eq!(found.len(), 1);
        assert!(found[0].declaration.type_id.as_str().ends_with("Stub"));
        assert_eq!(found[0].catalog.name, "core");
    }

    #[test]
    fn results_are_cached_until_invalidated() {
        let scanner = TypeScanner::new();
        let catalog = catalog();

        let first = scanner.scan(&catalog);
        let second = scanner.scan(&catalog);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(scanner.scans(), 1);

        scanner.invalidate();
        scanner.scan(&catalog);
        assert_eq!(scanner.scans(), 2);
    }

    #[test]
    fn rejects_duplicate_and_conflicting_tags() {
        let catalog = catalog();
        let decls = catalog.declarations();
        assert!(matches!(
            validate_tags(&decls[2]),
            Err(ScanError::DuplicateTag { kind: PluginKind::Module, .. })
        ));
        assert!(matches!(
            validate_tags(&decls[3]),
            Err(ScanError::ConflictingTags { .. })
        ));
        assert_eq!(validate_tags(&decls[1]), Ok(None));
    }
}
