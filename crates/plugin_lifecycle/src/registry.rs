//! Ordered collection of plugin descriptors.

use crate::declaration::PluginTypeId;
use crate::descriptor::PluginDescriptor;
use tracing::debug;

/// Owns every registered descriptor.
///
/// Storage is in registration order. General enumeration ([`all`]) runs
/// newest first; phase passes use [`phase_order`], which sorts by priority
/// and breaks ties by registration order.
///
/// [`all`]: PluginRegistry::all
/// [`phase_order`]: PluginRegistry::phase_order
#[derive(Debug, Default)]
pub struct PluginRegistry {
    entries: Vec<PluginDescriptor>,
    next_sequence: u64,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `descriptor`, replacing any entry with the same type. The new
    /// entry counts as the most recent registration. Returns the replaced
    /// descriptor, if any.
    pub fn register(&mut self, mut descriptor: PluginDescriptor) -> Option<PluginDescriptor> {
        descriptor.sequence = self.next_sequence;
        self.next_sequence += 1;

        let replaced = self
            .entries
            .iter()
            .position(|existing| existing == &descriptor)
            .map(|index| self.entries.remove(index));

        if let Some(old) = &replaced {
            debug!("Replacing registration for {}", old.type_of());
        }
        self.entries.push(descriptor);
        replaced
    }

    pub fn contains(&self, type_id: &PluginTypeId) -> bool {
        self.entries.iter().any(|d| d.type_of() == type_id)
    }

    /// Most recently registered descriptor answering to `type_id`, directly
    /// or through an ancestor.
    pub fn lookup(&self, type_id: &PluginTypeId) -> Option<&PluginDescriptor> {
        self.entries.iter().rev().find(|d| d.answers_to(type_id))
    }

    pub fn lookup_mut(&mut self, type_id: &PluginTypeId) -> Option<&mut PluginDescriptor> {
        self.entries.iter_mut().rev().find(|d| d.answers_to(type_id))
    }

    /// Every descriptor whose name matches, newest first.
    pub fn find(&self, name: &str, case_insensitive: bool) -> Vec<&PluginDescriptor> {
        self.all()
            .filter(|d| {
                if case_insensitive {
                    d.name().eq_ignore_ascii_case(name)
                } else {
                    d.name() == name
                }
            })
            .collect()
    }

    /// Position of the descriptor addressed by `key`: an exact type id
    /// first, then a case-insensitive name. Newest registration wins.
    pub fn locate(&self, key: &str) -> Option<usize> {
        let by_type = PluginTypeId::new(key);
        (0..self.entries.len())
            .rev()
            .find(|&i| self.entries[i].answers_to(&by_type))
            .or_else(|| {
                (0..self.entries.len())
                    .rev()
                    .find(|&i| self.entries[i].name().eq_ignore_ascii_case(key))
            })
    }

    /// Newest registration first.
    pub fn all(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.entries.iter().rev()
    }

    /// Descriptor at `index`, as handed out by [`phase_order`](Self::phase_order).
    pub fn get(&self, index: usize) -> Option<&PluginDescriptor> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PluginDescriptor> {
        self.entries.get_mut(index)
    }

    /// Indices sorted by ascending priority, ties in registration order.
    pub fn phase_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by_key(|&i| (self.entries[i].priority(), self.entries[i].sequence()));
        order
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::{Catalog, DeclarationMetadata, PluginDeclaration};
    use crate::plugin::Plugin;

    struct Stub;
    impl Plugin for Stub {}

    fn stub(type_id: &str, name: &str, priority: i32) -> PluginDescriptor {
        let tag = DeclarationMetadata::service().name(name).priority(priority);
        let declaration = PluginDeclaration::new(PluginTypeId::new(type_id), || {
            Box::new(Stub) as Box<dyn Plugin>
        })
        .extends("game::Feature");
        PluginDescriptor::new(&declaration, &tag, &Catalog::new("tests", "1"))
    }

    fn names<'a>(it: impl Iterator<Item = &'a PluginDescriptor>) -> Vec<&'a str> {
        it.map(|d| d.name()).collect()
    }

    #[test]
    fn phase_order_is_priority_then_registration() {
        let mut registry = PluginRegistry::new();
        registry.register(stub("a", "A", 5));
        registry.register(stub("b", "B", 0));
        registry.register(stub("c", "C", 5));
        registry.register(stub("d", "D", 0));

        let order: Vec<&str> = registry
            .phase_order()
            .into_iter()
            .map(|i| registry.get(i).unwrap().name())
            .collect();
        assert_eq!(order, vec!["B", "D", "A", "C"]);
    }

    #[test]
    fn enumeration_is_newest_first() {
        let mut registry = PluginRegistry::new();
        registry.register(stub("a", "A", 0));
        registry.register(stub("b", "B", 0));
        assert_eq!(names(registry.all()), vec!["B", "A"]);
    }

    #[test]
    fn register_upserts_by_type() {
        let mut registry = PluginRegistry::new();
        registry.register(stub("a", "First", 0));
        registry.register(stub("b", "B", 0));
        let replaced = registry.register(stub("a", "Second", 0));

        assert_eq!(replaced.unwrap().name(), "First");
        assert_eq!(registry.len(), 2);
        assert_eq!(names(registry.all()), vec!["Second", "B"]);
    }

    #[test]
    fn lookup_matches_ancestors_newest_first() {
        let mut registry = PluginRegistry::new();
        registry.register(stub("a", "A", 0));
        registry.register(stub("b", "B", 0));

        assert_eq!(registry.lookup(&PluginTypeId::new("a")).unwrap().name(), "A");
        assert_eq!(
            registry.lookup(&PluginTypeId::new("game::Feature")).unwrap().name(),
            "B"
        );
        assert!(registry.lookup(&PluginTypeId::new("missing")).is_none());
    }

    #[test]
    fn find_by_name() {
        let mut registry = PluginRegistry::new();
        registry.register(stub("a", "Vendors", 0));

        assert_eq!(registry.find("vendors", true).len(), 1);
        assert!(registry.find("vendors", false).is_empty());
        assert_eq!(registry.locate("VENDORS"), Some(0));
        assert_eq!(registry.locate("a"), Some(0));
    }
}
