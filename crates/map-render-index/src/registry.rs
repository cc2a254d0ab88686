//! Explicit table from item kinds to the factories that build their renderers
//!
//! Filled once at startup and handed to [`crate::QuadtreeRenderer`]; there is
//! no global lookup.

use crate::item::ItemRef;
use crate::{IndexError, Result};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Tag naming a family of application objects ("marker", "polyline", ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKind(pub &'static str);

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Builds a renderable item for an application object of type `D`
pub trait ItemFactory<D>: Send + Sync {
    /// Returns `None` when this factory declines the object
    fn create(&self, descriptor: &D) -> Option<ItemRef>;
}

impl<D, F> ItemFactory<D> for F
where
    F: Fn(&D) -> Option<ItemRef> + Send + Sync,
{
    fn create(&self, descriptor: &D) -> Option<ItemRef> {
        self(descriptor)
    }
}

/// Registration table of item factories
pub struct ItemRegistry<D> {
    factories: DashMap<ItemKind, Arc<dyn ItemFactory<D>>>,
}

impl<D> Default for ItemRegistry<D> {
    fn default() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }
}

impl<D> fmt::Debug for ItemRegistry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<ItemKind> = self.factories.iter().map(|e| *e.key()).collect();
        kinds.sort();
        f.debug_struct("ItemRegistry").field("kinds", &kinds).finish()
    }
}

impl<D> ItemRegistry<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `kind`, returning the factory it replaces
    pub fn register(
        &self,
        kind: ItemKind,
        factory: impl ItemFactory<D> + 'static,
    ) -> Option<Arc<dyn ItemFactory<D>>> {
        let previous = self.factories.insert(kind, Arc::new(factory));
        if previous.is_some() {
            tracing::debug!(%kind, "Replaced item factory");
        }
        previous
    }

    /// Builder-style [`ItemRegistry::register`]
    pub fn with(self, kind: ItemKind, factory: impl ItemFactory<D> + 'static) -> Self {
        self.register(kind, factory);
        self
    }

    pub fn contains(&self, kind: ItemKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build an item for `descriptor` with the factory registered for `kind`
    pub fn create(&self, kind: ItemKind, descriptor: &D) -> Result<Option<ItemRef>> {
        // Clone the factory out so it does not run under the shard lock
        let factory = self
            .factories
            .get(&kind)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| IndexError::UnknownItemKind(kind.to_string()))?;
        Ok(factory.create(descriptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::GeoBounds;
    use crate::quadtree::tests::TestItem;

    const POINT: ItemKind = ItemKind("point");

    fn point_registry() -> ItemRegistry<(u64, f64, f64)> {
        ItemRegistry::new().with(POINT, |&(id, lat, lon): &(u64, f64, f64)| {
            Some(TestItem::new(id, GeoBounds::point(lat, lon)) as ItemRef)
        })
    }

    #[test]
    fn test_create_registered_kind() {
        let registry = point_registry();
        let item = registry.create(POINT, &(7, 1.0, 2.0)).unwrap().unwrap();
        assert_eq!(item.id().0, 7);
        assert_eq!(item.bounds(), GeoBounds::point(1.0, 2.0));
    }

    #[test]
    fn test_unknown_kind_is_an_error() {
        let registry = point_registry();
        let Err(err) = registry.create(ItemKind("label"), &(1, 0.0, 0.0)) else {
            panic!("lookup of an unregistered kind should fail");
        };
        assert!(matches!(err, IndexError::UnknownItemKind(kind) if kind == "label"));
    }

    #[test]
    fn test_factory_may_decline() {
        let registry: ItemRegistry<u64> = ItemRegistry::new();
        registry.register(POINT, |_: &u64| -> Option<ItemRef> { None });
        assert!(registry.create(POINT, &1).unwrap().is_none());
    }

    #[test]
    fn test_register_replaces() {
        let registry = point_registry();
        let previous =
            registry.register(POINT, |_: &(u64, f64, f64)| -> Option<ItemRef> { None });
        assert!(previous.is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry.create(POINT, &(1, 0.0, 0.0)).unwrap().is_none());
    }
}
