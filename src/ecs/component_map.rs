//! Component map - one store per component type of a scene

use std::any::{type_name, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::component::{Component, ComponentRecord, ComponentStorage};
use super::component_set::{ComponentSet, StoreStats};
use super::cursor::{ComponentIterator, Cursor, IterFlags};
use super::events::EventBus;
use super::hierarchy::Hierarchy;
use super::multi_iter::{Grouping, MultiComponentIterator};
use super::registry::ComponentRegistry;
use super::EntityId;
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};

/// Routes component operations to per-type stores.
///
/// Stores are created lazily on the first create of their type. Structural
/// changes are committed once per tick by [`flush`](Self::flush).
pub struct ComponentMap {
    registry: Arc<ComponentRegistry>,
    config: StorageConfig,
    stores: HashMap<TypeId, Box<dyn ComponentStorage>>,
    events: EventBus,
}

impl ComponentMap {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self::with_config(registry, StorageConfig::default())
    }

    pub fn with_config(registry: Arc<ComponentRegistry>, config: StorageConfig) -> Self {
        Self {
            registry,
            config: config.normalized(),
            stores: HashMap::new(),
            events: EventBus::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Typed store of `T`, if one was created.
    pub fn store<T: Component>(&self) -> Option<&ComponentSet<T>> {
        self.stores
            .get(&TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<ComponentSet<T>>()
    }

    pub fn store_mut<T: Component>(&mut self) -> Option<&mut ComponentSet<T>> {
        self.stores
            .get_mut(&TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<ComponentSet<T>>()
    }

    /// Type-erased store for `type_id`, if one was created.
    pub fn storage(&self, type_id: TypeId) -> Option<&dyn ComponentStorage> {
        self.stores.get(&type_id).map(|store| store.as_ref())
    }

    /// Creates a `T` for `entity_id`, built by the registered initializer or
    /// `T::default()`, and raises a component-added event.
    pub fn create_component<T: Component>(&mut self, entity_id: EntityId) -> StorageResult<&mut T> {
        if self.has_component::<T>(entity_id) {
            return Err(StorageError::DuplicateComponent {
                entity_id,
                type_name: type_name::<T>(),
            });
        }

        let registry = Arc::clone(&self.registry);
        let value = match registry.initializer::<T>() {
            Some(initializer) => initializer(self, entity_id),
            None => T::default(),
        };

        let store = Self::typed_store_entry::<T>(&mut self.stores, &self.config);
        let component = store.insert(entity_id, value)?;
        self.events.component_added(entity_id, &*component);
        Ok(component)
    }

    /// Creates a component of a registered type without naming it statically.
    pub fn create_component_dyn(
        &mut self,
        type_id: TypeId,
        entity_id: EntityId,
    ) -> StorageResult<()> {
        let registry = Arc::clone(&self.registry);
        let descriptor = registry
            .descriptor(type_id)
            .ok_or_else(|| StorageError::UnregisteredComponent(format!("{:?}", type_id)))?;
        descriptor.create(self, entity_id)
    }

    /// Creates a component by its registry identifier.
    pub fn create_component_named(
        &mut self,
        identifier: &str,
        entity_id: EntityId,
    ) -> StorageResult<()> {
        let type_id = self
            .registry
            .by_identifier(identifier)
            .map(|descriptor| descriptor.type_id())
            .ok_or_else(|| StorageError::UnregisteredComponent(identifier.to_string()))?;
        self.create_component_dyn(type_id, entity_id)
    }

    /// Removes the `T` of `entity_id`. Returns `false` if it had none.
    pub fn remove_component<T: Component>(&mut self, entity_id: EntityId) -> bool {
        self.remove_component_dyn(TypeId::of::<T>(), entity_id)
    }

    pub fn remove_component_dyn(&mut self, type_id: TypeId, entity_id: EntityId) -> bool {
        match self.stores.get_mut(&type_id) {
            Some(store) => store.remove(entity_id, &self.events),
            None => false,
        }
    }

    /// Removes every component of `entity_id` and returns how many there were.
    pub fn remove_all_components(&mut self, entity_id: EntityId) -> usize {
        let mut removed = 0;
        for store in self.stores.values_mut() {
            if store.remove(entity_id, &self.events) {
                removed += 1;
            }
        }
        removed
    }

    pub fn has_component<T: Component>(&self, entity_id: EntityId) -> bool {
        self.has_component_dyn(TypeId::of::<T>(), entity_id)
    }

    pub fn has_component_dyn(&self, type_id: TypeId, entity_id: EntityId) -> bool {
        self.stores
            .get(&type_id)
            .is_some_and(|store| store.has(entity_id))
    }

    pub fn get_component<T: Component>(&self, entity_id: EntityId) -> StorageResult<&T> {
        self.store::<T>()
            .ok_or_else(|| Self::not_found::<T>(entity_id))?
            .get(entity_id)
    }

    pub fn get_component_mut<T: Component>(
        &mut self,
        entity_id: EntityId,
    ) -> StorageResult<&mut T> {
        self.store_mut::<T>()
            .ok_or_else(|| Self::not_found::<T>(entity_id))?
            .get_mut(entity_id)
    }

    pub fn try_get_component<T: Component>(&self, entity_id: EntityId) -> Option<&T> {
        self.store::<T>()?.try_get(entity_id)
    }

    /// Whether any store whose type declares the marker trait `Tr` holds
    /// `entity_id`.
    pub fn has_trait<Tr: ?Sized + 'static>(&self, entity_id: EntityId) -> bool {
        let trait_id = TypeId::of::<Tr>();
        self.stores.iter().any(|(type_id, store)| {
            self.registry
                .descriptor(*type_id)
                .is_some_and(|descriptor| descriptor.has_trait(trait_id))
                && store.has(entity_id)
        })
    }

    /// Active unless the entity or one of its ancestors has an inactive
    /// [`Hierarchy`].
    pub fn is_active_in_hierarchy(&self, entity_id: EntityId) -> bool {
        let Some(hierarchy) = self.store::<Hierarchy>() else {
            return true;
        };

        let mut current = Some(entity_id);
        let mut depth = 0usize;
        while let Some(id) = current {
            let Some(node) = hierarchy.try_get(id) else {
                return true;
            };
            if !node.active {
                return false;
            }
            depth += 1;
            if depth > hierarchy.len() {
                log::warn!("Hierarchy cycle detected at entity {}", entity_id);
                return true;
            }
            current = node.parent;
        }
        true
    }

    /// Commits removals and overflow migration in every store.
    pub fn flush(&mut self) {
        for store in self.stores.values_mut() {
            store.flush();
        }
    }

    /// Drops every component of every type.
    pub fn clear(&mut self) {
        for store in self.stores.values_mut() {
            store.clear();
        }
    }

    /// Number of components of all types.
    pub fn component_count(&self) -> usize {
        self.stores.values().map(|store| store.len()).sum()
    }

    /// Layout figures of every store, keyed by component type name.
    pub fn stats(&self) -> BTreeMap<&'static str, StoreStats> {
        self.stores
            .values()
            .map(|store| (store.type_name(), store.stats()))
            .collect()
    }

    /// Cursor over every `T`, already reset.
    pub fn create_iterator<T: Component>(&self, flags: IterFlags) -> ComponentIterator<T> {
        let mut iterator = ComponentIterator::new(flags);
        iterator.reset(self);
        iterator
    }

    /// Untyped cursor over a registered component type, already reset.
    pub fn create_iterator_dyn(&self, type_id: TypeId, flags: IterFlags) -> StorageResult<Cursor> {
        let descriptor = self
            .registry
            .descriptor(type_id)
            .ok_or_else(|| StorageError::UnregisteredComponent(format!("{:?}", type_id)))?;
        let mut cursor = Cursor::new(type_id, descriptor.type_name(), flags);
        cursor.reset(self);
        Ok(cursor)
    }

    /// AND/OR cursor over several registered component types.
    pub fn create_multi_iterator(
        &self,
        grouping: Grouping,
        types: &[TypeId],
        flags: IterFlags,
    ) -> StorageResult<MultiComponentIterator> {
        let mut iterator = MultiComponentIterator::new(self, grouping, types, flags)?;
        iterator.reset(self);
        Ok(iterator)
    }

    /// Serializes every retrievable component, keyed by registry identifier.
    ///
    /// Stores of unregistered types are skipped with a warning.
    pub fn save(&self) -> StorageResult<BTreeMap<String, Vec<ComponentRecord>>> {
        let mut saved = BTreeMap::new();
        for (type_id, store) in &self.stores {
            let Some(descriptor) = self.registry.descriptor(*type_id) else {
                log::warn!(
                    "Skipping unregistered component `{}` on save",
                    store.type_name()
                );
                continue;
            };
            let records = store.save(descriptor.identifier())?;
            if !records.is_empty() {
                saved.insert(descriptor.identifier().to_string(), records);
            }
        }
        Ok(saved)
    }

    /// Inserts saved components. Unknown identifiers are skipped with a
    /// warning. No events are raised.
    ///
    /// Stores created by the load are flushed. Records loaded into an
    /// existing store count as this tick's creates, and its pending removals
    /// stay pending until the next [`ComponentMap::flush`]. Records inserted
    /// before a failing one are kept.
    pub fn load(&mut self, data: BTreeMap<String, Vec<ComponentRecord>>) -> StorageResult<usize> {
        let mut loaded = 0;
        for (identifier, records) in data {
            let Some(descriptor) = self.registry.by_identifier(&identifier) else {
                log::warn!("Skipping unknown component identifier `{}`", identifier);
                continue;
            };
            let fresh = !self.stores.contains_key(&descriptor.type_id());
            let store = self
                .stores
                .entry(descriptor.type_id())
                .or_insert_with(|| descriptor.new_store(&self.config));
            loaded += store.load(&identifier, records)?;
            if fresh {
                store.flush();
            }
        }
        Ok(loaded)
    }

    fn typed_store_entry<'a, T: Component>(
        stores: &'a mut HashMap<TypeId, Box<dyn ComponentStorage>>,
        config: &StorageConfig,
    ) -> &'a mut ComponentSet<T> {
        stores
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(ComponentSet::<T>::new(config)))
            .as_any_mut()
            .downcast_mut::<ComponentSet<T>>()
            // stores are keyed by the TypeId of their component
            .expect("store type matches its TypeId key")
    }

    fn not_found<T>(entity_id: EntityId) -> StorageError {
        StorageError::ComponentNotFound {
            entity_id,
            type_name: type_name::<T>(),
        }
    }
}

impl std::fmt::Debug for ComponentMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentMap")
            .field("stores", &self.stats())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {}

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Health(u32);
    impl Component for Health {}

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Unregistered(u8);
    impl Component for Unregistered {}

    trait Renderable {}

    fn test_map() -> ComponentMap {
        let mut registry = ComponentRegistry::new();
        registry
            .register::<Position>("Position")
            .with_trait::<dyn Renderable>();
        registry
            .register::<Health>("Health")
            .with_initializer(|map, id| {
                // entities with a position start wounded
                if map.has_component::<Position>(id) {
                    Health(50)
                } else {
                    Health(100)
                }
            });
        ComponentMap::new(Arc::new(registry))
    }

    #[test]
    fn test_create_get_remove() {
        let mut map = test_map();

        map.create_component::<Position>(1).unwrap().x = 3.0;
        assert!(map.has_component::<Position>(1));
        assert_eq!(map.get_component::<Position>(1).unwrap().x, 3.0);

        assert!(map.remove_component::<Position>(1));
        assert!(!map.has_component::<Position>(1));
        assert!(map.get_component::<Position>(1).is_err());
        assert!(!map.remove_component::<Position>(1));
        assert!(!map.remove_component::<Health>(1));
    }

    #[test]
    fn test_create_duplicate_fails() {
        let mut map = test_map();
        map.create_component::<Position>(1).unwrap();
        assert!(matches!(
            map.create_component::<Position>(1),
            Err(StorageError::DuplicateComponent { entity_id: 1, .. })
        ));
    }

    #[test]
    fn test_initializer_sees_map() {
        let mut map = test_map();
        map.create_component::<Position>(1).unwrap();
        map.create_component::<Health>(1).unwrap();
        map.create_component::<Health>(2).unwrap();

        assert_eq!(map.get_component::<Health>(1).unwrap(), &Health(50));
        assert_eq!(map.get_component::<Health>(2).unwrap(), &Health(100));
    }

    #[test]
    fn test_dyn_and_named_create() {
        let mut map = test_map();
        map.create_component_dyn(TypeId::of::<Position>(), 4).unwrap();
        map.create_component_named("Health", 4).unwrap();

        assert!(map.has_component_dyn(TypeId::of::<Position>(), 4));
        assert_eq!(map.get_component::<Health>(4).unwrap(), &Health(50));
        assert!(matches!(
            map.create_component_named("Mana", 4),
            Err(StorageError::UnregisteredComponent(_))
        ));
        assert!(matches!(
            map.create_component_dyn(TypeId::of::<Unregistered>(), 4),
            Err(StorageError::UnregisteredComponent(_))
        ));
    }

    #[test]
    fn test_remove_all_components() {
        let mut map = test_map();
        map.create_component::<Position>(7).unwrap();
        map.create_component::<Health>(7).unwrap();
        map.create_component::<Health>(8).unwrap();

        assert_eq!(map.remove_all_components(7), 2);
        assert!(!map.has_component::<Position>(7));
        assert!(!map.has_component::<Health>(7));
        assert!(map.has_component::<Health>(8));
        assert_eq!(map.remove_all_components(7), 0);
    }

    #[test]
    fn test_has_trait() {
        let mut map = test_map();
        map.create_component::<Position>(1).unwrap();
        map.create_component::<Health>(2).unwrap();

        assert!(map.has_trait::<dyn Renderable>(1));
        assert!(!map.has_trait::<dyn Renderable>(2));
    }

    #[test]
    fn test_events_fire_on_create_and_remove() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut map = test_map();

        let added = Arc::clone(&log);
        map.events_mut().on_added::<Health>(move |event| {
            added.lock().unwrap().push(format!("+{}:{}", event.entity_id, event.component.0));
        });
        let removed = Arc::clone(&log);
        map.events_mut().on_removed::<Health>(move |event| {
            removed.lock().unwrap().push(format!("-{}:{}", event.entity_id, event.component.0));
        });

        map.create_component::<Health>(3).unwrap();
        map.get_component_mut::<Health>(3).unwrap().0 = 42;
        map.remove_component::<Health>(3);

        assert_eq!(*log.lock().unwrap(), vec!["+3:100", "-3:42"]);
    }

    #[test]
    fn test_hierarchy_activity() {
        let mut map = test_map();
        map.create_component::<Hierarchy>(1).unwrap();
        *map.create_component::<Hierarchy>(2).unwrap() = Hierarchy::child_of(1);
        *map.create_component::<Hierarchy>(3).unwrap() = Hierarchy::child_of(2);

        assert!(map.is_active_in_hierarchy(3));
        assert!(map.is_active_in_hierarchy(99));

        map.get_component_mut::<Hierarchy>(1).unwrap().active = false;
        assert!(!map.is_active_in_hierarchy(3));
        assert!(!map.is_active_in_hierarchy(1));
    }

    #[test]
    fn test_hierarchy_cycle_terminates() {
        let mut map = test_map();
        *map.create_component::<Hierarchy>(1).unwrap() = Hierarchy::child_of(2);
        *map.create_component::<Hierarchy>(2).unwrap() = Hierarchy::child_of(1);

        assert!(map.is_active_in_hierarchy(1));
    }

    #[test]
    fn test_save_skips_unregistered_store() {
        let mut map = test_map();
        map.create_component::<Position>(1).unwrap();
        map.create_component::<Unregistered>(1).unwrap();
        map.flush();

        let saved = map.save().unwrap();
        assert_eq!(saved.keys().collect::<Vec<_>>(), vec!["Position"]);
    }

    #[test]
    fn test_load_skips_unknown_identifier() {
        let mut map = test_map();
        let mut data = BTreeMap::new();
        data.insert(
            "Health".to_string(),
            vec![ComponentRecord {
                entity: 5,
                value: serde_json::json!(7),
            }],
        );
        data.insert(
            "Mana".to_string(),
            vec![ComponentRecord {
                entity: 5,
                value: serde_json::json!(1),
            }],
        );

        assert_eq!(map.load(data).unwrap(), 1);
        assert_eq!(map.get_component::<Health>(5).unwrap(), &Health(7));
    }

    #[test]
    fn test_load_keeps_pending_removals_of_existing_store() {
        let mut map = test_map();
        map.create_component::<Position>(1).unwrap();
        map.create_component::<Position>(2).unwrap();
        map.flush();
        map.remove_component::<Position>(1);

        let mut data = BTreeMap::new();
        data.insert(
            "Position".to_string(),
            vec![ComponentRecord {
                entity: 3,
                value: serde_json::json!({ "x": 1.0, "y": 2.0 }),
            }],
        );
        data.insert(
            "Health".to_string(),
            vec![ComponentRecord {
                entity: 3,
                value: serde_json::json!(9),
            }],
        );

        assert_eq!(map.load(data).unwrap(), 2);
        let position = map.store::<Position>().unwrap().stats();
        assert_eq!(position.pending_removals, 1);
        assert_eq!(position.len, 2);
        assert!(!map.has_component::<Position>(1));
        assert_eq!(map.get_component::<Position>(3).unwrap().y, 2.0);

        let health = map.store::<Health>().unwrap();
        assert_eq!(health.flush_epoch(), 1);
        assert_eq!(health.get(3).unwrap(), &Health(9));

        map.flush();
        assert_eq!(map.store::<Position>().unwrap().stats().pending_removals, 0);
    }

    #[test]
    fn test_storage_reports_component_type() {
        let mut map = test_map();
        map.create_component::<Position>(1).unwrap();

        let store = map.storage(TypeId::of::<Position>()).unwrap();
        assert_eq!(store.component_type(), TypeId::of::<Position>());
        assert_eq!(store.type_name(), type_name::<Position>());
        assert!(map.storage(TypeId::of::<Health>()).is_none());
    }

    #[test]
    fn test_stats_by_type_name() {
        let mut map = test_map();
        map.create_component::<Position>(1).unwrap();
        map.create_component::<Position>(2).unwrap();
        map.remove_component::<Position>(1);

        let stats = map.stats();
        let position = stats[type_name::<Position>()];
        assert_eq!(position.len, 1);
        assert_eq!(position.pending_removals, 1);
        assert_eq!(map.component_count(), 1);
    }
}
