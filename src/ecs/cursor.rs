//! Single-type cursors
//!
//! A cursor is plain position state: it never borrows the map, so callers may
//! create and remove components between steps. Every call that reads the
//! store takes the [`ComponentMap`] explicitly.

use std::any::{type_name, Any, TypeId};
use std::marker::PhantomData;

use bitflags::bitflags;

use super::component::{Component, ComponentStorage};
use super::component_map::ComponentMap;
use super::component_set::Status;
use super::EntityId;
use crate::error::{StorageError, StorageResult};

bitflags! {
    /// Traversal options for cursors.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IterFlags: u8 {
        /// Walk entity ids in increasing order instead of storage order.
        const ORDERED = 1 << 0;
        /// Also yield entities that are inactive in the hierarchy.
        const INCLUDE_INACTIVE = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    NotStarted,
    Positioned {
        entity_id: EntityId,
        // `None` for ordered walks and for the overflow tail of unordered walks
        dense_index: Option<usize>,
    },
    Finished,
}

/// Untyped cursor over one component store.
#[derive(Debug, Clone)]
pub struct Cursor {
    type_id: TypeId,
    type_name: &'static str,
    flags: IterFlags,
    state: CursorState,
    bound_epoch: Option<u64>,
}

impl Cursor {
    pub fn new(type_id: TypeId, type_name: &'static str, flags: IterFlags) -> Self {
        Self {
            type_id,
            type_name,
            flags,
            state: CursorState::NotStarted,
            bound_epoch: None,
        }
    }

    /// Rewinds the cursor. An unordered cursor is also bound to the store's
    /// current flush epoch and finishes if a flush happens before it is
    /// advanced again. A store that does not exist yet is bound on `next`.
    pub fn reset(&mut self, map: &ComponentMap) {
        self.state = CursorState::NotStarted;
        self.bound_epoch = if self.flags.contains(IterFlags::ORDERED) {
            None
        } else {
            map.storage(self.type_id).map(|store| store.flush_epoch())
        };
    }

    /// Advances to the next matching entity. Returns `false` once exhausted;
    /// the cursor then stays finished until reset.
    pub fn next(&mut self, map: &ComponentMap) -> bool {
        if self.is_finished() {
            return false;
        }
        let Some(store) = map.storage(self.type_id) else {
            self.state = CursorState::Finished;
            return false;
        };

        let epoch = store.flush_epoch();
        let next = if self.flags.contains(IterFlags::ORDERED) {
            self.next_ordered(store, map)
        } else {
            match self.bound_epoch {
                None => self.bound_epoch = Some(epoch),
                Some(bound) if bound != epoch => {
                    log::warn!(
                        "Unordered cursor over `{}` outlived a flush; reset it before reuse",
                        self.type_name
                    );
                    self.state = CursorState::Finished;
                    return false;
                }
                Some(_) => {}
            }
            self.next_unordered(store, map)
        };

        match next {
            Some(state) => {
                self.state = state;
                true
            }
            None => {
                self.state = CursorState::Finished;
                false
            }
        }
    }

    fn next_ordered(
        &self,
        store: &dyn ComponentStorage,
        map: &ComponentMap,
    ) -> Option<CursorState> {
        let mut after = self.position();
        loop {
            let entity_id = store.next_enumerable_after(after)?;
            if self.accepts(map, entity_id) {
                return Some(CursorState::Positioned {
                    entity_id,
                    dense_index: None,
                });
            }
            after = Some(entity_id);
        }
    }

    fn next_unordered(
        &self,
        store: &dyn ComponentStorage,
        map: &ComponentMap,
    ) -> Option<CursorState> {
        let (start, mut after) = match self.state {
            CursorState::Positioned {
                dense_index: Some(index),
                ..
            } => (Some(index + 1), None),
            CursorState::Positioned {
                entity_id,
                dense_index: None,
            } => (None, Some(entity_id)),
            _ => (Some(0), None),
        };

        if let Some(mut index) = start {
            while let Some((entity_id, status)) = store.dense_entry(index) {
                if status.contains(Status::ENUMERABLE) && self.accepts(map, entity_id) {
                    return Some(CursorState::Positioned {
                        entity_id,
                        dense_index: Some(index),
                    });
                }
                index += 1;
            }
        }

        while let Some(entity_id) = store.next_overflow_after(after) {
            if self.accepts(map, entity_id) {
                return Some(CursorState::Positioned {
                    entity_id,
                    dense_index: None,
                });
            }
            after = Some(entity_id);
        }
        None
    }

    fn accepts(&self, map: &ComponentMap, entity_id: EntityId) -> bool {
        self.flags.contains(IterFlags::INCLUDE_INACTIVE) || map.is_active_in_hierarchy(entity_id)
    }

    /// Entity the cursor is parked on.
    pub fn entity_id(&self) -> StorageResult<EntityId> {
        self.position().ok_or(StorageError::CursorOutOfRange {
            type_name: self.type_name,
        })
    }

    pub fn position(&self) -> Option<EntityId> {
        match self.state {
            CursorState::Positioned { entity_id, .. } => Some(entity_id),
            _ => None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.state != CursorState::NotStarted
    }

    pub fn is_finished(&self) -> bool {
        self.state == CursorState::Finished
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn flags(&self) -> IterFlags {
        self.flags
    }

    /// Type-erased component under the cursor.
    pub fn component_any<'m>(&self, map: &'m ComponentMap) -> StorageResult<&'m dyn Any> {
        let entity_id = self.entity_id()?;
        map.storage(self.type_id)
            .and_then(|store| store.component_any(entity_id))
            .ok_or(StorageError::ComponentNotFound {
                entity_id,
                type_name: self.type_name,
            })
    }
}

/// Typed cursor over every component of type `T`.
#[derive(Debug, Clone)]
pub struct ComponentIterator<T> {
    cursor: Cursor,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> ComponentIterator<T> {
    pub fn new(flags: IterFlags) -> Self {
        Self {
            cursor: Cursor::new(TypeId::of::<T>(), type_name::<T>(), flags),
            _marker: PhantomData,
        }
    }

    pub fn reset(&mut self, map: &ComponentMap) {
        self.cursor.reset(map);
    }

    pub fn next(&mut self, map: &ComponentMap) -> bool {
        self.cursor.next(map)
    }

    pub fn entity_id(&self) -> StorageResult<EntityId> {
        self.cursor.entity_id()
    }

    /// Component under the cursor. Still readable if it was removed after the
    /// cursor reached it, until the next flush.
    pub fn component<'m>(&self, map: &'m ComponentMap) -> StorageResult<&'m T> {
        let entity_id = self.cursor.entity_id()?;
        map.store::<T>()
            .and_then(|store| store.get_enumerable(entity_id))
            .ok_or(StorageError::ComponentNotFound {
                entity_id,
                type_name: type_name::<T>(),
            })
    }

    pub fn component_mut<'m>(&self, map: &'m mut ComponentMap) -> StorageResult<&'m mut T> {
        let entity_id = self.cursor.entity_id()?;
        map.store_mut::<T>()
            .and_then(|store| store.get_enumerable_mut(entity_id))
            .ok_or(StorageError::ComponentNotFound {
                entity_id,
                type_name: type_name::<T>(),
            })
    }

    /// Another component of the entity under the cursor.
    pub fn co_component<'m, U: Component>(&self, map: &'m ComponentMap) -> StorageResult<&'m U> {
        map.get_component::<U>(self.cursor.entity_id()?)
    }

    pub fn has_co_component<U: Component>(&self, map: &ComponentMap) -> bool {
        self.cursor
            .position()
            .is_some_and(|entity_id| map.has_component::<U>(entity_id))
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{ComponentRegistry, Hierarchy};
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Tag(u32);
    impl Component for Tag {}

    fn test_registry() -> Arc<ComponentRegistry> {
        let mut registry = ComponentRegistry::new();
        registry.register::<Tag>("Tag");
        Arc::new(registry)
    }

    fn test_map() -> ComponentMap {
        ComponentMap::new(test_registry())
    }

    fn collect(map: &ComponentMap, flags: IterFlags) -> Vec<EntityId> {
        let mut iter = map.create_iterator::<Tag>(flags);
        let mut ids = Vec::new();
        while iter.next(map) {
            ids.push(iter.entity_id().unwrap());
        }
        ids
    }

    #[test]
    fn test_ordered_after_flush() {
        let mut map = test_map();
        for id in [3, 1, 4] {
            map.create_component::<Tag>(id).unwrap();
        }
        map.flush();

        assert_eq!(collect(&map, IterFlags::ORDERED), vec![1, 3, 4]);

        let mut unordered = collect(&map, IterFlags::empty());
        unordered.sort_unstable();
        assert_eq!(unordered, vec![1, 3, 4]);
    }

    #[test]
    fn test_not_positioned_errors() {
        let mut map = test_map();
        map.create_component::<Tag>(1).unwrap();

        let mut iter = map.create_iterator::<Tag>(IterFlags::ORDERED);
        assert!(matches!(
            iter.entity_id(),
            Err(StorageError::CursorOutOfRange { .. })
        ));
        assert!(iter.component(&map).is_err());

        assert!(iter.next(&map));
        assert!(!iter.next(&map));
        assert!(iter.cursor().is_finished());
        assert!(!iter.next(&map));
        assert!(iter.entity_id().is_err());
    }

    #[test]
    fn test_missing_store_finishes_then_rebinds() {
        let mut map = test_map();
        let mut iter = map.create_iterator::<Tag>(IterFlags::ORDERED);
        assert!(!iter.next(&map));

        map.create_component::<Tag>(9).unwrap();
        iter.reset(&map);
        assert!(iter.next(&map));
        assert_eq!(iter.entity_id().unwrap(), 9);
    }

    #[test]
    fn test_removed_entity_still_reached_before_flush() {
        let mut map = test_map();
        for id in 1..=5 {
            map.create_component::<Tag>(id).unwrap().0 = id as u32;
        }
        map.flush();

        let mut iter = map.create_iterator::<Tag>(IterFlags::ORDERED);
        assert!(iter.next(&map));
        assert_eq!(iter.entity_id().unwrap(), 1);

        map.remove_component::<Tag>(5);
        assert!(!map.has_component::<Tag>(5));

        let mut seen = vec![1];
        while iter.next(&map) {
            seen.push(iter.entity_id().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);

        let before = map.store::<Tag>().unwrap().dense_len();
        map.flush();
        assert_eq!(map.store::<Tag>().unwrap().dense_len(), before - 1);
        assert!(!map.has_component::<Tag>(5));
    }

    #[test]
    fn test_ordered_survives_flush_and_window_shift() {
        let mut map = test_map();
        for id in [100, 101, 102] {
            map.create_component::<Tag>(id).unwrap();
        }
        map.flush();

        let mut iter = map.create_iterator::<Tag>(IterFlags::ORDERED);
        assert!(iter.next(&map));
        assert_eq!(iter.entity_id().unwrap(), 100);

        map.remove_component::<Tag>(101);
        map.create_component::<Tag>(2).unwrap();
        map.flush();

        assert!(iter.next(&map));
        assert_eq!(iter.entity_id().unwrap(), 102);
        assert!(!iter.next(&map));
    }

    #[test]
    fn test_unordered_finishes_after_flush() {
        let mut map = test_map();
        for id in 0..3 {
            map.create_component::<Tag>(id).unwrap();
        }
        map.flush();

        let mut iter = map.create_iterator::<Tag>(IterFlags::empty());
        assert!(iter.next(&map));
        map.flush();
        assert!(!iter.next(&map));

        iter.reset(&map);
        assert!(iter.next(&map));
    }

    #[test]
    fn test_unordered_reset_before_flush_finishes() {
        let mut map = test_map();
        for id in 0..3 {
            map.create_component::<Tag>(id).unwrap();
        }
        map.flush();

        let mut unordered = map.create_iterator::<Tag>(IterFlags::empty());
        let mut ordered = map.create_iterator::<Tag>(IterFlags::ORDERED);
        map.flush();

        assert!(!unordered.next(&map));
        assert!(unordered.cursor().is_finished());
        assert!(ordered.next(&map));
        assert_eq!(ordered.entity_id().unwrap(), 0);

        unordered.reset(&map);
        assert!(unordered.next(&map));
    }

    #[test]
    fn test_unordered_binds_store_created_after_reset() {
        let mut map = test_map();
        let mut iter = map.create_iterator::<Tag>(IterFlags::empty());
        map.create_component::<Tag>(4).unwrap();
        map.flush();

        assert!(iter.next(&map));
        assert_eq!(iter.entity_id().unwrap(), 4);
        map.flush();
        assert!(!iter.next(&map));
    }

    #[test]
    fn test_unordered_reaches_overflow_within_tick() {
        let config = crate::config::StorageConfig {
            initial_capacity: 2,
            ..crate::config::StorageConfig::default()
        };
        let mut map = ComponentMap::with_config(test_registry(), config);
        for id in [7, 3, 5] {
            map.create_component::<Tag>(id).unwrap();
        }
        let stats = map.store::<Tag>().unwrap().stats();
        assert_eq!(stats.dense_len, 2);
        assert_eq!(stats.overflow_len, 1);

        let mut unordered = collect(&map, IterFlags::empty());
        assert_eq!(unordered.last(), Some(&5));
        unordered.sort_unstable();
        assert_eq!(unordered, vec![3, 5, 7]);
        assert_eq!(collect(&map, IterFlags::ORDERED), vec![3, 5, 7]);
    }

    #[test]
    fn test_inactive_entities_filtered() {
        let mut map = test_map();
        for id in 1..=3 {
            map.create_component::<Tag>(id).unwrap();
        }
        map.create_component::<Hierarchy>(2).unwrap().active = false;
        map.flush();

        assert_eq!(collect(&map, IterFlags::ORDERED), vec![1, 3]);
        assert_eq!(
            collect(&map, IterFlags::ORDERED | IterFlags::INCLUDE_INACTIVE),
            vec![1, 2, 3]
        );

        let mut unordered = collect(&map, IterFlags::empty());
        unordered.sort_unstable();
        assert_eq!(unordered, vec![1, 3]);

        let mut unordered = collect(&map, IterFlags::INCLUDE_INACTIVE);
        unordered.sort_unstable();
        assert_eq!(unordered, vec![1, 2, 3]);
    }

    #[test]
    fn test_component_access_through_cursor() {
        let mut map = test_map();
        map.create_component::<Tag>(1).unwrap().0 = 10;
        map.create_component::<Hierarchy>(1).unwrap();
        map.create_component::<Tag>(2).unwrap().0 = 20;

        let mut iter = map.create_iterator::<Tag>(IterFlags::ORDERED);
        while iter.next(&map) {
            iter.component_mut(&mut map).unwrap().0 += 1;
        }

        assert_eq!(map.get_component::<Tag>(1).unwrap(), &Tag(11));
        assert_eq!(map.get_component::<Tag>(2).unwrap(), &Tag(21));

        iter.reset(&map);
        assert!(iter.next(&map));
        assert!(iter.has_co_component::<Hierarchy>(&map));
        assert!(iter.co_component::<Hierarchy>(&map).is_ok());
        assert!(iter.next(&map));
        assert!(!iter.has_co_component::<Hierarchy>(&map));
        assert!(iter.co_component::<Hierarchy>(&map).is_err());

        let value = iter.cursor().component_any(&map).unwrap();
        assert_eq!(value.downcast_ref::<Tag>(), Some(&Tag(21)));
    }

    #[test]
    fn test_create_iterator_dyn_requires_registration() {
        let map = test_map();
        assert!(map
            .create_iterator_dyn(TypeId::of::<Tag>(), IterFlags::ORDERED)
            .is_ok());
        assert!(matches!(
            map.create_iterator_dyn(TypeId::of::<u64>(), IterFlags::ORDERED),
            Err(StorageError::UnregisteredComponent(_))
        ));
    }
}
