//! Sparse-set component store with an overflow side-store
//!
//! Every store keeps three structures:
//!
//! - `dense`: packed entries, `[0, N)` are present or pending removal,
//! - `sparse`: `entity_id - min_id` to dense index, covering the
//!   power-of-two aligned window `[min_id, max_id)`,
//! - `overflow`: entries sorted by id, for ids the window cannot cover and for
//!   inserts made while `dense` is at capacity.
//!
//! Removals are deferred: an entry is only marked and queued, and stays
//! reachable by cursors until [`ComponentSet::flush`] compacts it away.
//! Flush also migrates overflow entries into the dense/sparse layout.

use std::any::{type_name, Any, TypeId};

use bitflags::bitflags;
use serde::Serialize;

use super::component::{Component, ComponentRecord, ComponentStorage};
use super::events::EventBus;
use super::EntityId;
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};

/// Sentinel for a sparse slot with no dense entry.
const EMPTY: usize = usize::MAX;

bitflags! {
    /// Visibility of a dense entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Status: u8 {
        /// Visible to `get`/`has`.
        const RETRIEVABLE = 1 << 0;
        /// Visible to cursors.
        const ENUMERABLE = 1 << 1;
        /// Queued for compaction at the next flush.
        const MARKED_FOR_REMOVAL = 1 << 2;
        const ACTIVE = Self::RETRIEVABLE.bits() | Self::ENUMERABLE.bits();
    }
}

struct Entry<T> {
    entity_id: EntityId,
    component: T,
    status: Status,
}

/// Point-in-time layout figures of one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Retrievable components.
    pub len: usize,
    /// Dense entries, including those pending removal.
    pub dense_len: usize,
    pub capacity: usize,
    pub overflow_len: usize,
    pub pending_removals: usize,
    /// Sparse window `[min, max)`.
    pub window: (EntityId, EntityId),
}

/// Storage for every component of type `T` in one component map.
pub struct ComponentSet<T> {
    dense: Vec<Entry<T>>,
    capacity: usize,
    sparse: Vec<usize>,
    min_id: EntityId,
    max_id: EntityId,
    overflow: Vec<(EntityId, T)>,
    pending_removal: Vec<EntityId>,
    marked: usize,
    initial_window: u64,
    max_window_span: u64,
    flush_epoch: u64,
}

impl<T> ComponentSet<T> {
    /// Creates an empty store. The sparse window is placed around the first
    /// entity id ever inserted.
    pub fn new(config: &StorageConfig) -> Self {
        let config = config.clone().normalized();
        Self {
            dense: Vec::with_capacity(config.initial_capacity),
            capacity: config.initial_capacity,
            sparse: Vec::new(),
            min_id: 0,
            max_id: 0,
            overflow: Vec::new(),
            pending_removal: Vec::new(),
            marked: 0,
            initial_window: config.initial_window,
            max_window_span: config.max_window_span,
            flush_epoch: 0,
        }
    }

    /// Number of retrievable components.
    pub fn len(&self) -> usize {
        self.dense.len() - self.marked + self.overflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dense entries, including those removed this tick but not yet flushed.
    pub fn dense_len(&self) -> usize {
        self.dense.len()
    }

    pub fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    /// The sparse window `[min_id, max_id)`.
    pub fn window(&self) -> (EntityId, EntityId) {
        (self.min_id, self.max_id)
    }

    pub fn flush_epoch(&self) -> u64 {
        self.flush_epoch
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            len: self.len(),
            dense_len: self.dense.len(),
            capacity: self.capacity,
            overflow_len: self.overflow.len(),
            pending_removals: self.marked,
            window: (self.min_id, self.max_id),
        }
    }

    /// Inserts `component` for `entity_id` and returns a reference to it.
    ///
    /// An entry removed earlier in the same tick is reclaimed in place. Fails
    /// if the entity already holds a retrievable component of this type.
    pub fn insert(&mut self, entity_id: EntityId, component: T) -> StorageResult<&mut T> {
        if let Some(index) = self.slot(entity_id) {
            let entry = &mut self.dense[index];
            if entry.status.contains(Status::RETRIEVABLE) {
                return Err(Self::duplicate(entity_id));
            }
            entry.component = component;
            entry.status = Status::ACTIVE;
            self.marked -= 1;
            return Ok(&mut entry.component);
        }

        let Err(position) = self.overflow_position(entity_id) else {
            return Err(Self::duplicate(entity_id));
        };

        if !self.covers(entity_id) {
            self.grow_window(entity_id);
        }

        if self.covers(entity_id) && self.dense.len() < self.capacity {
            let index = self.dense.len();
            self.dense.push(Entry {
                entity_id,
                component,
                status: Status::ACTIVE,
            });
            let slot = self.normalize(entity_id);
            self.sparse[slot] = index;
            return Ok(&mut self.dense[index].component);
        }

        log::trace!(
            "`{}`: entity {} parked in overflow ({} entries)",
            type_name::<T>(),
            entity_id,
            self.overflow.len() + 1
        );
        self.overflow.insert(position, (entity_id, component));
        Ok(&mut self.overflow[position].1)
    }

    pub fn has(&self, entity_id: EntityId) -> bool {
        self.try_get(entity_id).is_some()
    }

    pub fn get(&self, entity_id: EntityId) -> StorageResult<&T> {
        self.try_get(entity_id)
            .ok_or_else(|| Self::not_found(entity_id))
    }

    pub fn get_mut(&mut self, entity_id: EntityId) -> StorageResult<&mut T> {
        self.try_get_mut(entity_id)
            .ok_or_else(|| Self::not_found(entity_id))
    }

    pub fn try_get(&self, entity_id: EntityId) -> Option<&T> {
        if let Some(index) = self.slot(entity_id) {
            let entry = &self.dense[index];
            return entry
                .status
                .contains(Status::RETRIEVABLE)
                .then_some(&entry.component);
        }
        self.overflow_position(entity_id)
            .ok()
            .map(|position| &self.overflow[position].1)
    }

    pub fn try_get_mut(&mut self, entity_id: EntityId) -> Option<&mut T> {
        if let Some(index) = self.slot(entity_id) {
            let entry = &mut self.dense[index];
            return if entry.status.contains(Status::RETRIEVABLE) {
                Some(&mut entry.component)
            } else {
                None
            };
        }
        match self.overflow_position(entity_id) {
            Ok(position) => Some(&mut self.overflow[position].1),
            Err(_) => None,
        }
    }

    /// Component of an entity a cursor may be parked on: unlike
    /// [`try_get`](Self::try_get) this still returns entries removed this tick.
    pub fn get_enumerable(&self, entity_id: EntityId) -> Option<&T> {
        match self.slot(entity_id) {
            Some(index) => {
                let entry = &self.dense[index];
                entry
                    .status
                    .contains(Status::ENUMERABLE)
                    .then_some(&entry.component)
            }
            None => self.try_get(entity_id),
        }
    }

    pub fn get_enumerable_mut(&mut self, entity_id: EntityId) -> Option<&mut T> {
        match self.slot(entity_id) {
            Some(index) => {
                let entry = &mut self.dense[index];
                if entry.status.contains(Status::ENUMERABLE) {
                    Some(&mut entry.component)
                } else {
                    None
                }
            }
            None => self.try_get_mut(entity_id),
        }
    }

    /// Removes the component of `entity_id`.
    pub fn remove(&mut self, entity_id: EntityId) -> bool {
        self.remove_with(entity_id, |_, _| {})
    }

    /// Removes the component of `entity_id`, handing its last value to
    /// `on_removed` first.
    ///
    /// Windowed entries are only marked and queued; they keep their slot and
    /// stay enumerable until the next flush. Overflow entries are dropped
    /// immediately.
    pub fn remove_with(
        &mut self,
        entity_id: EntityId,
        on_removed: impl FnOnce(EntityId, &T),
    ) -> bool {
        if let Some(index) = self.slot(entity_id) {
            let entry = &mut self.dense[index];
            if !entry.status.contains(Status::RETRIEVABLE) {
                return false;
            }
            on_removed(entity_id, &entry.component);
            entry.status.remove(Status::RETRIEVABLE);
            entry.status.insert(Status::MARKED_FOR_REMOVAL);
            self.pending_removal.push(entity_id);
            self.marked += 1;
            return true;
        }

        match self.overflow_position(entity_id) {
            Ok(position) => {
                let (entity_id, component) = self.overflow.remove(position);
                on_removed(entity_id, &component);
                true
            }
            Err(_) => false,
        }
    }

    /// Commits the tick's structural changes.
    ///
    /// Compacts entries pending removal, grows the dense capacity to fit the
    /// overflow store and migrates overflow entries into the window. Entries
    /// whose ids cannot be covered stay in overflow.
    pub fn flush(&mut self) {
        let pending = std::mem::take(&mut self.pending_removal);
        let mut compacted = 0usize;
        for entity_id in pending {
            let Some(index) = self.slot(entity_id) else {
                continue;
            };
            if !self.dense[index].status.contains(Status::MARKED_FOR_REMOVAL) {
                // reclaimed by an insert after the removal
                continue;
            }
            self.dense.swap_remove(index);
            let slot = self.normalize(entity_id);
            self.sparse[slot] = EMPTY;
            if let Some(moved) = self.dense.get(index) {
                let slot = self.normalize(moved.entity_id);
                self.sparse[slot] = index;
            }
            compacted += 1;
        }
        self.marked = 0;

        let required = self.dense.len() + self.overflow.len();
        if required > self.capacity {
            self.capacity = required.next_power_of_two();
            self.dense.reserve(self.capacity - self.dense.len());
        }

        let overflow = std::mem::take(&mut self.overflow);
        let mut migrated = 0usize;
        for (entity_id, component) in overflow {
            if self.covers(entity_id) || self.grow_window(entity_id) {
                let index = self.dense.len();
                self.dense.push(Entry {
                    entity_id,
                    component,
                    status: Status::ACTIVE,
                });
                let slot = self.normalize(entity_id);
                self.sparse[slot] = index;
                migrated += 1;
            } else {
                self.overflow.push((entity_id, component));
            }
        }

        self.flush_epoch += 1;
        if compacted > 0 || migrated > 0 {
            log::debug!(
                "`{}` flushed: {} compacted, {} migrated, {} left in overflow",
                type_name::<T>(),
                compacted,
                migrated,
                self.overflow.len()
            );
        }
    }

    /// Drops every component, keeping the current window and capacity.
    pub fn clear(&mut self) {
        self.dense.clear();
        self.sparse.fill(EMPTY);
        self.overflow.clear();
        self.pending_removal.clear();
        self.marked = 0;
        self.flush_epoch += 1;
    }

    /// Retrievable components in storage order, dense first then overflow.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.dense
            .iter()
            .filter(|entry| entry.status.contains(Status::RETRIEVABLE))
            .map(|entry| (entry.entity_id, &entry.component))
            .chain(self.overflow.iter().map(|(id, component)| (*id, component)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut T)> {
        self.dense
            .iter_mut()
            .filter(|entry| entry.status.contains(Status::RETRIEVABLE))
            .map(|entry| (entry.entity_id, &mut entry.component))
            .chain(
                self.overflow
                    .iter_mut()
                    .map(|(id, component)| (*id, component)),
            )
    }

    /// Retrievable entity ids in increasing order.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.iter().map(|(id, _)| id).collect();
        ids.sort_unstable();
        ids
    }

    /// Smallest enumerable entity id strictly after `after`, looking at both
    /// the sparse window and the overflow store.
    pub fn next_enumerable_after(&self, after: Option<EntityId>) -> Option<EntityId> {
        let overflow = self.next_overflow_after(after);
        let windowed = self.next_windowed_after(after, overflow);
        match (windowed, overflow) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Smallest overflow entity id strictly after `after`.
    pub fn next_overflow_after(&self, after: Option<EntityId>) -> Option<EntityId> {
        let position = match after {
            Some(after) => self.overflow.partition_point(|(id, _)| *id <= after),
            None => 0,
        };
        self.overflow.get(position).map(|(id, _)| *id)
    }

    /// Sparse scan for the next enumerable slot, stopping before `limit`.
    fn next_windowed_after(
        &self,
        after: Option<EntityId>,
        limit: Option<EntityId>,
    ) -> Option<EntityId> {
        let start = match after {
            Some(id) if id >= self.min_id => {
                usize::try_from(id - self.min_id).ok()?.checked_add(1)?
            }
            _ => 0,
        };
        let end = match limit {
            Some(id) if id < self.max_id => id.saturating_sub(self.min_id) as usize,
            _ => self.sparse.len(),
        };
        self.sparse
            .get(start..end.max(start))?
            .iter()
            .position(|&index| {
                index != EMPTY && self.dense[index].status.contains(Status::ENUMERABLE)
            })
            .map(|offset| self.min_id + (start + offset) as u64)
    }

    pub fn dense_entry(&self, index: usize) -> Option<(EntityId, Status)> {
        self.dense
            .get(index)
            .map(|entry| (entry.entity_id, entry.status))
    }

    fn covers(&self, entity_id: EntityId) -> bool {
        entity_id >= self.min_id && entity_id < self.max_id
    }

    fn normalize(&self, entity_id: EntityId) -> usize {
        (entity_id - self.min_id) as usize
    }

    fn slot(&self, entity_id: EntityId) -> Option<usize> {
        if !self.covers(entity_id) {
            return None;
        }
        let index = self.sparse[self.normalize(entity_id)];
        (index != EMPTY).then_some(index)
    }

    fn overflow_position(&self, entity_id: EntityId) -> Result<usize, usize> {
        self.overflow.binary_search_by_key(&entity_id, |(id, _)| *id)
    }

    /// Smallest power-of-two aligned window covering both the current window
    /// and `entity_id`, or `None` if it would exceed `max_window_span`.
    fn covering_window(&self, entity_id: EntityId) -> Option<(EntityId, EntityId)> {
        let end = entity_id.checked_add(1)?;
        let (low, high) = if self.sparse.is_empty() {
            (entity_id, end)
        } else {
            (self.min_id.min(entity_id), self.max_id.max(end))
        };

        let mut span = (self.max_id - self.min_id)
            .max(self.initial_window)
            .checked_next_power_of_two()?;
        loop {
            if span > self.max_window_span {
                return None;
            }
            let base = low - low % span;
            let limit = base.checked_add(span)?;
            if limit >= high {
                return Some((base, limit));
            }
            span = span.checked_mul(2)?;
        }
    }

    /// Grows (and if needed rebases) the sparse window to cover `entity_id`.
    fn grow_window(&mut self, entity_id: EntityId) -> bool {
        let Some((min_id, max_id)) = self.covering_window(entity_id) else {
            return false;
        };
        let old_len = self.sparse.len();
        let shift = if old_len == 0 {
            0
        } else {
            (self.min_id - min_id) as usize
        };

        self.sparse.resize((max_id - min_id) as usize, EMPTY);
        if shift > 0 {
            self.sparse.copy_within(0..old_len, shift);
            self.sparse[..shift].fill(EMPTY);
        }

        log::debug!(
            "`{}` window [{}, {}) -> [{}, {})",
            type_name::<T>(),
            self.min_id,
            self.max_id,
            min_id,
            max_id
        );
        self.min_id = min_id;
        self.max_id = max_id;
        true
    }

    fn duplicate(entity_id: EntityId) -> StorageError {
        StorageError::DuplicateComponent {
            entity_id,
            type_name: type_name::<T>(),
        }
    }

    fn not_found(entity_id: EntityId) -> StorageError {
        StorageError::ComponentNotFound {
            entity_id,
            type_name: type_name::<T>(),
        }
    }
}

impl<T: Component> ComponentStorage for ComponentSet<T> {
    fn component_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn has(&self, entity_id: EntityId) -> bool {
        ComponentSet::has(self, entity_id)
    }

    fn remove(&mut self, entity_id: EntityId, events: &EventBus) -> bool {
        self.remove_with(entity_id, |entity_id, component| {
            events.component_removed(entity_id, component)
        })
    }

    fn flush(&mut self) {
        ComponentSet::flush(self)
    }

    fn clear(&mut self) {
        ComponentSet::clear(self)
    }

    fn len(&self) -> usize {
        ComponentSet::len(self)
    }

    fn stats(&self) -> StoreStats {
        ComponentSet::stats(self)
    }

    fn flush_epoch(&self) -> u64 {
        self.flush_epoch
    }

    fn next_enumerable_after(&self, after: Option<EntityId>) -> Option<EntityId> {
        ComponentSet::next_enumerable_after(self, after)
    }

    fn next_overflow_after(&self, after: Option<EntityId>) -> Option<EntityId> {
        ComponentSet::next_overflow_after(self, after)
    }

    fn dense_entry(&self, index: usize) -> Option<(EntityId, Status)> {
        ComponentSet::dense_entry(self, index)
    }

    fn component_any(&self, entity_id: EntityId) -> Option<&dyn Any> {
        self.get_enumerable(entity_id)
            .map(|component| component as &dyn Any)
    }

    fn save(&self, identifier: &str) -> StorageResult<Vec<ComponentRecord>> {
        let mut records = self
            .iter()
            .map(|(entity_id, component)| {
                serde_json::to_value(component)
                    .map(|value| ComponentRecord {
                        entity: entity_id,
                        value,
                    })
                    .map_err(|source| StorageError::Serialization {
                        identifier: identifier.to_string(),
                        entity_id,
                        source,
                    })
            })
            .collect::<StorageResult<Vec<_>>>()?;
        records.sort_by_key(|record| record.entity);
        Ok(records)
    }

    fn load(&mut self, identifier: &str, records: Vec<ComponentRecord>) -> StorageResult<usize> {
        let count = records.len();
        for record in records {
            let component: T = serde_json::from_value(record.value).map_err(|source| {
                StorageError::Serialization {
                    identifier: identifier.to_string(),
                    entity_id: record.entity,
                    source,
                }
            })?;
            self.insert(record.entity, component)?;
        }
        Ok(count)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
