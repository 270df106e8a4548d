//! Component trait and the type-erased storage interface

use std::any::{Any, TypeId};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::component_set::{Status, StoreStats};
use super::events::EventBus;
use super::EntityId;
use crate::error::StorageResult;

/// Trait for components
///
/// Components are plain values: a default is used when one is created without
/// an initializer, and serde support backs scene persistence.
pub trait Component: Default + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// One persisted component: the owning entity and the component's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub entity: EntityId,
    pub value: serde_json::Value,
}

/// Type-erased component storage
///
/// Implemented by [`ComponentSet`](super::ComponentSet) for every
/// [`Component`]. The component map and the cursors only talk to stores
/// through this trait.
pub trait ComponentStorage: Send + Sync {
    fn component_type(&self) -> TypeId;
    fn type_name(&self) -> &'static str;

    fn has(&self, entity_id: EntityId) -> bool;
    /// Removes the entity's component, notifying `events` with the value it
    /// had. Returns `false` if the entity had none.
    fn remove(&mut self, entity_id: EntityId, events: &EventBus) -> bool;
    fn flush(&mut self);
    fn clear(&mut self);
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn stats(&self) -> StoreStats;

    /// Number of flushes this store has gone through.
    fn flush_epoch(&self) -> u64;
    /// Smallest enumerable entity strictly after `after`, overflow included.
    fn next_enumerable_after(&self, after: Option<EntityId>) -> Option<EntityId>;
    fn next_overflow_after(&self, after: Option<EntityId>) -> Option<EntityId>;
    fn dense_entry(&self, index: usize) -> Option<(EntityId, Status)>;
    fn component_any(&self, entity_id: EntityId) -> Option<&dyn Any>;

    fn save(&self, identifier: &str) -> StorageResult<Vec<ComponentRecord>>;
    fn load(&mut self, identifier: &str, records: Vec<ComponentRecord>) -> StorageResult<usize>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
