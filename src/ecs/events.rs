//! Component lifecycle notifications

use std::any::{Any, TypeId};
use std::collections::HashMap;

use super::EntityId;

/// Raised after a component was created for an entity.
#[derive(Debug)]
pub struct ComponentAdded<'a, T> {
    pub entity_id: EntityId,
    pub component: &'a T,
}

/// Raised when a component is removed; carries the value it had before removal.
#[derive(Debug)]
pub struct ComponentRemoved<'a, T> {
    pub entity_id: EntityId,
    pub component: &'a T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EventKind {
    Added,
    Removed,
}

type Listener = Box<dyn Fn(EntityId, &dyn Any) + Send + Sync>;

/// Typed listeners keyed by component type.
///
/// Dispatch is synchronous and fire-and-forget: listeners cannot fail and
/// cannot reach back into the component map.
#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<(TypeId, EventKind), Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_added<T: 'static>(
        &mut self,
        listener: impl Fn(&ComponentAdded<'_, T>) + Send + Sync + 'static,
    ) {
        self.subscribe::<T>(EventKind::Added, move |entity_id, component| {
            listener(&ComponentAdded {
                entity_id,
                component,
            })
        });
    }

    pub fn on_removed<T: 'static>(
        &mut self,
        listener: impl Fn(&ComponentRemoved<'_, T>) + Send + Sync + 'static,
    ) {
        self.subscribe::<T>(EventKind::Removed, move |entity_id, component| {
            listener(&ComponentRemoved {
                entity_id,
                component,
            })
        });
    }

    /// Number of listeners registered for `T`.
    pub fn listener_count<T: 'static>(&self) -> usize {
        [EventKind::Added, EventKind::Removed]
            .iter()
            .filter_map(|kind| self.listeners.get(&(TypeId::of::<T>(), *kind)))
            .map(Vec::len)
            .sum()
    }

    pub(crate) fn component_added<T: 'static>(&self, entity_id: EntityId, component: &T) {
        self.dispatch::<T>(EventKind::Added, entity_id, component);
    }

    pub(crate) fn component_removed<T: 'static>(&self, entity_id: EntityId, component: &T) {
        self.dispatch::<T>(EventKind::Removed, entity_id, component);
    }

    fn subscribe<T: 'static>(
        &mut self,
        kind: EventKind,
        listener: impl Fn(EntityId, &T) + Send + Sync + 'static,
    ) {
        let erased: Listener = Box::new(move |entity_id: EntityId, component: &dyn Any| {
            if let Some(component) = component.downcast_ref::<T>() {
                listener(entity_id, component);
            }
        });
        self.listeners
            .entry((TypeId::of::<T>(), kind))
            .or_default()
            .push(erased);
    }

    fn dispatch<T: 'static>(&self, kind: EventKind, entity_id: EntityId, component: &T) {
        let Some(listeners) = self.listeners.get(&(TypeId::of::<T>(), kind)) else {
            return;
        };
        for listener in listeners {
            listener(entity_id, component as &dyn Any);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
