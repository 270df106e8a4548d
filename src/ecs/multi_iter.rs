//! Multi-type cursors: AND / OR merge joins over ordered single-type cursors

use std::any::{type_name, TypeId};

use super::component::Component;
use super::component_map::ComponentMap;
use super::cursor::{Cursor, IterFlags};
use super::EntityId;
use crate::error::{StorageError, StorageResult};

/// How sub-cursors are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    /// Entities holding every listed type.
    All,
    /// Entities holding at least one listed type.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MultiState {
    NotStarted,
    Positioned(EntityId),
    Finished,
}

/// Cursor over the entities matching a set of component types, in increasing
/// entity id order.
#[derive(Debug, Clone)]
pub struct MultiComponentIterator {
    grouping: Grouping,
    cursors: Vec<Cursor>,
    state: MultiState,
}

impl MultiComponentIterator {
    /// Builds a cursor over `types`, which must be non-empty, registered and
    /// free of duplicates. Sub-cursors always walk in id order.
    pub fn new(
        map: &ComponentMap,
        grouping: Grouping,
        types: &[TypeId],
        flags: IterFlags,
    ) -> StorageResult<Self> {
        if types.is_empty() {
            return Err(StorageError::InvalidQuery(
                "a multi-type cursor needs at least one component type".to_string(),
            ));
        }

        let mut cursors: Vec<Cursor> = Vec::with_capacity(types.len());
        for &type_id in types {
            let descriptor = map.registry().descriptor(type_id).ok_or_else(|| {
                StorageError::InvalidQuery(format!(
                    "component type {:?} is not registered",
                    type_id
                ))
            })?;
            if cursors.iter().any(|cursor| cursor.type_id() == type_id) {
                return Err(StorageError::InvalidQuery(format!(
                    "component type `{}` is listed twice",
                    descriptor.type_name()
                )));
            }
            cursors.push(Cursor::new(
                type_id,
                descriptor.type_name(),
                flags | IterFlags::ORDERED,
            ));
        }

        Ok(Self {
            grouping,
            cursors,
            state: MultiState::NotStarted,
        })
    }

    pub fn reset(&mut self, map: &ComponentMap) {
        for cursor in &mut self.cursors {
            cursor.reset(map);
        }
        self.state = MultiState::NotStarted;
    }

    /// Advances to the next matching entity. Returns `false` once exhausted.
    pub fn next(&mut self, map: &ComponentMap) -> bool {
        if self.state == MultiState::Finished {
            return false;
        }
        let next = match self.grouping {
            Grouping::All => self.next_all(map),
            Grouping::Any => self.next_any(map),
        };
        self.state = match next {
            Some(entity_id) => MultiState::Positioned(entity_id),
            None => MultiState::Finished,
        };
        next.is_some()
    }

    fn next_all(&mut self, map: &ComponentMap) -> Option<EntityId> {
        let mut highest = 0;
        for cursor in &mut self.cursors {
            if !cursor.next(map) {
                return None;
            }
            highest = highest.max(cursor.position()?);
        }

        loop {
            let mut agreed = true;
            for cursor in &mut self.cursors {
                while cursor.position()? < highest {
                    if !cursor.next(map) {
                        return None;
                    }
                }
                let position = cursor.position()?;
                if position > highest {
                    highest = position;
                    agreed = false;
                }
            }
            if agreed {
                return Some(highest);
            }
        }
    }

    fn next_any(&mut self, map: &ComponentMap) -> Option<EntityId> {
        let last = match self.state {
            MultiState::Positioned(entity_id) => Some(entity_id),
            _ => None,
        };

        for cursor in &mut self.cursors {
            if !cursor.is_started() {
                cursor.next(map);
            }
            if let Some(last) = last {
                while cursor.position().is_some_and(|position| position <= last) {
                    if !cursor.next(map) {
                        break;
                    }
                }
            }
        }

        self.cursors.iter().filter_map(Cursor::position).min()
    }

    pub fn entity_id(&self) -> StorageResult<EntityId> {
        match self.state {
            MultiState::Positioned(entity_id) => Ok(entity_id),
            _ => Err(StorageError::CursorOutOfRange {
                type_name: "multi-type cursor",
            }),
        }
    }

    /// Whether the sub-cursor of `T` is parked on the current entity.
    pub fn has<T: Component>(&self) -> bool {
        self.has_type(TypeId::of::<T>())
    }

    pub fn has_type(&self, type_id: TypeId) -> bool {
        let MultiState::Positioned(entity_id) = self.state else {
            return false;
        };
        self.cursors
            .iter()
            .any(|cursor| cursor.type_id() == type_id && cursor.position() == Some(entity_id))
    }

    pub fn get<'m, T: Component>(&self, map: &'m ComponentMap) -> StorageResult<&'m T> {
        let entity_id = self.current::<T>()?;
        map.store::<T>()
            .and_then(|store| store.get_enumerable(entity_id))
            .ok_or(StorageError::ComponentNotFound {
                entity_id,
                type_name: type_name::<T>(),
            })
    }

    pub fn get_mut<'m, T: Component>(&self, map: &'m mut ComponentMap) -> StorageResult<&'m mut T> {
        let entity_id = self.current::<T>()?;
        map.store_mut::<T>()
            .and_then(|store| store.get_enumerable_mut(entity_id))
            .ok_or(StorageError::ComponentNotFound {
                entity_id,
                type_name: type_name::<T>(),
            })
    }

    pub fn grouping(&self) -> Grouping {
        self.grouping
    }

    pub fn is_finished(&self) -> bool {
        self.state == MultiState::Finished
    }

    fn current<T: Component>(&self) -> StorageResult<EntityId> {
        let entity_id = self.entity_id()?;
        if self.has::<T>() {
            Ok(entity_id)
        } else {
            Err(StorageError::ComponentNotFound {
                entity_id,
                type_name: type_name::<T>(),
            })
        }
    }
}
