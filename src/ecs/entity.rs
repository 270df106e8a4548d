//! Entity management

use std::collections::BTreeSet;

/// Entity ID type - opaque 64-bit key, carries no data of its own
pub type EntityId = u64;

/// Hands out entity ids for a scene and recycles released ones.
///
/// Recycled ids are reused lowest-first so stores keep a compact sparse
/// window.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    next_id: EntityId,
    free: BTreeSet<EntityId>,
    alive: BTreeSet<EntityId>,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> EntityId {
        let id = match self.free.pop_first() {
            Some(id) => id,
            None => {
                // skip ids reserved ahead of the counter
                while self.alive.contains(&self.next_id) {
                    self.next_id += 1;
                }
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };
        self.alive.insert(id);
        id
    }

    /// Marks an externally chosen id as alive, e.g. when loading a scene.
    pub fn reserve(&mut self, id: EntityId) {
        if self.alive.insert(id) {
            self.free.remove(&id);
        }
    }

    pub fn deallocate(&mut self, id: EntityId) -> bool {
        if self.alive.remove(&id) {
            self.free.insert(id);
            true
        } else {
            false
        }
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.alive.contains(&id)
    }

    pub fn count(&self) -> usize {
        self.alive.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.alive.iter().copied()
    }
}
