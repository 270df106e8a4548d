//! Parent links and per-entity active flags

use serde::{Deserialize, Serialize};

use super::component::Component;
use super::EntityId;

/// Place of an entity in the scene hierarchy.
///
/// An entity is active in the hierarchy only when it and all of its
/// ancestors are active. Entities without this component count as active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hierarchy {
    pub parent: Option<EntityId>,
    pub active: bool,
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self::root()
    }
}

impl Hierarchy {
    pub fn root() -> Self {
        Self {
            parent: None,
            active: true,
        }
    }

    pub fn child_of(parent: EntityId) -> Self {
        Self {
            parent: Some(parent),
            active: true,
        }
    }
}

impl Component for Hierarchy {}
