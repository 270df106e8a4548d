//! Component storage
//!
//! Hybrid sparse-set stores (one per component type), the map that routes
//! operations to them, and the cursors that walk them.

pub mod component;
pub mod component_map;
pub mod component_set;
pub mod cursor;
pub mod entity;
pub mod events;
pub mod hierarchy;
pub mod multi_iter;
pub mod registry;

pub use component::{Component, ComponentRecord, ComponentStorage};
pub use component_map::ComponentMap;
pub use component_set::{ComponentSet, Status, StoreStats};
pub use cursor::{ComponentIterator, Cursor, IterFlags};
pub use entity::{EntityAllocator, EntityId};
pub use events::{ComponentAdded, ComponentRemoved, EventBus};
pub use hierarchy::Hierarchy;
pub use multi_iter::{Grouping, MultiComponentIterator};
pub use registry::{ComponentDescriptor, ComponentRegistration, ComponentRegistry, Initializer};
