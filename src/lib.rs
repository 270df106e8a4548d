pub mod config;
pub mod ecs;
pub mod error;
pub mod scene;

pub use config::StorageConfig;
pub use ecs::{
    Component, ComponentIterator, ComponentMap, ComponentRegistry, ComponentSet, EntityId,
    Grouping, Hierarchy, IterFlags, MultiComponentIterator,
};
pub use error::{StorageError, StorageResult};
pub use scene::{Scene, SceneFile};
