//! Error types for component storage and cursors

use thiserror::Error;

use crate::ecs::EntityId;

/// Failures raised by stores, the component map and cursors.
///
/// These describe caller logic errors; nothing in the crate retries them.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("entity {entity_id} already has a `{type_name}` component")]
    DuplicateComponent {
        entity_id: EntityId,
        type_name: &'static str,
    },

    #[error("entity {entity_id} has no `{type_name}` component")]
    ComponentNotFound {
        entity_id: EntityId,
        type_name: &'static str,
    },

    #[error("cursor over `{type_name}` is not positioned on an entity")]
    CursorOutOfRange { type_name: &'static str },

    #[error("component type `{0}` is not registered")]
    UnregisteredComponent(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("failed to (de)serialize `{identifier}` for entity {entity_id}: {source}")]
    Serialization {
        identifier: String,
        entity_id: EntityId,
        #[source]
        source: serde_json::Error,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;
