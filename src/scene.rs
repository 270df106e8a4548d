//! Scenes: an entity allocator plus a component map, persisted as JSON

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::ecs::{ComponentMap, ComponentRecord, ComponentRegistry, EntityAllocator, EntityId};
use crate::error::StorageResult;

/// On-disk form of a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneFile {
    pub name: String,
    pub saved_at: DateTime<Utc>,
    /// Every allocated entity, including ones without components.
    #[serde(default)]
    pub entities: Vec<EntityId>,
    /// Component records keyed by registry identifier.
    pub components: BTreeMap<String, Vec<ComponentRecord>>,
}

/// Entities and their components.
#[derive(Debug)]
pub struct Scene {
    name: String,
    entities: EntityAllocator,
    components: ComponentMap,
}

impl Scene {
    pub fn new(name: impl Into<String>, registry: Arc<ComponentRegistry>) -> Self {
        Self::with_config(name, registry, StorageConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        registry: Arc<ComponentRegistry>,
        config: StorageConfig,
    ) -> Self {
        Self {
            name: name.into(),
            entities: EntityAllocator::new(),
            components: ComponentMap::with_config(registry, config),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn components(&self) -> &ComponentMap {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut ComponentMap {
        &mut self.components
    }

    pub fn spawn(&mut self) -> EntityId {
        self.entities.allocate()
    }

    /// Removes every component of `entity_id` and releases the id. The
    /// removals are compacted at the next flush.
    pub fn despawn(&mut self, entity_id: EntityId) -> bool {
        if !self.entities.deallocate(entity_id) {
            return false;
        }
        self.components.remove_all_components(entity_id);
        true
    }

    pub fn is_alive(&self, entity_id: EntityId) -> bool {
        self.entities.is_alive(entity_id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.count()
    }

    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter()
    }

    /// Ends the tick for every store.
    pub fn flush(&mut self) {
        self.components.flush();
    }

    pub fn save(&self) -> StorageResult<SceneFile> {
        Ok(SceneFile {
            name: self.name.clone(),
            saved_at: Utc::now(),
            entities: self.entities.iter().collect(),
            components: self.components.save()?,
        })
    }

    /// Rebuilds a scene from `file`. Component owners missing from the
    /// entity list are reserved as well.
    pub fn load(
        file: SceneFile,
        registry: Arc<ComponentRegistry>,
        config: StorageConfig,
    ) -> StorageResult<Self> {
        let mut scene = Self::with_config(file.name, registry, config);
        for &entity_id in &file.entities {
            scene.entities.reserve(entity_id);
        }
        for record in file.components.values().flatten() {
            scene.entities.reserve(record.entity);
        }

        let loaded = scene.components.load(file.components)?;
        log::debug!(
            "Loaded scene `{}`: {} entities, {} components",
            scene.name,
            scene.entities.count(),
            loaded
        );
        Ok(scene)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = self.save()?;
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write scene file {}", path.display()))?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(
        path: P,
        registry: Arc<ComponentRegistry>,
        config: StorageConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scene file {}", path.display()))?;
        let file: SceneFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse scene file {}", path.display()))?;
        let scene = Self::load(file, registry, config)
            .with_context(|| format!("Failed to load scene from {}", path.display()))?;
        Ok(scene)
    }
}
