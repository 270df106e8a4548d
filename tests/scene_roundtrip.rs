use std::collections::BTreeMap;
use std::sync::Arc;

use compspace::{Component, ComponentRegistry, Hierarchy, Scene, SceneFile, StorageConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Label {
    text: String,
}
impl Component for Label {}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Score(i64);
impl Component for Score {}

fn registry() -> Arc<ComponentRegistry> {
    let mut registry = ComponentRegistry::new();
    registry.register::<Label>("Label");
    registry.register::<Score>("Score");
    Arc::new(registry)
}

fn scores(scene: &Scene) -> BTreeMap<u64, i64> {
    scene
        .components()
        .store::<Score>()
        .map(|store| store.iter().map(|(id, score)| (id, score.0)).collect())
        .unwrap_or_default()
}

fn build_scene(config: StorageConfig) -> Scene {
    let mut scene = Scene::with_config("arena", registry(), config);
    let ids: Vec<u64> = (0..40).map(|_| scene.spawn()).collect();
    for &id in &ids {
        scene
            .components_mut()
            .create_component::<Score>(id)
            .unwrap()
            .0 = id as i64 * 3 - 20;
        if id % 3 == 0 {
            scene
                .components_mut()
                .create_component::<Label>(id)
                .unwrap()
                .text = format!("entity-{}", id);
        }
    }
    *scene
        .components_mut()
        .create_component::<Hierarchy>(ids[1])
        .unwrap() = Hierarchy::child_of(ids[0]);
    for id in [5, 6, 7, 30] {
        scene.despawn(id);
    }
    scene.flush();
    scene
}

#[test]
fn save_and_load_through_file_preserves_components() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("arena.json");

    // tiny windows force regrowth and overflow on the original side
    let small = StorageConfig {
        initial_window: 2,
        initial_capacity: 2,
        ..StorageConfig::default()
    };
    let scene = build_scene(small);
    scene.save_to_file(&path).unwrap();

    let loaded = Scene::load_from_file(&path, registry(), StorageConfig::default()).unwrap();

    assert_eq!(loaded.name(), "arena");
    assert_eq!(loaded.entity_count(), scene.entity_count());
    assert_eq!(scores(&loaded), scores(&scene));
    assert!(!loaded.is_alive(6));
    assert!(!loaded.components().has_component::<Score>(6));
    assert_eq!(
        loaded.components().get_component::<Label>(9).unwrap().text,
        "entity-9"
    );
    assert_eq!(
        loaded.components().get_component::<Hierarchy>(1).unwrap(),
        &Hierarchy::child_of(0)
    );
}

#[test]
fn loading_unknown_identifiers_skips_them() {
    let scene = build_scene(StorageConfig::default());
    let mut file = scene.save().unwrap();
    let labels = file.components.get("Label").cloned().unwrap();
    file.components.insert("Retired".to_string(), labels);

    let mut only_scores = ComponentRegistry::new();
    only_scores.register::<Score>("Score");

    let loaded = Scene::load(file, Arc::new(only_scores), StorageConfig::default()).unwrap();
    assert_eq!(scores(&loaded), scores(&scene));
    assert!(loaded.components().store::<Label>().is_none());
}

#[test]
fn malformed_files_report_context() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = Scene::load_from_file(&path, registry(), StorageConfig::default()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse scene file"));

    let missing = dir.path().join("missing.json");
    let err = Scene::load_from_file(&missing, registry(), StorageConfig::default()).unwrap_err();
    assert!(err.to_string().contains("Failed to read scene file"));
}

#[test]
fn mismatched_component_shape_is_a_serialization_error() {
    let json = r#"{
        "name": "bad",
        "saved_at": "2024-01-01T00:00:00Z",
        "components": { "Score": [ { "entity": 1, "value": "not a number" } ] }
    }"#;
    let file: SceneFile = serde_json::from_str(json).unwrap();
    assert!(file.entities.is_empty());

    let err = Scene::load(file, registry(), StorageConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        compspace::StorageError::Serialization { entity_id: 1, .. }
    ));
}
