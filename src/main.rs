use std::any::TypeId;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use compspace::{Component, ComponentRegistry, EntityId, Grouping, IterFlags, Scene, StorageConfig};

#[derive(Debug, Parser)]
#[command(author, version, about = "Randomized soak run over the component stores")]
struct Cli {
    /// Path to a storage config YAML file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for the workload generator
    #[arg(long, default_value_t = 7)]
    seed: u64,

    #[arg(long, default_value_t = 200)]
    ticks: u64,

    /// Structural operations per tick
    #[arg(long, default_value_t = 64)]
    entities: usize,

    /// Write the final scene to this JSON file
    #[arg(long)]
    save: Option<PathBuf>,

    /// Overrides `logging.level` from the config
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Position {
    x: i32,
    y: i32,
}
impl Component for Position {}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Velocity {
    dx: i32,
    dy: i32,
}
impl Component for Velocity {}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Health(u32);
impl Component for Health {}

fn registry() -> Arc<ComponentRegistry> {
    let mut registry = ComponentRegistry::new();
    registry.register::<Position>("Position");
    registry
        .register::<Velocity>("Velocity")
        .with_initializer(|map, id| {
            // movers start heading away from the origin
            match map.try_get_component::<Position>(id) {
                Some(position) => Velocity {
                    dx: position.x.signum(),
                    dy: position.y.signum(),
                },
                None => Velocity::default(),
            }
        });
    registry
        .register::<Health>("Health")
        .with_initializer(|_, _| Health(100));
    Arc::new(registry)
}

/// Expected contents of the scene, maintained alongside the real stores.
#[derive(Debug, Default)]
struct Model {
    positions: BTreeMap<EntityId, Position>,
    velocities: BTreeMap<EntityId, Velocity>,
    health: BTreeMap<EntityId, Health>,
}

impl Model {
    fn despawn(&mut self, entity_id: EntityId) {
        self.positions.remove(&entity_id);
        self.velocities.remove(&entity_id);
        self.health.remove(&entity_id);
    }
}

fn run_tick(
    scene: &mut Scene,
    model: &mut Model,
    alive: &mut Vec<EntityId>,
    rng: &mut ChaCha8Rng,
    operations: usize,
) -> Result<()> {
    for _ in 0..operations {
        match rng.gen_range(0..10) {
            0..=3 => {
                let entity_id = scene.spawn();
                let position = Position {
                    x: rng.gen_range(-100..100),
                    y: rng.gen_range(-100..100),
                };
                *scene
                    .components_mut()
                    .create_component::<Position>(entity_id)? = position.clone();
                model.positions.insert(entity_id, position);
                if rng.gen_bool(0.5) {
                    let velocity = scene
                        .components_mut()
                        .create_component::<Velocity>(entity_id)?
                        .clone();
                    model.velocities.insert(entity_id, velocity);
                }
                alive.push(entity_id);
            }
            4..=5 if !alive.is_empty() => {
                let entity_id = alive.swap_remove(rng.gen_range(0..alive.len()));
                scene.despawn(entity_id);
                model.despawn(entity_id);
            }
            6..=7 if !alive.is_empty() => {
                let entity_id = alive[rng.gen_range(0..alive.len())];
                let components = scene.components_mut();
                if components.remove_component::<Health>(entity_id) {
                    model.health.remove(&entity_id);
                } else {
                    components.create_component::<Health>(entity_id)?;
                    model.health.insert(entity_id, Health(100));
                }
            }
            _ if !alive.is_empty() => {
                let entity_id = alive[rng.gen_range(0..alive.len())];
                if let Some(health) = scene
                    .components_mut()
                    .store_mut::<Health>()
                    .and_then(|store| store.try_get_mut(entity_id))
                {
                    health.0 = health.0.saturating_sub(rng.gen_range(1..20));
                    model.health.insert(entity_id, health.clone());
                }
            }
            _ => {}
        }
    }

    // integrate every mover before the tick ends
    let components = scene.components_mut();
    let mut movers = components.create_iterator::<Velocity>(IterFlags::empty());
    while movers.next(components) {
        let entity_id = movers.entity_id()?;
        if !components.has_component::<Velocity>(entity_id) {
            // removed this tick
            continue;
        }
        let velocity = movers.component(components)?.clone();
        if let Ok(position) = components.get_component_mut::<Position>(entity_id) {
            position.x += velocity.dx;
            position.y += velocity.dy;
            model.positions.insert(entity_id, position.clone());
        }
    }

    scene.flush();
    Ok(())
}

fn check_store<T>(scene: &Scene, expected: &BTreeMap<EntityId, T>) -> Result<()>
where
    T: Component + PartialEq + std::fmt::Debug,
{
    let components = scene.components();
    let mut iter = components.create_iterator::<T>(IterFlags::ORDERED);
    let mut seen = Vec::with_capacity(expected.len());
    while iter.next(components) {
        let entity_id = iter.entity_id()?;
        let actual = iter.component(components)?;
        match expected.get(&entity_id) {
            Some(value) if value == actual => seen.push(entity_id),
            Some(value) => bail!(
                "entity {} holds {:?}, expected {:?}",
                entity_id,
                actual,
                value
            ),
            None => bail!("entity {} holds a stale {:?}", entity_id, actual),
        }
    }
    if !seen.iter().eq(expected.keys()) {
        bail!(
            "ordered walk saw {} of {} expected `{}` components",
            seen.len(),
            expected.len(),
            std::any::type_name::<T>()
        );
    }
    Ok(())
}

fn count_query(scene: &Scene, grouping: Grouping, types: &[TypeId]) -> Result<usize> {
    let components = scene.components();
    let mut query = components.create_multi_iterator(grouping, types, IterFlags::empty())?;
    let mut count = 0;
    while query.next(components) {
        count += 1;
    }
    Ok(count)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => StorageConfig::from_yaml(path)?,
        None => StorageConfig::default(),
    };
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let registry = registry();
    let mut scene = Scene::with_config("soak", Arc::clone(&registry), config.clone());
    let mut model = Model::default();
    let mut alive = Vec::new();
    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);

    for tick in 0..cli.ticks {
        run_tick(&mut scene, &mut model, &mut alive, &mut rng, cli.entities)?;
        check_store(&scene, &model.positions)?;
        check_store(&scene, &model.velocities)?;
        check_store(&scene, &model.health)?;
        log::debug!("tick {}: {} entities alive", tick, scene.entity_count());
    }

    let both = count_query(
        &scene,
        Grouping::All,
        &[TypeId::of::<Position>(), TypeId::of::<Health>()],
    )?;
    let either = count_query(
        &scene,
        Grouping::Any,
        &[TypeId::of::<Velocity>(), TypeId::of::<Health>()],
    )?;
    let expected_both = model
        .positions
        .keys()
        .filter(|id| model.health.contains_key(id))
        .count();
    let expected_either = model
        .velocities
        .keys()
        .chain(model.health.keys().filter(|id| !model.velocities.contains_key(id)))
        .count();
    if both != expected_both || either != expected_either {
        bail!(
            "query mismatch: AND {} (expected {}), OR {} (expected {})",
            both,
            expected_both,
            either,
            expected_either
        );
    }

    for (type_name, stats) in scene.components().stats() {
        log::info!(
            "{}: {} live, dense {}/{}, overflow {}, window [{}, {})",
            type_name,
            stats.len,
            stats.dense_len,
            stats.capacity,
            stats.overflow_len,
            stats.window.0,
            stats.window.1
        );
    }

    if let Some(path) = &cli.save {
        scene.save_to_file(path)?;
        log::info!("Saved scene to {}", path.display());
    }

    println!(
        "Soak run completed for {} ticks (seed {}). {} entities alive.",
        cli.ticks,
        cli.seed,
        scene.entity_count()
    );
    println!("{} with position and health, {} with velocity or health.", both, either);
    Ok(())
}
