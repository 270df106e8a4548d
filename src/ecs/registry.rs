//! Component type registry
//!
//! Maps component types to their persisted identifier, optional initializer,
//! declared marker traits and the factory that builds their store. A
//! [`ComponentMap`] needs a registered type for every untyped operation
//! (`*_dyn`, `*_named`, multi-type cursors, save and load).

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;

use super::component::{Component, ComponentStorage};
use super::component_map::ComponentMap;
use super::component_set::ComponentSet;
use super::hierarchy::Hierarchy;
use super::EntityId;
use crate::config::StorageConfig;
use crate::error::StorageResult;

/// Builds the value of a freshly created component.
pub type Initializer<T> = Box<dyn Fn(&ComponentMap, EntityId) -> T + Send + Sync>;

type StoreFactory = fn(&StorageConfig) -> Box<dyn ComponentStorage>;
type CreateFn = fn(&mut ComponentMap, EntityId) -> StorageResult<()>;

/// Everything the map needs to handle a component type without knowing it
/// statically.
pub struct ComponentDescriptor {
    type_id: TypeId,
    type_name: &'static str,
    identifier: String,
    traits: Vec<TypeId>,
    // holds an `Initializer<T>`
    initializer: Option<Box<dyn Any + Send + Sync>>,
    factory: StoreFactory,
    create: CreateFn,
}

impl ComponentDescriptor {
    fn of<T: Component>(identifier: String) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            identifier,
            traits: Vec::new(),
            initializer: None,
            factory: new_store::<T>,
            create: create_erased::<T>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Stable name used as the key in saved scenes.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn has_trait(&self, trait_id: TypeId) -> bool {
        self.traits.contains(&trait_id)
    }

    pub fn has_initializer(&self) -> bool {
        self.initializer.is_some()
    }

    pub fn new_store(&self, config: &StorageConfig) -> Box<dyn ComponentStorage> {
        (self.factory)(config)
    }

    pub(crate) fn create(&self, map: &mut ComponentMap, entity_id: EntityId) -> StorageResult<()> {
        (self.create)(map, entity_id)
    }
}

impl std::fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("type_name", &self.type_name)
            .field("identifier", &self.identifier)
            .field("traits", &self.traits.len())
            .field("initializer", &self.initializer.is_some())
            .finish()
    }
}

fn new_store<T: Component>(config: &StorageConfig) -> Box<dyn ComponentStorage> {
    Box::new(ComponentSet::<T>::new(config))
}

fn create_erased<T: Component>(map: &mut ComponentMap, entity_id: EntityId) -> StorageResult<()> {
    map.create_component::<T>(entity_id).map(|_| ())
}

/// Registration table shared by every component map of a program.
#[derive(Debug)]
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentDescriptor>,
    by_identifier: HashMap<String, TypeId>,
}

impl ComponentRegistry {
    /// Creates a registry with the built-in [`Hierarchy`] component
    /// registered as `"Hierarchy"`.
    pub fn new() -> Self {
        let mut registry = Self {
            by_type: HashMap::new(),
            by_identifier: HashMap::new(),
        };
        registry.register::<Hierarchy>("Hierarchy");
        registry
    }

    /// Registers `T` under `identifier`.
    ///
    /// # Panics
    ///
    /// Panics if `T` or `identifier` is already registered.
    pub fn register<T: Component>(
        &mut self,
        identifier: impl Into<String>,
    ) -> ComponentRegistration<'_, T> {
        let identifier = identifier.into();
        let type_id = TypeId::of::<T>();
        if let Some(existing) = self.by_type.get(&type_id) {
            panic!(
                "component `{}` is already registered as `{}`",
                type_name::<T>(),
                existing.identifier
            );
        }
        if self.by_identifier.contains_key(&identifier) {
            panic!(
                "identifier `{}` is already used by another component type",
                identifier
            );
        }

        self.by_identifier.insert(identifier.clone(), type_id);
        let descriptor = self
            .by_type
            .entry(type_id)
            .or_insert_with(|| ComponentDescriptor::of::<T>(identifier));
        ComponentRegistration {
            descriptor,
            _marker: PhantomData,
        }
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    pub fn descriptor(&self, type_id: TypeId) -> Option<&ComponentDescriptor> {
        self.by_type.get(&type_id)
    }

    pub fn descriptor_of<T: 'static>(&self) -> Option<&ComponentDescriptor> {
        self.descriptor(TypeId::of::<T>())
    }

    pub fn by_identifier(&self, identifier: &str) -> Option<&ComponentDescriptor> {
        self.by_identifier
            .get(identifier)
            .and_then(|type_id| self.by_type.get(type_id))
    }

    pub fn identifier_of<T: 'static>(&self) -> Option<&str> {
        self.descriptor_of::<T>().map(ComponentDescriptor::identifier)
    }

    pub fn initializer<T: 'static>(&self) -> Option<&Initializer<T>> {
        self.descriptor_of::<T>()?
            .initializer
            .as_ref()?
            .downcast_ref::<Initializer<T>>()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ComponentDescriptor> {
        self.by_type.values()
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder returned by [`ComponentRegistry::register`].
pub struct ComponentRegistration<'r, T> {
    descriptor: &'r mut ComponentDescriptor,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> ComponentRegistration<'_, T> {
    /// Replaces `T::default()` as the value of newly created components.
    pub fn with_initializer(
        self,
        initializer: impl Fn(&ComponentMap, EntityId) -> T + Send + Sync + 'static,
    ) -> Self {
        let initializer: Initializer<T> = Box::new(initializer);
        self.descriptor.initializer = Some(Box::new(initializer));
        self
    }

    /// Declares that `T` implements the marker trait `Tr`, making it visible
    /// to [`ComponentMap::has_trait`].
    pub fn with_trait<Tr: ?Sized + 'static>(self) -> Self {
        let trait_id = TypeId::of::<Tr>();
        if !self.descriptor.traits.contains(&trait_id) {
            self.descriptor.traits.push(trait_id);
        }
        self
    }
}
