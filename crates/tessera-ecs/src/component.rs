//! Component types and the registry of per-type stores.
//!
//! The [`ComponentRegistry`] maps each Rust component type to a
//! [`ComponentTypeId`] and owns one [`ComponentStore`] per type. Stores are
//! created lazily the first time a type is touched; registering a type by
//! name up front additionally attaches a JSON codec so the type takes part in
//! snapshot documents.

use std::any::{type_name, TypeId};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};

use bit_set::BitSet;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::entity::{Entity, EntitySet};
use crate::event::EventHooks;
use crate::storage::{Codec, ComponentStore, ErasedStore};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// A plain data record attached to at most one entity per type.
///
/// `Clone` is required so snapshots can deep-copy stores.
pub trait Component: Clone + 'static {
    /// Called when the component is bound to `entity`.
    fn attach(&mut self, _entity: Entity) {}
}

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Opaque, lightweight identifier for a component type within one registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentKey
// ---------------------------------------------------------------------------

/// Registry-independent handle on a component type, used by filters.
///
/// Equality, ordering and hashing only consider the Rust `TypeId`.
#[derive(Clone, Copy)]
pub struct ComponentKey {
    type_id: TypeId,
    name: &'static str,
}

impl ComponentKey {
    /// The key for `T`.
    pub fn of<T: Component>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// The Rust type name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl PartialEq for ComponentKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ComponentKey {}

impl Hash for ComponentKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl PartialOrd for ComponentKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComponentKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_id.cmp(&other.type_id)
    }
}

impl fmt::Debug for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentKey({})", self.name)
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Encoded bindings: component name -> entity id -> JSON value.
pub type EncodedComponents = BTreeMap<String, BTreeMap<u32, serde_json::Value>>;

/// Owns one [`ComponentStore`] per component type.
///
/// Every store the registry creates shares the registry's [`EventHooks`], so
/// component notifications from any store reach the world's listeners.
pub struct ComponentRegistry {
    /// TypeId -> ComponentTypeId.
    by_type: HashMap<TypeId, ComponentTypeId>,
    /// Name -> ComponentTypeId, for JSON insertion and documents.
    by_name: HashMap<String, ComponentTypeId>,
    /// Indexed by ComponentTypeId.0.
    stores: Vec<Box<dyn ErasedStore>>,
    hooks: Option<EventHooks>,
    /// Initial sparse-array capacity for new stores.
    store_capacity: usize,
}

impl ComponentRegistry {
    /// Create an empty registry with no listeners.
    pub fn new() -> Self {
        Self::with_store_capacity(16)
    }

    /// Create an empty registry whose stores start with room for
    /// `store_capacity` entities.
    pub fn with_store_capacity(store_capacity: usize) -> Self {
        Self {
            by_type: HashMap::new(),
            by_name: HashMap::new(),
            stores: Vec::new(),
            hooks: None,
            store_capacity,
        }
    }

    /// Wire `hooks` into the registry and every store it already owns.
    /// Stores created later inherit them.
    pub fn set_hooks(&mut self, hooks: Option<EventHooks>) {
        for store in &mut self.stores {
            store.set_hooks(hooks.clone());
        }
        self.hooks = hooks;
    }

    /// Register `T` under `name` and attach a JSON codec.
    ///
    /// If `T` already has a store (registered, or created on demand) the
    /// existing [`ComponentTypeId`] is returned; a store created on demand
    /// is renamed to `name`. A type registered by name keeps its first name,
    /// and a later, different `name` for it is ignored.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered for a different type.
    pub fn register<T>(&mut self, name: &str) -> ComponentTypeId
    where
        T: Component + Serialize + DeserializeOwned,
    {
        if let Some(&owner) = self.by_name.get(name) {
            if self.by_type.get(&TypeId::of::<T>()) != Some(&owner) {
                panic!(
                    "component name '{}' is already registered for a different type",
                    name
                );
            }
        }

        let id = self.ensure_store::<T>(name);
        let default_name = type_name::<T>();
        let store = self.typed_mut::<T>(id);
        store.set_codec(Codec::json());
        if store.name() == default_name && name != default_name {
            store.set_name(name);
            self.by_name.remove(default_name);
            self.by_name.insert(name.to_owned(), id);
        }
        id
    }

    /// The store for `T`, created on first access.
    pub fn store_for<T: Component>(&mut self) -> &mut ComponentStore<T> {
        let id = self.ensure_store::<T>(type_name::<T>());
        self.typed_mut::<T>(id)
    }

    /// The store for `T`, if it exists.
    pub fn store<T: Component>(&self) -> Option<&ComponentStore<T>> {
        let id = self.lookup::<T>()?;
        self.stores[id.index()]
            .as_any()
            .downcast_ref::<ComponentStore<T>>()
    }

    /// Mutable access to the store for `T`, if it exists.
    pub fn store_mut<T: Component>(&mut self) -> Option<&mut ComponentStore<T>> {
        let id = self.lookup::<T>()?;
        Some(self.typed_mut::<T>(id))
    }

    fn ensure_store<T: Component>(&mut self, name: &str) -> ComponentTypeId {
        if let Some(&id) = self.by_type.get(&TypeId::of::<T>()) {
            return id;
        }
        let id = ComponentTypeId(self.stores.len() as u32);
        let store = ComponentStore::<T>::new(id, name, self.store_capacity)
            .with_hooks(self.hooks.clone());
        self.stores.push(Box::new(store));
        self.by_type.insert(TypeId::of::<T>(), id);
        self.by_name.insert(name.to_owned(), id);
        id
    }

    fn typed_mut<T: Component>(&mut self, id: ComponentTypeId) -> &mut ComponentStore<T> {
        match self.stores[id.index()]
            .as_any_mut()
            .downcast_mut::<ComponentStore<T>>()
        {
            Some(store) => store,
            None => unreachable!("store {id:?} does not hold {}", type_name::<T>()),
        }
    }

    /// Look up the id of `T`.
    pub fn lookup<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Look up a component type by registered name.
    pub fn lookup_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    /// Look up the id behind a [`ComponentKey`].
    pub fn lookup_key(&self, key: &ComponentKey) -> Option<ComponentTypeId> {
        self.by_type.get(&key.type_id()).copied()
    }

    /// Name of a component type.
    pub fn name_of(&self, id: ComponentTypeId) -> Option<&str> {
        self.stores.get(id.index()).map(|store| store.name())
    }

    pub(crate) fn members_of(&self, key: &ComponentKey) -> Option<&BitSet> {
        let id = self.lookup_key(key)?;
        Some(self.stores[id.index()].members())
    }

    // -- per-entity delegation ----------------------------------------------

    /// Bind `component` to `entity`. Returns the replaced value, if any.
    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) -> Option<T> {
        self.store_for::<T>().add(entity, component)
    }

    /// Whether `entity` has a committed `T`. Does not create a store.
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.store::<T>().is_some_and(|store| store.has(entity))
    }

    /// Queue removal of `entity`'s `T`. Returns whether a removal was queued.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> bool {
        self.store_mut::<T>()
            .is_some_and(|store| store.remove(entity))
    }

    /// Whether `entity` has a committed binding of the type `id`.
    pub fn has_component_id(&self, entity: Entity, id: ComponentTypeId) -> bool {
        self.stores
            .get(id.index())
            .is_some_and(|store| store.has(entity))
    }

    /// Queue removal of every component bound to `entity`, in store order.
    /// Returns the number of removals queued.
    pub fn remove_all_components(&mut self, entity: Entity) -> usize {
        self.stores
            .iter_mut()
            .map(|store| store.remove(entity))
            .filter(|queued| *queued)
            .count()
    }

    /// Silently queue removal of every binding of every entity in `entities`.
    pub(crate) fn discard_entities(&mut self, entities: &EntitySet) {
        if entities.is_empty() {
            return;
        }
        for store in &mut self.stores {
            for entity in entities.iter() {
                store.discard(entity);
            }
        }
    }

    /// Silently queue removal of every binding whose entity is not in `live`.
    pub(crate) fn discard_unbound(&mut self, live: &BitSet) {
        for store in &mut self.stores {
            let orphans: Vec<usize> = store.members().difference(live).collect();
            for index in orphans {
                store.discard(Entity::new(index as u32));
            }
        }
    }

    /// Insert a component decoded from JSON, by registered name.
    ///
    /// # Errors
    ///
    /// - [`EcsError::UnknownComponent`] if `name` is not registered.
    /// - [`EcsError::NullComponent`] if `value` is `null`.
    /// - [`EcsError::ComponentDeserializationError`] if decoding fails.
    pub fn insert_json(
        &mut self,
        entity: Entity,
        name: &str,
        value: serde_json::Value,
    ) -> Result<(), EcsError> {
        let id = self.resolve_name(name)?;
        self.stores[id.index()].insert_json(entity, value, true)
    }

    fn resolve_name(&self, name: &str) -> Result<ComponentTypeId, EcsError> {
        self.lookup_by_name(name)
            .ok_or_else(|| EcsError::UnknownComponent {
                name: name.to_owned(),
                registered: self.registered_names().join(", "),
            })
    }

    /// Commit queued removals in every store. Returns the bindings dropped.
    pub fn flush_all(&mut self) -> usize {
        self.stores.iter_mut().map(|store| store.flush()).sum()
    }

    /// Drop every binding in every store. Registrations are kept.
    pub fn clear_all(&mut self) {
        for store in &mut self.stores {
            store.clear();
        }
    }

    // -- snapshot support ---------------------------------------------------

    /// Deep copy of all registrations and bindings, with no listeners.
    pub fn detached_clone(&self) -> Self {
        Self {
            by_type: self.by_type.clone(),
            by_name: self.by_name.clone(),
            stores: self.stores.iter().map(|s| s.clone_detached()).collect(),
            hooks: None,
            store_capacity: self.store_capacity,
        }
    }

    /// Take over the bindings held by `other`.
    ///
    /// Types known to both registries keep this registry's ids, names and
    /// codecs; types only `other` knows are appended. Every store ends up
    /// wired to this registry's listeners.
    pub fn adopt(&mut self, other: ComponentRegistry) {
        for store in &mut self.stores {
            store.clear();
        }
        for mut incoming in other.stores {
            let existing = self.by_type.get(&incoming.element_type()).copied();
            match existing {
                Some(id) => self.stores[id.index()].adopt_bindings(incoming),
                None => {
                    let id = ComponentTypeId(self.stores.len() as u32);
                    self.by_type.insert(incoming.element_type(), id);
                    if !self.by_name.contains_key(incoming.name()) {
                        self.by_name.insert(incoming.name().to_owned(), id);
                    }
                    incoming.set_component_id(id);
                    incoming.set_hooks(self.hooks.clone());
                    self.stores.push(incoming);
                }
            }
        }
    }

    /// Encode every store that has a codec: `name -> { entity id -> value }`.
    /// Stores without a codec are skipped with a warning.
    pub fn encode_all(&self) -> Result<EncodedComponents, EcsError> {
        let mut out = BTreeMap::new();
        for store in &self.stores {
            if !store.has_codec() {
                if store.len() > 0 {
                    tracing::warn!(
                        component_name = %store.name(),
                        bindings = store.len(),
                        "component type has no codec registered -- skipping in document"
                    );
                }
                continue;
            }
            out.insert(store.name().to_owned(), store.encode()?);
        }
        Ok(out)
    }

    /// Load decoded bindings without firing notifications.
    ///
    /// All names are validated before anything is inserted.
    pub(crate) fn load_encoded(&mut self, components: &EncodedComponents) -> Result<(), EcsError> {
        let mut resolved = Vec::with_capacity(components.len());
        for name in components.keys() {
            resolved.push(self.resolve_name(name)?);
        }
        for (id, entries) in resolved.into_iter().zip(components.values()) {
            for (&raw, value) in entries {
                self.stores[id.index()].insert_json(Entity::new(raw), value.clone(), false)?;
            }
        }
        Ok(())
    }

    // -- introspection ------------------------------------------------------

    /// Number of component types with a store.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether no component type has a store yet.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Names of all known component types, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("types", &self.registered_names())
            .field("store_capacity", &self.store_capacity)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
