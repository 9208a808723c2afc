//! Per-type sparse component storage with deferred removal.
//!
//! A [`ComponentStore<T>`] keeps one optional slot per entity id, a
//! membership bitset, and a pending-removal bitset. Adds are visible at once;
//! removals are only queued and take effect at [`ComponentStore::flush`], so
//! a system walking a filtered entity set never sees a binding vanish under
//! it.
//!
//! The registry holds stores of many types behind the crate-private
//! [`ErasedStore`] capability trait.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;

use bit_set::BitSet;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::component::{Component, ComponentTypeId};
use crate::entity::{Entity, EntitySet};
use crate::event::{EventHooks, WorldEvent};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// JSON conversion functions for a component type.
///
/// Attached to a store when the type is registered by name; stores without a
/// codec are skipped by document export.
pub struct Codec<T> {
    encode: fn(&T) -> serde_json::Result<serde_json::Value>,
    decode: fn(serde_json::Value) -> serde_json::Result<T>,
}

impl<T> Clone for Codec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Codec<T> {}

impl<T: Serialize + DeserializeOwned> Codec<T> {
    /// A codec backed by `serde_json`.
    pub fn json() -> Self {
        Self {
            encode: |value| serde_json::to_value(value),
            decode: serde_json::from_value,
        }
    }
}

// ---------------------------------------------------------------------------
// ComponentStore
// ---------------------------------------------------------------------------

/// All components of one type, indexed by entity id.
pub struct ComponentStore<T: Component> {
    id: ComponentTypeId,
    name: String,
    /// Sparse array; length is always zero or a power of two.
    slots: Vec<Option<T>>,
    /// Bit `e` set iff entity `e` has a committed binding.
    members: BitSet,
    /// Bit `e` set iff a removal was requested but not yet flushed.
    pending_removal: BitSet,
    hooks: Option<EventHooks>,
    codec: Option<Codec<T>>,
}

impl<T: Component> ComponentStore<T> {
    /// Create an empty store whose sparse array starts with room for
    /// `capacity` entities (rounded up to a power of two).
    pub fn new(id: ComponentTypeId, name: impl Into<String>, capacity: usize) -> Self {
        let mut slots = Vec::new();
        if capacity > 0 {
            slots.resize_with(capacity.next_power_of_two(), || None);
        }
        Self {
            id,
            name: name.into(),
            slots,
            members: BitSet::with_capacity(capacity),
            pending_removal: BitSet::new(),
            hooks: None,
            codec: None,
        }
    }

    pub(crate) fn with_hooks(mut self, hooks: Option<EventHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub(crate) fn set_codec(&mut self, codec: Codec<T>) {
        self.codec = Some(codec);
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    /// The component type id this store holds.
    pub fn component_id(&self) -> ComponentTypeId {
        self.id
    }

    /// Registered name (the Rust type name for stores created on demand).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind `component` to `entity`, replacing (and returning) any previous
    /// value. Visible immediately. Cancels a pending removal of the same
    /// binding.
    pub fn add(&mut self, entity: Entity, component: T) -> Option<T> {
        let previous = self.bind(entity, component);
        if let Some(hooks) = &self.hooks {
            hooks.emit(WorldEvent::ComponentAdded {
                entity,
                component: self.id,
            });
        }
        previous
    }

    fn bind(&mut self, entity: Entity, mut component: T) -> Option<T> {
        let index = entity.index();
        component.attach(entity);
        if index >= self.slots.len() {
            let capacity = (index + 1).next_power_of_two();
            self.slots.resize_with(capacity, || None);
        }
        self.members.insert(index);
        self.pending_removal.remove(index);
        self.slots[index].replace(component)
    }

    /// Whether `entity` has a committed binding. Stays `true` after
    /// [`remove`](Self::remove) until the next flush.
    #[inline]
    pub fn has(&self, entity: Entity) -> bool {
        self.members.contains(entity.index())
    }

    /// The component bound to `entity`.
    ///
    /// # Panics
    ///
    /// Panics if `entity` has no binding. Check [`has`](Self::has) first, or
    /// use [`try_get`](Self::try_get).
    pub fn get(&self, entity: Entity) -> &T {
        match self.try_get(entity) {
            Some(component) => component,
            None => panic!(
                "entity {entity:?} has no '{}' component -- check has() before get()",
                self.name
            ),
        }
    }

    /// The component bound to `entity`, if any.
    pub fn try_get(&self, entity: Entity) -> Option<&T> {
        if !self.has(entity) {
            return None;
        }
        self.slots.get(entity.index()).and_then(Option::as_ref)
    }

    /// Mutable access to the component bound to `entity`, if any.
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        if !self.has(entity) {
            return None;
        }
        self.slots.get_mut(entity.index()).and_then(Option::as_mut)
    }

    /// Queue the binding of `entity` for removal at the next flush.
    ///
    /// Returns `true` if a removal was newly queued. Removing an absent or
    /// already-queued binding does nothing and fires no notification.
    pub fn remove(&mut self, entity: Entity) -> bool {
        if !self.queue_removal(entity) {
            return false;
        }
        if let Some(hooks) = &self.hooks {
            hooks.emit(WorldEvent::ComponentRemoved {
                entity,
                component: self.id,
            });
        }
        true
    }

    fn queue_removal(&mut self, entity: Entity) -> bool {
        self.has(entity) && self.pending_removal.insert(entity.index())
    }

    /// Whether a removal of `entity`'s binding is queued.
    pub fn is_pending_removal(&self, entity: Entity) -> bool {
        self.pending_removal.contains(entity.index())
    }

    /// Commit queued removals. Returns the number of bindings dropped.
    pub fn flush(&mut self) -> usize {
        let removed = self.pending_removal.len();
        self.members.difference_with(&self.pending_removal);
        for index in self.pending_removal.iter() {
            if let Some(slot) = self.slots.get_mut(index) {
                *slot = None;
            }
        }
        self.pending_removal.clear();
        removed
    }

    /// Copy of the set of entities with a committed binding.
    pub fn entities(&self) -> EntitySet {
        EntitySet::from_bits(self.members.clone())
    }

    /// Committed bindings in ascending entity order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> + '_ {
        self.members.iter().filter_map(move |index| {
            self.slots[index]
                .as_ref()
                .map(|component| (Entity::from_index(index), component))
        })
    }

    /// Number of committed bindings.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the store has no bindings.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Length of the sparse array.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Drop every binding and queued removal without notifications.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.members.clear();
        self.pending_removal.clear();
    }

    fn decode(&self, value: serde_json::Value) -> Result<T, EcsError> {
        if value.is_null() {
            return Err(EcsError::NullComponent {
                component: self.name.clone(),
            });
        }
        let codec = self
            .codec
            .ok_or_else(|| EcsError::ComponentDeserializationError {
                component: self.name.clone(),
                details: "no codec registered".to_owned(),
            })?;
        (codec.decode)(value).map_err(|e| EcsError::ComponentDeserializationError {
            component: self.name.clone(),
            details: e.to_string(),
        })
    }
}

impl<T: Component> Clone for ComponentStore<T> {
    /// Deep copy. The clone is detached from any listeners.
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            slots: self.slots.clone(),
            members: self.members.clone(),
            pending_removal: self.pending_removal.clone(),
            hooks: None,
            codec: self.codec,
        }
    }
}

impl<T: Component> fmt::Debug for ComponentStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentStore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("len", &self.members.len())
            .field("pending_removal", &self.pending_removal.len())
            .field("capacity", &self.slots.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ErasedStore -- uniform capability interface over ComponentStore<T>
// ---------------------------------------------------------------------------

pub(crate) trait ErasedStore {
    fn set_component_id(&mut self, id: ComponentTypeId);
    fn name(&self) -> &str;
    fn element_type(&self) -> TypeId;
    fn has(&self, entity: Entity) -> bool;
    fn remove(&mut self, entity: Entity) -> bool;
    /// Queue a removal without firing a notification.
    fn discard(&mut self, entity: Entity);
    fn flush(&mut self) -> usize;
    fn members(&self) -> &BitSet;
    fn clear(&mut self);
    fn len(&self) -> usize;
    fn set_hooks(&mut self, hooks: Option<EventHooks>);
    /// Deep copy without listeners.
    fn clone_detached(&self) -> Box<dyn ErasedStore>;
    /// Replace this store's bindings with those of `other` (same element
    /// type), keeping this store's id, name, codec and listeners.
    fn adopt_bindings(&mut self, other: Box<dyn ErasedStore>);
    fn has_codec(&self) -> bool;
    fn encode(&self) -> Result<BTreeMap<u32, serde_json::Value>, EcsError>;
    fn insert_json(
        &mut self,
        entity: Entity,
        value: serde_json::Value,
        notify: bool,
    ) -> Result<(), EcsError>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Component> ErasedStore for ComponentStore<T> {
    fn set_component_id(&mut self, id: ComponentTypeId) {
        self.id = id;
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn element_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn has(&self, entity: Entity) -> bool {
        ComponentStore::has(self, entity)
    }

    fn remove(&mut self, entity: Entity) -> bool {
        ComponentStore::remove(self, entity)
    }

    fn discard(&mut self, entity: Entity) {
        self.queue_removal(entity);
    }

    fn flush(&mut self) -> usize {
        ComponentStore::flush(self)
    }

    fn members(&self) -> &BitSet {
        &self.members
    }

    fn clear(&mut self) {
        ComponentStore::clear(self)
    }

    fn len(&self) -> usize {
        ComponentStore::len(self)
    }

    fn set_hooks(&mut self, hooks: Option<EventHooks>) {
        self.hooks = hooks;
    }

    fn clone_detached(&self) -> Box<dyn ErasedStore> {
        Box::new(self.clone())
    }

    fn adopt_bindings(&mut self, other: Box<dyn ErasedStore>) {
        match other.into_any().downcast::<ComponentStore<T>>() {
            Ok(other) => {
                let other = *other;
                self.slots = other.slots;
                self.members = other.members;
                self.pending_removal = other.pending_removal;
            }
            Err(_) => unreachable!("adopt_bindings called with a store of another type"),
        }
    }

    fn has_codec(&self) -> bool {
        self.codec.is_some()
    }

    fn encode(&self) -> Result<BTreeMap<u32, serde_json::Value>, EcsError> {
        let codec = self
            .codec
            .ok_or_else(|| EcsError::ComponentDeserializationError {
                component: self.name.clone(),
                details: "no codec registered".to_owned(),
            })?;
        let mut out = BTreeMap::new();
        for (entity, component) in self.iter() {
            let value = (codec.encode)(component).map_err(|e| {
                EcsError::ComponentDeserializationError {
                    component: self.name.clone(),
                    details: e.to_string(),
                }
            })?;
            out.insert(entity.id(), value);
        }
        Ok(out)
    }

    fn insert_json(
        &mut self,
        entity: Entity,
        value: serde_json::Value,
        notify: bool,
    ) -> Result<(), EcsError> {
        let component = self.decode(value)?;
        if notify {
            self.add(entity, component);
        } else {
            self.bind(entity, component);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
