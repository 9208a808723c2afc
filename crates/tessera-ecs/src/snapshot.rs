//! Detached copies of world state.
//!
//! A [`Snapshot`] is a deep copy of the live entity set, the allocator's
//! reuse state, and every component binding. It shares nothing with the
//! world it came from: later changes to either side are invisible to the
//! other. Build a fresh world from one with
//! [`WorldBuilder::build`](crate::world::WorldBuilder::build).
//!
//! [`SnapshotDocument`] is the serializable form. It carries the live ids
//! and every component type that has a codec, keyed by registered name.
//! Queued removals and destructions are not part of a snapshot's contract;
//! the document drops them, the in-memory copy keeps them until the restored
//! world's first flush.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentRegistry, EncodedComponents};
use crate::entity::{Entity, EntityAllocator, EntitySet};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Deep copy of a world's entities and component bindings.
pub struct Snapshot {
    allocator: EntityAllocator,
    registry: ComponentRegistry,
}

impl Snapshot {
    pub(crate) fn capture(allocator: &EntityAllocator, registry: &ComponentRegistry) -> Self {
        Self {
            allocator: allocator.clone(),
            registry: registry.detached_clone(),
        }
    }

    pub(crate) fn into_parts(self) -> (EntityAllocator, ComponentRegistry) {
        (self.allocator, self.registry)
    }

    /// Copy of the live entity set at capture time.
    pub fn live_entities(&self) -> EntitySet {
        self.allocator.live_set()
    }

    /// Number of live entities at capture time.
    pub fn entity_count(&self) -> usize {
        self.allocator.live_count()
    }

    /// Whether `entity` was live at capture time.
    pub fn entity_exists(&self, entity: Entity) -> bool {
        self.allocator.exists(entity)
    }

    /// The captured `T` for `entity`, if any.
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.registry.store::<T>()?.try_get(entity)
    }

    /// Whether `entity` had a `T` at capture time.
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.registry.has_component::<T>(entity)
    }

    /// The captured registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Encode into a serializable document.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::ComponentDeserializationError`] if a component
    /// value fails to encode.
    pub fn to_document(&self) -> Result<SnapshotDocument, EcsError> {
        // Entities queued for destruction, and their bindings, are not carried over.
        let doomed = self.allocator.pending_destroy();
        let live = self
            .allocator
            .live_set()
            .iter()
            .filter(|&entity| !doomed.contains(entity))
            .map(Entity::id)
            .collect();
        let mut components = self.registry.encode_all()?;
        if !doomed.is_empty() {
            for entries in components.values_mut() {
                entries.retain(|&raw, _| !doomed.contains(Entity::new(raw)));
            }
        }
        Ok(SnapshotDocument { live, components })
    }

    /// Rebuild a snapshot from `document`, decoding components through the
    /// codecs registered in `registry`.
    ///
    /// # Errors
    ///
    /// - [`EcsError::UnknownComponent`] if the document names a component
    ///   `registry` does not know.
    /// - [`EcsError::ComponentDeserializationError`] if a value fails to
    ///   decode or is bound to an entity the document does not list as live.
    /// - [`EcsError::NullComponent`] if a value is `null`.
    pub fn from_document(
        document: &SnapshotDocument,
        registry: &ComponentRegistry,
    ) -> Result<Self, EcsError> {
        let live: EntitySet = document.live.iter().copied().map(Entity::new).collect();

        for (name, entries) in &document.components {
            if let Some(&raw) = entries.keys().find(|&&raw| !live.contains(Entity::new(raw))) {
                return Err(EcsError::ComponentDeserializationError {
                    component: name.clone(),
                    details: format!("bound to entity {raw}, which is not live"),
                });
            }
        }

        let mut restored = registry.detached_clone();
        restored.clear_all();
        restored.load_encoded(&document.components)?;

        Ok(Self {
            allocator: EntityAllocator::from_live(&live),
            registry: restored,
        })
    }
}

impl Clone for Snapshot {
    fn clone(&self) -> Self {
        Self::capture(&self.allocator, &self.registry)
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("entity_count", &self.allocator.live_count())
            .field("registry", &self.registry)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SnapshotDocument
// ---------------------------------------------------------------------------

/// Serializable form of a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SnapshotDocument {
    /// Live entity ids, ascending.
    pub live: Vec<u32>,
    /// Component name -> entity id -> encoded value. `BTreeMap` keeps the
    /// output deterministic.
    pub components: EncodedComponents,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
