//! Tessera ECS -- a bitset-indexed Entity Component System with deferred
//! removal and cached filters.
//!
//! Entities are dense integer ids that are reused lowest-first. Each
//! component type lives in its own sparse store indexed by entity id.
//! Removals and destructions are queued and committed at a flush, which the
//! [`World`](world::World) runs before the first system of a tick and after
//! every system, so systems observe a stable view while they run.
//!
//! # Quick Start
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position { x: f32, y: f32 }
//! impl Component for Position {}
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Velocity { dx: f32, dy: f32 }
//! impl Component for Velocity {}
//!
//! struct Movement;
//!
//! impl FilteredSystem for Movement {
//!     fn filter(&self) -> Filter {
//!         Filter::builder().require::<Position>().require::<Velocity>().build().unwrap()
//!     }
//!
//!     fn update_entity(&mut self, world: &mut World, entity: Entity) {
//!         let v = world.get_component::<Velocity>(entity).cloned().unwrap();
//!         let p = world.get_component_mut::<Position>(entity).unwrap();
//!         p.x += v.dx;
//!         p.y += v.dy;
//!     }
//! }
//!
//! let mut world = WorldBuilder::new()
//!     .register_component::<Position>("position")
//!     .register_component::<Velocity>("velocity")
//!     .add_system(Filtered::new(Movement))
//!     .unwrap()
//!     .build(None);
//!
//! let e = world.create_entity();
//! world.add_component(e, Position { x: 0.0, y: 0.0 }).unwrap();
//! world.add_component(e, Velocity { dx: 1.0, dy: 0.5 }).unwrap();
//! world.update().unwrap();
//!
//! assert_eq!(world.get_component::<Position>(e), Some(&Position { x: 1.0, y: 0.5 }));
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod entity;
pub mod event;
pub mod filter;
pub mod snapshot;
pub mod storage;
pub mod system;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity is not live (never created, or destroyed and flushed).
    #[error("entity {entity} is not live")]
    EntityNotFound { entity: entity::Entity },

    /// A component value decoded to nothing.
    #[error("component '{component}' value is null")]
    NullComponent { component: String },

    /// A filter lists the same type as both required and excluded.
    #[error("filter both requires and excludes [{}]", .overlapping.join(", "))]
    InvalidFilter { overlapping: Vec<String> },

    /// A second system of the same concrete type was added.
    #[error("a system of type '{system}' is already registered")]
    DuplicateSystemType { system: &'static str },

    /// A world operation was invoked from inside a tick.
    #[error("'{operation}' cannot be called while the world is updating")]
    Reentrant { operation: &'static str },

    /// A component type was referenced that has not been registered.
    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponent { name: String, registered: String },

    /// Deserialization of a component value failed.
    #[error("failed to deserialize component '{component}': {details}")]
    ComponentDeserializationError { component: String, details: String },

    /// A filter id that this world did not issue.
    #[error("unknown filter id {id:?}")]
    InvalidFilterId { id: filter::FilterId },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{Component, ComponentKey, ComponentRegistry, ComponentTypeId};
    pub use crate::entity::{Entity, EntitySet};
    pub use crate::event::WorldEvent;
    pub use crate::filter::{Filter, FilterBuilder, FilterId};
    pub use crate::snapshot::{Snapshot, SnapshotDocument};
    pub use crate::storage::ComponentStore;
    pub use crate::system::{Filtered, FilteredSystem, Prefab, Priority, System};
    pub use crate::world::{TickReport, World, WorldBuilder, WorldConfig};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
