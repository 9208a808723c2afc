//! Systems, filtered systems, priorities, and prefabs.
//!
//! A system never owns or stores the [`World`]; it is handed `&mut World` for
//! the duration of each lifecycle call.
//!
//! Lifecycle, driven by [`WorldBuilder::build`](crate::world::WorldBuilder::build):
//!
//! 1. [`System::setup`] for every system (register filters here),
//! 2. [`System::initialize`] for every system,
//! 3. one flush, then [`System::update`] once per tick in priority order.

use std::any::type_name;

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::filter::{Filter, FilterId};
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Relative execution order of systems within a tick. Higher runs first;
/// equal priorities run in registration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum Priority {
    /// Runs after every other priority.
    Lowest,
    Lower,
    Low,
    /// The priority used by [`WorldBuilder::add_system`](crate::world::WorldBuilder::add_system).
    #[default]
    Default,
    High,
    Higher,
    /// Runs before every other priority.
    Highest,
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// An update routine run once per tick.
pub trait System: 'static {
    /// Called once when the world is built, before any `initialize`.
    fn setup(&mut self, _world: &mut World) {}

    /// Called once after every system has been set up.
    fn initialize(&mut self, _world: &mut World) {}

    /// Called once per tick. The world flushes after this returns.
    fn update(&mut self, world: &mut World);

    /// Name used in logs and tick reports.
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }
}

// ---------------------------------------------------------------------------
// FilteredSystem
// ---------------------------------------------------------------------------

/// A system that runs once per entity matching its [`Filter`].
///
/// Schedule it by wrapping it in [`Filtered`].
pub trait FilteredSystem: 'static {
    /// The entities this system operates on.
    fn filter(&self) -> Filter;

    /// Called once per tick before the first entity.
    fn before_update(&mut self, _world: &mut World) {}

    /// Called for each matching entity, in ascending id order.
    fn update_entity(&mut self, world: &mut World, entity: Entity);

    /// Called once per tick after the last entity.
    fn after_update(&mut self, _world: &mut World) {}

    /// Called once after every system has been set up.
    fn initialize(&mut self, _world: &mut World) {}
}

/// Adapter scheduling a [`FilteredSystem`] as a [`System`].
///
/// The matching set is captured when the tick reaches this system, so
/// entities created, destroyed or changed during the walk do not affect it;
/// they show up from the next flush on.
#[derive(Debug)]
pub struct Filtered<S> {
    inner: S,
    filter_id: Option<FilterId>,
}

impl<S: FilteredSystem> Filtered<S> {
    /// Wrap `inner`. Its filter is registered when the world is built.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            filter_id: None,
        }
    }

    /// The wrapped system.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// The filter registration, once set up.
    pub fn filter_id(&self) -> Option<FilterId> {
        self.filter_id
    }
}

impl<S: FilteredSystem> System for Filtered<S> {
    fn setup(&mut self, world: &mut World) {
        let filter = self.inner.filter();
        self.filter_id = Some(world.register_filter(filter, type_name::<S>()));
    }

    fn initialize(&mut self, world: &mut World) {
        self.inner.initialize(world);
    }

    fn update(&mut self, world: &mut World) {
        let Some(id) = self.filter_id else {
            tracing::warn!(
                system = type_name::<S>(),
                "filtered system updated before setup -- skipped"
            );
            return;
        };
        let entities = match world.filtered_entities(id) {
            Ok(entities) => entities,
            Err(e) => {
                tracing::warn!(
                    system = type_name::<S>(),
                    error = %e,
                    "filter lookup failed -- skipped"
                );
                return;
            }
        };

        self.inner.before_update(world);
        for entity in entities.iter() {
            self.inner.update_entity(world, entity);
        }
        self.inner.after_update(world);
    }

    fn name(&self) -> &'static str {
        type_name::<S>()
    }
}

// ---------------------------------------------------------------------------
// Prefab
// ---------------------------------------------------------------------------

/// Initializes a freshly created entity, typically by adding components.
///
/// Any `Fn(&mut World, Entity) -> Result<(), EcsError>` is a prefab.
pub trait Prefab {
    fn initialize(&self, world: &mut World, entity: Entity) -> Result<(), EcsError>;
}

impl<F> Prefab for F
where
    F: Fn(&mut World, Entity) -> Result<(), EcsError>,
{
    fn initialize(&self, world: &mut World, entity: Entity) -> Result<(), EcsError> {
        self(world, entity)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_is_lowest_to_highest() {
        assert!(Priority::Lowest < Priority::Lower);
        assert!(Priority::Low < Priority::Default);
        assert!(Priority::Higher < Priority::Highest);
        assert_eq!(Priority::default(), Priority::Default);
    }

    struct Counter(u32);

    impl System for Counter {
        fn update(&mut self, _world: &mut World) {
            self.0 += 1;
        }
    }

    #[test]
    fn default_name_is_type_name() {
        let counter = Counter(0);
        assert!(counter.name().ends_with("Counter"));
    }
}
