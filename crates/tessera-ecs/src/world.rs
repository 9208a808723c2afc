//! The [`World`] is the top-level container for the ECS. It owns the entity
//! allocator, the component registry, the filter index, and the fixed,
//! priority-ordered list of systems.
//!
//! # Tick protocol
//!
//! [`World::update`] flushes once, then for each system in order calls
//! [`System::update`] and flushes again. A flush commits queued component
//! removals and entity destructions and recomputes every filter, so whatever
//! one system does is visible to the next system in the same tick, while a
//! filtered system's own entity set stays fixed for the whole of its call.

use std::any::TypeId;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentRegistry, ComponentTypeId};
use crate::entity::{Entity, EntityAllocator, EntitySet};
use crate::event::{EventHooks, WorldEvent};
use crate::filter::{Filter, FilterId, FilterIndex};
use crate::snapshot::{Snapshot, SnapshotDocument};
use crate::storage::ComponentStore;
use crate::system::{Prefab, Priority, System};
use crate::EcsError;

// ---------------------------------------------------------------------------
// WorldConfig
// ---------------------------------------------------------------------------

/// Sizing knobs for a [`World`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Initial sparse-array capacity of each component store. Growth rounds
    /// up to the next power of two.
    pub store_capacity: usize,
    /// Initial capacity of the allocator's bitsets.
    pub entity_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            store_capacity: 16,
            entity_capacity: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// TickReport
// ---------------------------------------------------------------------------

/// Timing for the last completed tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// The tick number (1 for the first tick).
    pub tick: u64,
    /// Wall-clock time per system, update plus the flush after it, in
    /// execution order.
    pub system_times: Vec<(&'static str, Duration)>,
    /// Total time for the tick.
    pub total_time: Duration,
}

// ---------------------------------------------------------------------------
// WorldBuilder
// ---------------------------------------------------------------------------

struct SystemSlot {
    name: &'static str,
    type_id: TypeId,
    priority: Priority,
    system: Box<dyn System>,
}

impl fmt::Debug for SystemSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemSlot")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Collects systems, component registrations and listeners, then builds a
/// [`World`].
#[derive(Debug)]
pub struct WorldBuilder {
    config: WorldConfig,
    registry: ComponentRegistry,
    systems: Vec<SystemSlot>,
    hooks: EventHooks,
}

impl WorldBuilder {
    /// A builder with the default [`WorldConfig`].
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// A builder with an explicit configuration.
    pub fn with_config(config: WorldConfig) -> Self {
        Self {
            registry: ComponentRegistry::with_store_capacity(config.store_capacity),
            config,
            systems: Vec::new(),
            hooks: EventHooks::new(),
        }
    }

    /// Register a named, serializable component type.
    pub fn register_component<T>(mut self, name: &str) -> Self
    where
        T: Component + Serialize + DeserializeOwned,
    {
        self.registry.register::<T>(name);
        self
    }

    /// Add `system` with [`Priority::Default`].
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateSystemType`] if a system of the same
    /// concrete type was already added.
    pub fn add_system<S: System>(self, system: S) -> Result<Self, EcsError> {
        self.add_system_with_priority(system, Priority::Default)
    }

    /// Add `system` with an explicit priority.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateSystemType`] if a system of the same
    /// concrete type was already added.
    pub fn add_system_with_priority<S: System>(
        mut self,
        system: S,
        priority: Priority,
    ) -> Result<Self, EcsError> {
        let type_id = TypeId::of::<S>();
        if self.systems.iter().any(|slot| slot.type_id == type_id) {
            return Err(EcsError::DuplicateSystemType {
                system: system.name(),
            });
        }
        self.systems.push(SystemSlot {
            name: system.name(),
            type_id,
            priority,
            system: Box::new(system),
        });
        Ok(self)
    }

    /// Add a listener for [`WorldEvent`]s.
    pub fn on_event<F>(self, listener: F) -> Self
    where
        F: FnMut(&WorldEvent) + 'static,
    {
        self.hooks.subscribe(listener);
        self
    }

    /// The component registrations collected so far.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Rebuild a [`Snapshot`] from a document using this builder's
    /// component registrations.
    pub fn decode_snapshot(&self, document: &SnapshotDocument) -> Result<Snapshot, EcsError> {
        Snapshot::from_document(document, &self.registry)
    }

    /// Build the world, optionally adopting the state held by `snapshot`.
    ///
    /// Systems are ordered by descending priority (stable), set up,
    /// initialized, and the world is flushed once.
    pub fn build(self, snapshot: Option<Snapshot>) -> World {
        let WorldBuilder {
            config,
            mut registry,
            mut systems,
            hooks,
        } = self;

        systems.sort_by(|a, b| b.priority.cmp(&a.priority));
        registry.set_hooks(Some(hooks.clone()));

        let mut allocator = EntityAllocator::with_capacity(config.entity_capacity);
        if let Some(snapshot) = snapshot {
            let (saved_allocator, saved_registry) = snapshot.into_parts();
            allocator = saved_allocator;
            registry.adopt(saved_registry);
            tracing::debug!(
                entities = allocator.live_count(),
                component_types = registry.len(),
                "adopted snapshot"
            );
        }

        let mut world = World {
            config,
            allocator,
            registry,
            filters: FilterIndex::new(),
            systems: Vec::new(),
            hooks,
            dirty: true,
            updating: false,
            tick: 0,
            last_report: TickReport::default(),
        };

        for slot in &mut systems {
            slot.system.setup(&mut world);
        }
        for slot in &mut systems {
            slot.system.initialize(&mut world);
        }
        world.systems = systems;
        world.dirty = true;
        world.flush();

        tracing::debug!(systems = ?world.system_names(), "world built");
        world
    }
}

impl Default for WorldBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Entities, their components, the filters over them, and the systems that
/// update them.
pub struct World {
    config: WorldConfig,
    allocator: EntityAllocator,
    registry: ComponentRegistry,
    filters: FilterIndex,
    /// Execution order. Empty while a tick is running.
    systems: Vec<SystemSlot>,
    hooks: EventHooks,
    /// Whether a flush is owed.
    dirty: bool,
    /// Whether a tick is in progress.
    updating: bool,
    tick: u64,
    last_report: TickReport,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.allocator.live_count())
            .field("component_types", &self.registry.len())
            .field("filters", &self.filters.len())
            .field("systems", &self.system_names())
            .field("tick", &self.tick)
            .finish()
    }
}

impl World {
    /// An empty world with no systems.
    pub fn new() -> Self {
        WorldBuilder::new().build(None)
    }

    // -- entities -----------------------------------------------------------

    /// Create an entity. It is live immediately.
    pub fn create_entity(&mut self) -> Entity {
        let entity = self.allocator.create();
        self.dirty = true;
        self.hooks.emit(WorldEvent::EntityCreated(entity));
        entity
    }

    /// Create an entity and run `prefab` on it.
    ///
    /// # Errors
    ///
    /// Propagates the prefab's error; the entity is destroyed again first.
    pub fn create_entity_from<P>(&mut self, prefab: &P) -> Result<Entity, EcsError>
    where
        P: Prefab + ?Sized,
    {
        let entity = self.create_entity();
        if let Err(e) = prefab.initialize(self, entity) {
            self.destroy_entity(entity)?;
            return Err(e);
        }
        Ok(entity)
    }

    /// Queue `entity` for destruction at the next flush.
    ///
    /// Every component the entity has is queued for removal first
    /// (`ComponentRemoved` fires for each), then `EntityDestroyed` fires.
    /// Destroying an entity that is already queued does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EntityNotFound`] if the entity is not live.
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<(), EcsError> {
        if self.allocator.destroy(entity)? {
            self.registry.remove_all_components(entity);
            self.hooks.emit(WorldEvent::EntityDestroyed(entity));
            self.dirty = true;
        }
        Ok(())
    }

    /// Whether `entity` is live. Entities queued for destruction are live
    /// until the next flush.
    pub fn entity_exists(&self, entity: Entity) -> bool {
        self.allocator.exists(entity)
    }

    /// Copy of the live entity set.
    pub fn live_entities(&self) -> EntitySet {
        self.allocator.live_set()
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.allocator.live_count()
    }

    fn ensure_live(&self, entity: Entity) -> Result<(), EcsError> {
        if self.allocator.exists(entity) {
            Ok(())
        } else {
            Err(EcsError::EntityNotFound { entity })
        }
    }

    // -- components ---------------------------------------------------------

    /// Register a named, serializable component type on a built world.
    pub fn register_component<T>(&mut self, name: &str) -> ComponentTypeId
    where
        T: Component + Serialize + DeserializeOwned,
    {
        self.registry.register::<T>(name)
    }

    /// Bind `component` to `entity`, overwriting any existing `T`. Visible
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EntityNotFound`] if the entity is not live.
    pub fn add_component<T: Component>(
        &mut self,
        entity: Entity,
        component: T,
    ) -> Result<(), EcsError> {
        self.ensure_live(entity)?;
        self.registry.add_component(entity, component);
        self.dirty = true;
        Ok(())
    }

    /// Bind a component decoded from JSON, by registered name.
    ///
    /// # Errors
    ///
    /// - [`EcsError::EntityNotFound`] if the entity is not live.
    /// - [`EcsError::UnknownComponent`] if `name` is not registered.
    /// - [`EcsError::NullComponent`] if `value` is `null`.
    /// - [`EcsError::ComponentDeserializationError`] if decoding fails.
    pub fn insert_json(
        &mut self,
        entity: Entity,
        name: &str,
        value: serde_json::Value,
    ) -> Result<(), EcsError> {
        self.ensure_live(entity)?;
        self.registry.insert_json(entity, name, value)?;
        self.dirty = true;
        Ok(())
    }

    /// Whether `entity` has a `T`. A removal queued this tick still reports
    /// `true` until the next flush.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EntityNotFound`] if the entity is not live.
    pub fn has_component<T: Component>(&self, entity: Entity) -> Result<bool, EcsError> {
        self.ensure_live(entity)?;
        Ok(self.registry.has_component::<T>(entity))
    }

    /// Queue removal of `entity`'s `T` at the next flush. Removing a
    /// component the entity does not have is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EntityNotFound`] if the entity is not live.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.ensure_live(entity)?;
        if self.registry.remove_component::<T>(entity) {
            self.dirty = true;
        }
        Ok(())
    }

    /// The `T` bound to `entity`, if any.
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.registry.store::<T>()?.try_get(entity)
    }

    /// Mutable access to the `T` bound to `entity`, if any.
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.registry.store_mut::<T>()?.get_mut(entity)
    }

    /// The store for `T`, if one exists.
    pub fn store<T: Component>(&self) -> Option<&ComponentStore<T>> {
        self.registry.store::<T>()
    }

    /// The store for `T`, created on demand. Marks the world dirty since
    /// the caller may mutate bindings directly. Bindings on ids that are not
    /// live are dropped at the next flush.
    pub fn store_mut<T: Component>(&mut self) -> &mut ComponentStore<T> {
        self.dirty = true;
        self.registry.store_for::<T>()
    }

    /// The component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    // -- filters ------------------------------------------------------------

    /// Register `consumer` for `filter`. The result is computed at the next
    /// flush.
    pub fn register_filter(&mut self, filter: Filter, consumer: impl Into<String>) -> FilterId {
        let id = self.filters.register(filter, consumer);
        self.dirty = true;
        id
    }

    /// The entity set last published for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidFilterId`] if `id` was not issued by this
    /// world.
    pub fn filtered_entities(&self, id: FilterId) -> Result<Rc<EntitySet>, EcsError> {
        self.filters
            .entities(id)
            .ok_or(EcsError::InvalidFilterId { id })
    }

    /// The entity set last published for a registered filter signature.
    pub fn query(&self, filter: &Filter) -> Option<Rc<EntitySet>> {
        self.filters.entities(self.filters.id_of(filter)?)
    }

    /// The filter index.
    pub fn filters(&self) -> &FilterIndex {
        &self.filters
    }

    // -- events -------------------------------------------------------------

    /// Add a listener for [`WorldEvent`]s.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&WorldEvent) + 'static,
    {
        self.hooks.subscribe(listener);
    }

    // -- tick ---------------------------------------------------------------

    /// Commit queued removals and destructions and recompute every filter,
    /// if anything changed since the last flush. Returns whether a flush
    /// happened.
    pub fn flush(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        // Bindings added after destroy_entity in the same tick go too, as do
        // bindings made through store_mut on ids that were never live.
        let doomed = self.allocator.pending_destroy();
        self.registry.discard_entities(&doomed);
        self.registry.discard_unbound(self.allocator.live_bits());

        let removed = self.registry.flush_all();
        let destroyed = self.allocator.flush();
        self.filters
            .recompute_all(self.allocator.live_bits(), &self.registry);
        self.dirty = false;

        tracing::trace!(
            destroyed,
            removed,
            filters = self.filters.len(),
            "world flushed"
        );
        true
    }

    /// Run one tick: flush, then each system in order followed by a flush.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::Reentrant`] if called from inside a system.
    pub fn update(&mut self) -> Result<(), EcsError> {
        if self.updating {
            return Err(EcsError::Reentrant { operation: "update" });
        }
        self.updating = true;
        let tick_start = Instant::now();
        self.flush();

        let mut systems = std::mem::take(&mut self.systems);
        let mut system_times = Vec::with_capacity(systems.len());
        for slot in &mut systems {
            let start = Instant::now();
            slot.system.update(self);
            self.flush();
            let elapsed = start.elapsed();
            tracing::trace!(system = slot.name, ?elapsed, "system updated");
            system_times.push((slot.name, elapsed));
        }
        self.systems = systems;

        self.tick += 1;
        self.updating = false;
        self.last_report = TickReport {
            tick: self.tick,
            system_times,
            total_time: tick_start.elapsed(),
        };
        Ok(())
    }

    /// Run `count` ticks.
    pub fn run_ticks(&mut self, count: u64) -> Result<(), EcsError> {
        for _ in 0..count {
            self.update()?;
        }
        Ok(())
    }

    /// Remove every entity and component. Component registrations and
    /// filters are kept; filters publish empty sets until the next flush.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::Reentrant`] if called from inside a system.
    pub fn reset(&mut self) -> Result<(), EcsError> {
        if self.updating {
            return Err(EcsError::Reentrant { operation: "reset" });
        }
        self.allocator.reset();
        self.registry.clear_all();
        self.filters.clear_results();
        self.dirty = true;
        tracing::debug!("world reset");
        Ok(())
    }

    /// Deep copy of the entity and component state. Shares nothing with the
    /// world.
    pub fn save(&self) -> Snapshot {
        Snapshot::capture(&self.allocator, &self.registry)
    }

    // -- accessors ----------------------------------------------------------

    /// Number of completed ticks.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Timing for the last completed tick.
    pub fn last_report(&self) -> &TickReport {
        &self.last_report
    }

    /// System names in execution order.
    pub fn system_names(&self) -> Vec<&'static str> {
        self.systems.iter().map(|slot| slot.name).collect()
    }

    /// Number of systems.
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Whether a flush is owed.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a tick is in progress.
    pub fn is_updating(&self) -> bool {
        self.updating
    }

    /// The configuration the world was built with.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Health(u32);
    impl Component for Health {}

    #[derive(Debug, Clone, PartialEq)]
    struct Tag;
    impl Component for Tag {}

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: WorldConfig = serde_json::from_str(r#"{ "store_capacity": 4 }"#).unwrap();
        assert_eq!(config.store_capacity, 4);
        assert_eq!(config.entity_capacity, 64);
    }

    #[test]
    fn store_capacity_comes_from_config() {
        let config = WorldConfig {
            store_capacity: 5,
            ..Default::default()
        };
        let mut world = WorldBuilder::with_config(config).build(None);
        assert_eq!(world.store_mut::<Tag>().capacity(), 8);
    }

    #[test]
    fn operations_on_dead_entities_fail() {
        let mut world = World::new();
        let e = world.create_entity();
        world.destroy_entity(e).unwrap();
        world.flush();

        assert!(matches!(world.destroy_entity(e), Err(EcsError::EntityNotFound { .. })));
        assert!(world.add_component(e, Tag).is_err());
        assert!(world.has_component::<Tag>(e).is_err());
        assert!(world.remove_component::<Tag>(e).is_err());
        assert!(world.insert_json(e, "health", serde_json::json!(1)).is_err());
    }

    #[test]
    fn destroy_cascades_to_components() {
        let mut world = World::new();
        let e = world.create_entity();
        world.add_component(e, Health(3)).unwrap();
        world.add_component(e, Tag).unwrap();

        world.destroy_entity(e).unwrap();
        assert!(world.entity_exists(e));
        assert!(world.has_component::<Health>(e).unwrap());

        world.flush();
        assert!(!world.entity_exists(e));
        assert!(!world.store::<Health>().unwrap().has(e));
        assert!(!world.store::<Tag>().unwrap().has(e));
    }

    #[test]
    fn component_added_after_destroy_does_not_survive() {
        let mut world = World::new();
        let e = world.create_entity();
        world.destroy_entity(e).unwrap();
        world.add_component(e, Health(1)).unwrap();
        world.flush();

        let reused = world.create_entity();
        assert_eq!(reused, e);
        assert!(!world.has_component::<Health>(reused).unwrap());
    }

    #[test]
    fn store_mut_binding_on_unallocated_id_is_dropped_at_flush() {
        let mut world = World::new();
        world.store_mut::<Tag>().add(Entity::new(0), Tag);
        world.flush();
        assert!(!world.store::<Tag>().unwrap().has(Entity::new(0)));

        let fresh = world.create_entity();
        assert_eq!(fresh, Entity::new(0));
        assert!(!world.has_component::<Tag>(fresh).unwrap());
    }

    #[test]
    fn store_mut_binding_on_live_entity_survives_flush() {
        let mut world = World::new();
        let e = world.create_entity();
        world.store_mut::<Health>().add(e, Health(7));
        world.flush();
        assert_eq!(world.get_component::<Health>(e), Some(&Health(7)));
    }

    #[test]
    fn flush_is_skipped_when_clean() {
        let mut world = World::new();
        assert!(!world.flush());
        world.create_entity();
        assert!(world.is_dirty());
        assert!(world.flush());
        assert!(!world.flush());
    }

    #[test]
    fn prefab_failure_destroys_entity() {
        let mut world = World::new();
        let failing = |world: &mut World, entity: Entity| -> Result<(), EcsError> {
            world.add_component(entity, Tag)?;
            Err(EcsError::NullComponent {
                component: "health".to_owned(),
            })
        };
        assert!(world.create_entity_from(&failing).is_err());
        world.flush();
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn insert_json_uses_registered_codec() {
        let mut world = World::new();
        world.register_component::<Health>("health");
        let e = world.create_entity();

        assert!(matches!(
            world.insert_json(e, "health", serde_json::Value::Null),
            Err(EcsError::NullComponent { .. })
        ));
        world.insert_json(e, "health", serde_json::json!(42)).unwrap();
        assert_eq!(world.get_component::<Health>(e), Some(&Health(42)));
    }

    #[test]
    fn reset_clears_state_but_keeps_registrations() {
        let mut world = World::new();
        world.register_component::<Health>("health");
        let e = world.create_entity();
        world.add_component(e, Health(1)).unwrap();
        world.flush();

        world.reset().unwrap();
        assert_eq!(world.entity_count(), 0);
        assert!(world.store::<Health>().unwrap().is_empty());
        assert!(world.registry().lookup_by_name("health").is_some());
        assert_eq!(world.create_entity(), Entity::new(0));
    }

    struct Resetter {
        result: Rc<RefCell<Option<Result<(), EcsError>>>>,
    }

    impl System for Resetter {
        fn update(&mut self, world: &mut World) {
            *self.result.borrow_mut() = Some(world.reset());
        }
    }

    #[test]
    fn reset_inside_a_system_is_rejected() {
        let result = Rc::new(RefCell::new(None));
        let mut world = WorldBuilder::new()
            .add_system(Resetter {
                result: Rc::clone(&result),
            })
            .unwrap()
            .build(None);
        world.update().unwrap();
        assert!(matches!(
            *result.borrow(),
            Some(Err(EcsError::Reentrant { operation: "reset" }))
        ));
    }

    #[test]
    fn tick_report_covers_every_system() {
        struct Noop;
        impl System for Noop {
            fn update(&mut self, _world: &mut World) {}
        }

        let mut world = WorldBuilder::new().add_system(Noop).unwrap().build(None);
        world.run_ticks(3).unwrap();
        assert_eq!(world.tick_count(), 3);
        assert_eq!(world.last_report().tick, 3);
        assert_eq!(world.last_report().system_times.len(), 1);
        assert!(world.last_report().system_times[0].0.ends_with("Noop"));
    }
}
