//! Property tests for the deferred-commit protocol.
//!
//! Random operation sequences run against a [`World`] and a plain model of
//! what each operation should make observable, checked after every step.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use tessera_ecs::prelude::*;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Health(i32);
impl Component for Health {}

#[derive(Debug, Clone)]
enum WorldOp {
    Create,
    Destroy(usize),
    Add(usize, i32),
    Remove(usize),
    Flush,
}

fn world_op_strategy() -> impl Strategy<Value = WorldOp> {
    prop_oneof![
        3 => Just(WorldOp::Create),
        1 => (0..64usize).prop_map(WorldOp::Destroy),
        2 => (0..64usize, -100i32..100).prop_map(|(i, v)| WorldOp::Add(i, v)),
        1 => (0..64usize).prop_map(WorldOp::Remove),
        1 => Just(WorldOp::Flush),
    ]
}

/// What the world should report.
#[derive(Default)]
struct Model {
    live: BTreeSet<u32>,
    pending_destroy: BTreeSet<u32>,
    health: BTreeMap<u32, i32>,
    pending_removal: BTreeSet<u32>,
}

impl Model {
    fn pick(&self, i: usize) -> Option<Entity> {
        if self.live.is_empty() {
            return None;
        }
        self.live.iter().nth(i % self.live.len()).copied().map(Entity::new)
    }

    fn flush(&mut self) {
        for id in std::mem::take(&mut self.pending_removal) {
            self.health.remove(&id);
        }
        for id in std::mem::take(&mut self.pending_destroy) {
            self.live.remove(&id);
            self.health.remove(&id);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn world_matches_model(ops in prop::collection::vec(world_op_strategy(), 1..80)) {
        let mut world = World::new();
        let health_filter = world.register_filter(
            Filter::builder().require::<Health>().build().unwrap(),
            "model",
        );
        let mut model = Model::default();

        for op in ops {
            match op {
                WorldOp::Create => {
                    let e = world.create_entity();
                    prop_assert!(!model.live.contains(&e.id()), "reused a live id: {e:?}");
                    model.live.insert(e.id());
                }
                WorldOp::Destroy(i) => {
                    if let Some(e) = model.pick(i) {
                        world.destroy_entity(e).unwrap();
                        if model.health.contains_key(&e.id()) {
                            model.pending_removal.insert(e.id());
                        }
                        model.pending_destroy.insert(e.id());
                    }
                }
                WorldOp::Add(i, v) => {
                    if let Some(e) = model.pick(i) {
                        world.add_component(e, Health(v)).unwrap();
                        model.health.insert(e.id(), v);
                        model.pending_removal.remove(&e.id());
                    }
                }
                WorldOp::Remove(i) => {
                    if let Some(e) = model.pick(i) {
                        world.remove_component::<Health>(e).unwrap();
                        if model.health.contains_key(&e.id()) {
                            model.pending_removal.insert(e.id());
                        }
                    }
                }
                WorldOp::Flush => {
                    world.flush();
                    model.flush();

                    let expected: Vec<Entity> =
                        model.health.keys().copied().map(Entity::new).collect();
                    let published = world.filtered_entities(health_filter).unwrap();
                    prop_assert_eq!(published.to_vec(), expected);
                }
            }

            prop_assert_eq!(world.entity_count(), model.live.len());
            for &id in &model.live {
                let e = Entity::new(id);
                prop_assert!(world.entity_exists(e));
                prop_assert_eq!(
                    world.get_component::<Health>(e).map(|h| h.0),
                    model.health.get(&id).copied()
                );
            }
        }
    }

    #[test]
    fn flushed_ids_are_reused_lowest_first(
        population in 1..100usize,
        doomed in prop::collection::btree_set(0..100u32, 1..20),
    ) {
        let mut world = World::new();
        for _ in 0..population {
            world.create_entity();
        }
        let doomed: Vec<u32> = doomed
            .into_iter()
            .filter(|&id| (id as usize) < population)
            .collect();
        for &id in &doomed {
            world.destroy_entity(Entity::new(id)).unwrap();
        }
        world.flush();

        for &id in &doomed {
            prop_assert_eq!(world.create_entity().id(), id);
        }
        prop_assert_eq!(world.create_entity().id(), population as u32);
    }
}
