//! Core ECS throughput benchmarks.
//!
//! - entity churn: create, destroy, flush, reuse
//! - filter recomputation as the number of distinct signatures grows
//! - a full tick with a filtered movement system
//! - snapshot capture
//!
//! Run with: `cargo bench --bench ecs_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use tessera_ecs::prelude::*;

// ---------------------------------------------------------------------------
// Benchmark component types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Position {
    x: f64,
    y: f64,
}
impl Component for Position {}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Velocity {
    dx: f64,
    dy: f64,
}
impl Component for Velocity {}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Health(u32);
impl Component for Health {}

struct Movement;

impl FilteredSystem for Movement {
    fn filter(&self) -> Filter {
        Filter::builder()
            .require::<Position>()
            .require::<Velocity>()
            .build()
            .expect("disjoint filter")
    }

    fn update_entity(&mut self, world: &mut World, entity: Entity) {
        let Some(v) = world.get_component::<Velocity>(entity).cloned() else {
            return;
        };
        if let Some(p) = world.get_component_mut::<Position>(entity) {
            p.x += v.dx;
            p.y += v.dy;
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn populate(world: &mut World, entity_count: usize) -> Vec<Entity> {
    let mut entities = Vec::with_capacity(entity_count);
    for i in 0..entity_count {
        let e = world.create_entity();
        world
            .add_component(e, Position { x: i as f64, y: 0.0 })
            .expect("entity is live");
        if i % 2 == 0 {
            world
                .add_component(e, Velocity { dx: 1.0, dy: 0.5 })
                .expect("entity is live");
        }
        if i % 3 == 0 {
            world.add_component(e, Health(100)).expect("entity is live");
        }
        entities.push(e);
    }
    world.flush();
    entities
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_entity_churn(c: &mut Criterion) {
    let mut world = World::new();
    let entities = populate(&mut world, 10_000);

    c.bench_function("churn_1k_of_10k", |b| {
        b.iter(|| {
            for &e in entities.iter().step_by(10) {
                world.destroy_entity(e).expect("entity is live");
            }
            world.flush();
            for _ in 0..1_000 {
                black_box(world.create_entity());
            }
            world.flush();
        });
    });
}

fn bench_filter_recompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_recompute_10k");
    for signatures in [1usize, 4, 8] {
        let mut world = World::new();
        let entities = populate(&mut world, 10_000);
        let filters = [
            Filter::builder().require::<Position>().build(),
            Filter::builder().require::<Velocity>().build(),
            Filter::builder().require::<Health>().build(),
            Filter::builder().require::<Position>().exclude::<Health>().build(),
            Filter::builder().require::<Position>().require::<Velocity>().build(),
            Filter::builder().require::<Velocity>().exclude::<Health>().build(),
            Filter::builder().exclude::<Velocity>().build(),
            Filter::builder().require::<Health>().exclude::<Velocity>().build(),
        ];
        for filter in filters.into_iter().take(signatures) {
            world.register_filter(filter.expect("disjoint filter"), "bench");
        }

        group.bench_with_input(BenchmarkId::from_parameter(signatures), &signatures, |b, _| {
            b.iter(|| {
                world
                    .add_component(entities[0], Health(1))
                    .expect("entity is live");
                black_box(world.flush());
            });
        });
    }
    group.finish();
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("movement_tick");
    for count in [1_000usize, 10_000] {
        let mut world = WorldBuilder::new()
            .add_system(Filtered::new(Movement))
            .expect("single system")
            .build(None);
        populate(&mut world, count);

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| world.update().expect("not reentrant"));
        });
    }
    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut world = WorldBuilder::new()
        .register_component::<Position>("position")
        .register_component::<Velocity>("velocity")
        .register_component::<Health>("health")
        .build(None);
    populate(&mut world, 10_000);

    c.bench_function("save_10k", |b| b.iter(|| black_box(world.save())));
    c.bench_function("to_document_10k", |b| {
        let snapshot = world.save();
        b.iter(|| black_box(snapshot.to_document().expect("encodable")));
    });
}

criterion_group!(
    benches,
    bench_entity_churn,
    bench_filter_recompute,
    bench_tick,
    bench_snapshot
);
criterion_main!(benches);
