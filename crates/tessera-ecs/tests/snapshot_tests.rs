//! Snapshot capture, restore, and document encoding through the public API.

use std::cell::RefCell;
use std::rc::Rc;

use tessera_ecs::prelude::*;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Position {
    x: f32,
    y: f32,
}
impl Component for Position {}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Name(String);
impl Component for Name {}

fn builder() -> WorldBuilder {
    WorldBuilder::new()
        .register_component::<Position>("position")
        .register_component::<Name>("name")
}

fn populated_world() -> (World, Vec<Entity>) {
    let mut world = builder().build(None);
    let mut entities = Vec::new();
    for i in 0..5 {
        let e = world.create_entity();
        world
            .add_component(e, Position { x: i as f32, y: -(i as f32) })
            .unwrap();
        if i % 2 == 0 {
            world.add_component(e, Name(format!("unit-{i}"))).unwrap();
        }
        entities.push(e);
    }
    world.flush();
    (world, entities)
}

#[test]
fn snapshot_is_isolated_from_later_world_changes() {
    let (mut world, entities) = populated_world();
    let snapshot = world.save();

    world.get_component_mut::<Position>(entities[0]).unwrap().x = 1000.0;
    world.destroy_entity(entities[1]).unwrap();
    world.flush();

    assert_eq!(snapshot.entity_count(), 5);
    assert!(snapshot.entity_exists(entities[1]));
    assert_eq!(
        snapshot.get_component::<Position>(entities[0]),
        Some(&Position { x: 0.0, y: 0.0 })
    );
}

#[test]
fn restored_world_is_isolated_from_snapshot() {
    let (world, entities) = populated_world();
    let snapshot = world.save();

    let mut restored = builder().build(Some(snapshot.clone()));
    restored.destroy_entity(entities[2]).unwrap();
    restored.flush();

    assert!(!restored.entity_exists(entities[2]));
    assert!(snapshot.entity_exists(entities[2]));
    assert!(snapshot.has_component::<Name>(entities[2]));
}

#[test]
fn restored_world_reuses_ids_lowest_first() {
    let (mut world, entities) = populated_world();
    world.destroy_entity(entities[1]).unwrap();
    world.destroy_entity(entities[3]).unwrap();
    world.flush();

    let mut restored = builder().build(Some(world.save()));
    assert_eq!(restored.create_entity(), entities[1]);
    assert_eq!(restored.create_entity(), entities[3]);
    assert_eq!(restored.create_entity(), Entity::new(5));
}

#[test]
fn restore_does_not_fire_listeners() {
    let (world, _) = populated_world();
    let snapshot = world.save();

    let events = Rc::new(RefCell::new(0usize));
    let sink = Rc::clone(&events);
    let mut restored = builder()
        .on_event(move |_| *sink.borrow_mut() += 1)
        .build(Some(snapshot));
    assert_eq!(*events.borrow(), 0);

    restored.create_entity();
    assert_eq!(*events.borrow(), 1);
}

#[test]
fn filters_see_restored_state_before_first_tick() {
    let (world, entities) = populated_world();
    let snapshot = world.save();

    let mut restored = builder().build(Some(snapshot));
    let named = Filter::builder().require::<Name>().build().unwrap();
    restored.register_filter(named.clone(), "test");
    restored.flush();

    let matching = restored.query(&named).unwrap();
    assert_eq!(matching.to_vec(), vec![entities[0], entities[2], entities[4]]);
}

#[test]
fn document_survives_json_text() {
    let (world, entities) = populated_world();
    let document = world.save().to_document().unwrap();
    let text = serde_json::to_string_pretty(&document).unwrap();

    let parsed: SnapshotDocument = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, document);

    let template = builder();
    let snapshot = template.decode_snapshot(&parsed).unwrap();
    let restored = template.build(Some(snapshot));

    assert_eq!(restored.live_entities(), world.live_entities());
    for &e in &entities {
        assert_eq!(
            restored.get_component::<Position>(e),
            world.get_component::<Position>(e)
        );
        assert_eq!(restored.get_component::<Name>(e), world.get_component::<Name>(e));
    }
}

#[test]
fn document_with_wrong_shape_reports_component() {
    let document: SnapshotDocument = serde_json::from_value(serde_json::json!({
        "live": [0],
        "components": { "position": { "0": { "x": "left" } } }
    }))
    .unwrap();

    let err = builder().decode_snapshot(&document).unwrap_err();
    match err {
        EcsError::ComponentDeserializationError { component, .. } => {
            assert_eq!(component, "position");
        }
        other => panic!("expected ComponentDeserializationError, got {other:?}"),
    }
}

#[test]
fn removal_queued_at_save_time_commits_when_restored() {
    let (mut world, entities) = populated_world();
    world.remove_component::<Name>(entities[0]).unwrap();
    assert!(world.has_component::<Name>(entities[0]).unwrap());

    let snapshot = world.save();
    assert!(snapshot.has_component::<Name>(entities[0]));

    let restored = builder().build(Some(snapshot));
    assert!(!restored.has_component::<Name>(entities[0]).unwrap());
    assert!(restored.has_component::<Position>(entities[0]).unwrap());
    assert_eq!(
        restored.get_component::<Name>(entities[2]),
        Some(&Name("unit-2".to_owned()))
    );
}
