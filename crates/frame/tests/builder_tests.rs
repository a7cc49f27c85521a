//! Builder editing semantics

mod common;

use frame_store::{Builder, Handle, Store};
use proptest::prelude::*;

const NAMES: [&str; 4] = ["a", "b", "c", "d"];

#[test]
fn test_insertion_order_is_kept() {
    common::init_tracing();
    let store = Store::new();
    let mut builder = Builder::new(&store);
    for (i, name) in NAMES.iter().enumerate() {
        builder.add(*name, i as i32);
    }
    let frame = builder.create();
    let names: Vec<Handle> = frame.iter().map(|slot| slot.name).collect();
    let expected: Vec<Handle> = NAMES.iter().map(|n| store.lookup(n)).collect();
    assert_eq!(names, expected);
}

#[test]
fn test_add_from_copies_slots() {
    let store = Store::new();
    let source = Builder::new(&store).add("x", 1).add("y", 2).create();
    let mut builder = Builder::new(&store);
    builder.add("w", 0).add_from(source.handle());
    builder.add_from(Handle::int(3));
    let copy = builder.create();
    assert_eq!(copy.size(), 3);
    assert_eq!(copy.get_int("y"), 2);
    assert_ne!(copy, source);
}

#[test]
fn test_abandoned_builder_changes_nothing() {
    let store = Store::new();
    let frame = Builder::new(&store).add("v", 1).create();
    {
        let mut edit = Builder::from_frame(&frame);
        edit.set("v", 100).add("extra", true);
    }
    assert_eq!(frame.get_int("v"), 1);
    assert_eq!(frame.size(), 1);
}

#[test]
fn test_update_without_target_creates() {
    let store = Store::new();
    let mut builder = Builder::new(&store);
    assert!(builder.is_new());
    builder.add("v", 1);
    let frame = builder.update();
    assert!(!frame.is_nil());
    assert_eq!(frame.get_int("v"), 1);
}

proptest! {
    #[test]
    fn prop_delete_removes_all_and_keeps_order(
        picks in proptest::collection::vec(0usize..NAMES.len(), 0..20),
        victim in 0usize..NAMES.len(),
    ) {
        let store = Store::new();
        let mut builder = Builder::new(&store);
        for (i, &p) in picks.iter().enumerate() {
            builder.add(NAMES[p], i as i32);
        }
        builder.delete(NAMES[victim]);

        let expected: Vec<(Handle, Handle)> = picks
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p != victim)
            .map(|(i, &p)| (store.lookup(NAMES[p]), Handle::int(i as i64)))
            .collect();
        let actual: Vec<(Handle, Handle)> = builder
            .slots()
            .iter()
            .map(|slot| (slot.name, slot.value))
            .collect();
        prop_assert_eq!(actual, expected);
    }
}
