use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use chunk_scavenger::collision::{CollisionMap, StreamHandle, StreamHandleKind};
use chunk_scavenger::hash::{LongHasher, Xxh3Hasher};
use chunk_scavenger::map::{InMemoryScavengeMap, ScavengeMap};

type Known = Arc<RwLock<HashSet<String>>>;

fn category_hash(key: &String) -> u64 {
    // "ab-1" and "ab-2" share the category "ab"
    let category = key.split('-').next().unwrap_or_default();
    Xxh3Hasher.hash(category)
}

fn map_with_hasher(hasher: Arc<dyn LongHasher<String>>) -> (CollisionMap<String, u32>, Known) {
    let known: Known = Arc::new(RwLock::new(HashSet::new()));
    let is_collision = {
        let known = Arc::clone(&known);
        Arc::new(move |key: &String| known.read().contains(key))
    };
    let map = CollisionMap::new(
        hasher,
        is_collision,
        Box::new(InMemoryScavengeMap::new()),
        Box::new(InMemoryScavengeMap::new()),
    );
    (map, known)
}

fn collide(map: &mut CollisionMap<String, u32>, known: &Known, key: &str) {
    known.write().insert(key.to_string());
    map.notify_collision(&key.to_string()).unwrap();
}

#[test]
fn test_collisions_discovered_after_insert() {
    let (mut map, known) = map_with_hasher(Arc::new(category_hash));

    map.set("ab-1".to_string(), 1).unwrap();
    map.set("cd-1".to_string(), 5).unwrap();

    // "ab-2" shows up later and collides with "ab-1"
    collide(&mut map, &known, "ab-1");
    collide(&mut map, &known, "ab-2");
    map.set("ab-2".to_string(), 2).unwrap();

    assert_eq!(map.try_get_value(&"ab-1".to_string()).unwrap(), Some(1));
    assert_eq!(map.try_get_value(&"ab-2".to_string()).unwrap(), Some(2));
    assert_eq!(map.try_get_value(&"cd-1".to_string()).unwrap(), Some(5));
    assert_eq!(map.try_get_value(&"ef-1".to_string()).unwrap(), None);

    let handles: Vec<StreamHandleKind> = map
        .enumerate(&StreamHandle::None)
        .unwrap()
        .map(|(handle, _)| handle.kind())
        .collect();
    assert_eq!(
        handles,
        vec![StreamHandleKind::Id, StreamHandleKind::Id, StreamHandleKind::Hash]
    );
}

#[test]
fn test_overwrite_keeps_single_entry() {
    let (mut map, known) = map_with_hasher(Arc::new(Xxh3Hasher));
    map.set("ab-1".to_string(), 1).unwrap();
    map.set("ab-1".to_string(), 2).unwrap();
    assert_eq!(map.enumerate(&StreamHandle::None).unwrap().count(), 1);

    collide(&mut map, &known, "ab-1");
    map.set("ab-1".to_string(), 3).unwrap();

    let all: Vec<_> = map.enumerate(&StreamHandle::None).unwrap().collect();
    assert_eq!(all, vec![(StreamHandle::Id("ab-1".to_string()), 3)]);
}

#[test]
fn test_handle_lookup_matches_key_lookup() {
    let (mut map, known) = map_with_hasher(Arc::new(Xxh3Hasher));
    for (i, stream) in ["ab-1", "cd-2", "ef-3", "gh-4"].iter().enumerate() {
        map.set(stream.to_string(), i as u32).unwrap();
    }
    collide(&mut map, &known, "cd-2");

    for (handle, value) in map.enumerate(&StreamHandle::None).unwrap() {
        assert_eq!(map.try_get_value_by_handle(&handle).unwrap(), Some(value));
    }
    assert_eq!(map.try_get_value_by_handle(&StreamHandle::None).unwrap(), None);
}

#[test]
fn test_enumerate_resumes_from_every_checkpoint() {
    let (mut map, known) = map_with_hasher(Arc::new(category_hash));
    for stream in ["ab-1", "ab-2", "ab-3"] {
        collide(&mut map, &known, stream);
    }
    for (i, stream) in ["ab-1", "ab-2", "ab-3", "cd-1", "ef-1", "gh-1"].iter().enumerate() {
        map.set(stream.to_string(), i as u32).unwrap();
    }

    let all: Vec<_> = map.enumerate(&StreamHandle::None).unwrap().collect();
    // colliding streams never share the "ab" hash entry
    assert_eq!(all.len(), 6);
    assert!(all[..3]
        .iter()
        .all(|(handle, _)| handle.kind() == StreamHandleKind::Id));

    for (i, (checkpoint, _)) in all.iter().enumerate() {
        let resumed: Vec<_> = map.enumerate(checkpoint).unwrap().collect();
        assert_eq!(resumed, all[i + 1..].to_vec(), "resume after {checkpoint}");
    }
}

#[test]
fn test_inactive_records_are_not_enumerated() {
    let known: Known = Arc::new(RwLock::new(HashSet::new()));
    let is_collision = {
        let known = Arc::clone(&known);
        Arc::new(move |key: &String| known.read().contains(key))
    };
    // zero marks a logically deleted entry
    let mut map: CollisionMap<String, u32> = CollisionMap::new(
        Arc::new(Xxh3Hasher),
        is_collision,
        Box::new(InMemoryScavengeMap::with_filter(|_: &u64, v: &u32| *v != 0)),
        Box::new(InMemoryScavengeMap::with_filter(|_: &String, v: &u32| *v != 0)),
    );

    map.set("ab-1".to_string(), 0).unwrap();
    map.set("cd-1".to_string(), 4).unwrap();

    let all: Vec<_> = map.enumerate(&StreamHandle::None).unwrap().collect();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].1, 4);
    // still reachable by key
    assert_eq!(map.try_get_value(&"ab-1".to_string()).unwrap(), Some(0));
}

#[test]
fn test_backing_map_snapshot_iteration() {
    let mut map = InMemoryScavengeMap::new();
    for key in 0u64..5 {
        map.set(key, key * 10).unwrap();
    }

    // values may be overwritten while walking a snapshot
    for (key, value) in map.active_records().unwrap() {
        map.set(key, value + 1).unwrap();
    }

    let values: Vec<u64> = map.all_records().unwrap().map(|(_, v)| v).collect();
    assert_eq!(values, vec![1, 11, 21, 31, 41]);

    let after: Vec<u64> = map
        .active_records_from_checkpoint(&2)
        .unwrap()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(after, vec![3, 4]);
    assert_eq!(map.try_remove(&3).unwrap(), Some(31));
    assert_eq!(map.try_remove(&3).unwrap(), None);
}
