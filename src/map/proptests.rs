//! Property-based tests for `SyncMap` using proptest
//!
//! A single-threaded run of any operation sequence must agree with a plain
//! `HashMap` model, whatever mix of snapshot hits, overlay hits, promotions
//! and rebuilds the sequence happens to trigger.

use super::*;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone)]
enum Op {
    Load(u8),
    Store(u8, u32),
    StoreNone(u8),
    LoadOrStore(u8, u32),
    LoadAndDelete(u8),
    Swap(u8, u32),
    CompareAndSwapCurrent(u8, u32),
    CompareAndSwapStale(u8, u32),
    CompareAndDeleteCurrent(u8),
    Range,
    Clear,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // A small key space keeps hits, misses and resurrections frequent.
    let key = 0u8..16;
    prop_oneof![
        4 => key.clone().prop_map(Op::Load),
        4 => (key.clone(), any::<u32>()).prop_map(|(k, v)| Op::Store(k, v)),
        1 => key.clone().prop_map(Op::StoreNone),
        2 => (key.clone(), any::<u32>()).prop_map(|(k, v)| Op::LoadOrStore(k, v)),
        2 => key.clone().prop_map(Op::LoadAndDelete),
        2 => (key.clone(), any::<u32>()).prop_map(|(k, v)| Op::Swap(k, v)),
        1 => (key.clone(), any::<u32>()).prop_map(|(k, v)| Op::CompareAndSwapCurrent(k, v)),
        1 => (key.clone(), any::<u32>()).prop_map(|(k, v)| Op::CompareAndSwapStale(k, v)),
        1 => key.prop_map(Op::CompareAndDeleteCurrent),
        1 => Just(Op::Range),
        1 => Just(Op::Clear),
    ]
}

/// Property: every operation agrees with a `HashMap` model
#[cfg(test)]
mod sequential_properties {
    use super::*;

    proptest! {
        #[test]
        fn test_matches_hash_map_model(ops in prop::collection::vec(op_strategy(), 1..200)) {
            let map: SyncMap<u8, u32> = SyncMap::new();
            let mut model: HashMap<u8, u32> = HashMap::new();

            for op in ops {
                match op {
                    Op::Load(k) => {
                        prop_assert_eq!(map.load(&k).as_deref().copied(), model.get(&k).copied());
                    }
                    Op::Store(k, v) => {
                        map.store(k, Arc::new(v));
                        model.insert(k, v);
                    }
                    Op::StoreNone(k) => {
                        map.store(k, None);
                        model.remove(&k);
                    }
                    Op::LoadOrStore(k, v) => {
                        let (actual, loaded) = map.load_or_store(k, Arc::new(v));
                        let expected_loaded = model.contains_key(&k);
                        let expected = *model.entry(k).or_insert(v);
                        prop_assert_eq!(loaded, expected_loaded);
                        prop_assert_eq!(*actual, expected);
                    }
                    Op::LoadAndDelete(k) => {
                        prop_assert_eq!(map.load_and_delete(&k).as_deref().copied(), model.remove(&k));
                    }
                    Op::Swap(k, v) => {
                        prop_assert_eq!(map.swap(k, Arc::new(v)).as_deref().copied(), model.insert(k, v));
                    }
                    Op::CompareAndSwapCurrent(k, v) => {
                        let swapped = match map.load(&k) {
                            Some(current) => map.compare_and_swap(&k, &current, Arc::new(v)),
                            None => false,
                        };
                        prop_assert_eq!(swapped, model.contains_key(&k));
                        if swapped {
                            model.insert(k, v);
                        }
                    }
                    Op::CompareAndSwapStale(k, v) => {
                        // A fresh handle never matches, even with equal contents.
                        let stale = Arc::new(model.get(&k).copied().unwrap_or(v));
                        prop_assert!(!map.compare_and_swap(&k, &stale, Arc::new(v)));
                        prop_assert!(!map.compare_and_delete(&k, &stale));
                    }
                    Op::CompareAndDeleteCurrent(k) => {
                        let deleted = match map.load(&k) {
                            Some(current) => map.compare_and_delete(&k, &current),
                            None => false,
                        };
                        prop_assert_eq!(deleted, model.remove(&k).is_some());
                    }
                    Op::Range => {
                        let mut seen = HashMap::new();
                        map.range(|k, v| {
                            seen.insert(*k, **v);
                            true
                        });
                        prop_assert_eq!(&seen, &model);
                    }
                    Op::Clear => {
                        map.clear();
                        model.clear();
                    }
                }
            }

            prop_assert_eq!(map.len(), model.len());
            for (k, v) in &model {
                prop_assert_eq!(map.load(k).as_deref().copied(), Some(*v));
            }
        }

        #[test]
        fn test_range_stops_when_visitor_declines(
            keys in prop::collection::hash_set(any::<u16>(), 1..100),
            limit in 1usize..100
        ) {
            let map: SyncMap<u16, u16> = keys.iter().map(|&k| (k, Arc::new(k))).collect();
            let mut visited = 0;
            map.range(|_, _| {
                visited += 1;
                visited < limit
            });
            prop_assert_eq!(visited, limit.min(keys.len()));
        }
    }
}

/// Property: concurrent writers on disjoint keys never lose a write
#[cfg(test)]
mod concurrent_properties {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_disjoint_writers_preserve_all_keys(
            per_thread in prop::collection::vec(
                prop::collection::vec(any::<u32>(), 1..50),
                2..5
            )
        ) {
            let map: Arc<SyncMap<(usize, usize), u32>> = Arc::new(SyncMap::new());

            let handles: Vec<_> = per_thread
                .iter()
                .cloned()
                .enumerate()
                .map(|(thread_id, values)| {
                    let map = Arc::clone(&map);
                    thread::spawn(move || {
                        for (i, value) in values.into_iter().enumerate() {
                            map.store((thread_id, i), Arc::new(value));
                            if i % 3 == 0 {
                                map.load(&(thread_id, i / 2));
                            }
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            let expected: usize = per_thread.iter().map(Vec::len).sum();
            prop_assert_eq!(map.len(), expected);
            for (thread_id, values) in per_thread.iter().enumerate() {
                for (i, value) in values.iter().enumerate() {
                    prop_assert_eq!(map.load(&(thread_id, i)).as_deref().copied(), Some(*value));
                }
            }
        }
    }
}
