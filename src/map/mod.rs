//! Map implementations
//!
//! This module provides a concurrent map that keeps reads off the lock for
//! keys that are already established.
//!
//! ## Available Maps
//!
//! - [`SyncMap`]: Lock-free reads through a published snapshot, with a
//!   mutex-guarded overlay for new keys
//! - [`AnyKeyMap`]: `SyncMap` keyed by [`AnyKey`], for keys of mixed types
//! - [`FxSyncMap`]: `SyncMap` hashing with `fxhash`
//!
//! ## Choosing a Map
//!
//! - Use `SyncMap` when keys are written once and read many times, or when
//!   threads work on disjoint key sets
//! - Prefer a plain `Mutex<HashMap>` or `RwLock<HashMap>` when most
//!   operations insert brand new keys; every new key takes the lock here
//! - Watch [`MapMetrics::miss_rate`](crate::MapMetrics::miss_rate) to see how
//!   often lookups leave the fast path

mod any_key;
mod cell;
mod sync;

pub use self::any_key::AnyKey;
pub use self::sync::SyncMap;

use std::collections::hash_map::RandomState;

/// A [`SyncMap`] whose keys may be of any hashable type
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use syncmap::{AnyKey, AnyKeyMap};
///
/// let map: AnyKeyMap<&str> = AnyKeyMap::new();
/// map.store(AnyKey::from(1u8), Arc::new("byte"));
/// map.store(AnyKey::from("one"), Arc::new("str"));
///
/// assert_eq!(map.load(&AnyKey::from(1u8)).as_deref(), Some(&"byte"));
/// assert_eq!(map.load(&AnyKey::from(1u16)), None);
/// ```
pub type AnyKeyMap<V, S = RandomState> = SyncMap<AnyKey, V, S>;

/// A [`SyncMap`] using the `fxhash` hasher
pub type FxSyncMap<K, V> = SyncMap<K, V, fxhash::FxBuildHasher>;


#[cfg(test)]
mod proptests;
