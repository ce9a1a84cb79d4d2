//! Snapshot/Overlay Concurrent Map
//!
//! This module implements [`SyncMap`], a concurrent map whose reads are
//! lock-free as long as the key is already part of the published snapshot.
//!
//! ## Design
//!
//! The map keeps two tables of shared [`ValueCell`]s:
//!
//! - **Snapshot**: an immutable table plus an `amended` flag, published
//!   through an epoch-protected atomic pointer. Readers load it without
//!   locking. It is never mutated; a new snapshot replaces it wholesale.
//! - **Dirty overlay**: a mutable table behind a mutex. When it exists it
//!   holds every non-expunged snapshot cell plus every key inserted since the
//!   last promotion. `amended` on the snapshot says the overlay may hold keys
//!   the snapshot lacks.
//!
//! Updates to keys present in the snapshot are CAS operations on the cell and
//! never take the lock. Inserting a new key takes the lock, builds the overlay
//! if needed (tombstoning absent cells so they can be dropped from it), and
//! adds a fresh cell.
//!
//! Every lookup that has to fall back to the overlay counts as a miss. Once
//! the misses reach the overlay's size the overlay is promoted to be the new
//! snapshot, so the cost of a slow lookup is amortized over the keys it
//! eventually makes fast.
//!
//! ## Memory Ordering
//!
//! - Snapshot and cell nodes are published with `AcqRel` swaps/CAS and read
//!   with `Acquire`, so a completed write to a key is visible to later reads
//!   of that key
//! - Retired nodes are reclaimed through `crossbeam_epoch`
//!
//! ## Performance Characteristics
//!
//! - **Load / update of a snapshot key**: lock-free
//! - **Insert of a new key**: takes the lock; O(n) when the overlay must be
//!   rebuilt, O(1) otherwise
//! - **Load of an overlay-only key**: takes the lock; amortized O(1) through
//!   promotion
//! - **Range**: O(n), takes the lock at most once to promote the overlay

use super::cell::ValueCell;
use crate::metrics::{AtomicMetrics, MapMetrics, MetricsCollector};
use crate::util::CachePadded;
use crate::{Error, Result};
use core::borrow::Borrow;
use core::convert::Infallible;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::sync::atomic::{AtomicBool, Ordering};
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned};
use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::sync::Arc;

type Table<K, V, S> = HashMap<K, Arc<ValueCell<V>>, S>;

/// Immutable, lock-free readable view of the map
struct Snapshot<K, V, S> {
    entries: Arc<Table<K, V, S>>,
    // The overlay may hold keys missing from `entries`.
    amended: bool,
}

impl<K, V, S> Snapshot<K, V, S> {
    fn empty(hasher: S) -> Self {
        Self {
            entries: Arc::new(HashMap::with_hasher(hasher)),
            amended: false,
        }
    }

    fn promoted(entries: Table<K, V, S>) -> Self {
        Self {
            entries: Arc::new(entries),
            amended: false,
        }
    }

    /// Same entries, flagged as amended
    fn amend(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            amended: true,
        }
    }
}

/// State owned by the lock holder
struct Overlay<K, V, S> {
    entries: Option<Table<K, V, S>>,
    misses: usize,
}

impl<K, V, S> Overlay<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn get<Q>(&self, key: &Q) -> Option<&Arc<ValueCell<V>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.as_ref()?.get(key)
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<Arc<ValueCell<V>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.as_mut()?.remove(key)
    }
}

/// A concurrent map with lock-free reads
///
/// Values are shared [`Arc`] handles. Storing `None` is the same as deleting,
/// and the compare-and-swap family compares handles with [`Arc::ptr_eq`], not
/// by content.
///
/// The map is optimized for two access patterns: keys that are written once
/// and read many times, and threads that work on disjoint sets of keys. Both
/// keep almost every operation on the lock-free fast path.
///
/// # Type Parameters
///
/// * `K` - The key type, must implement `Hash + Eq + Clone + Send + Sync`
/// * `V` - The value type, must implement `Send + Sync`
/// * `S` - The hasher, [`RandomState`] by default
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::thread;
/// use syncmap::SyncMap;
///
/// let map = Arc::new(SyncMap::new());
///
/// let writer = thread::spawn({
///     let map = Arc::clone(&map);
///     move || {
///         for i in 0..100 {
///             map.store(i, Arc::new(i * 2));
///         }
///     }
/// });
/// writer.join().unwrap();
///
/// assert_eq!(map.load(&21).as_deref(), Some(&42));
/// assert_eq!(map.len(), 100);
/// ```
pub struct SyncMap<K, V, S = RandomState> {
    read: CachePadded<Atomic<Snapshot<K, V, S>>>,
    dirty: Mutex<Overlay<K, V, S>>,
    hasher: S,
    metrics: AtomicMetrics,
    metrics_enabled: AtomicBool,
}

impl<K, V> SyncMap<K, V, RandomState> {
    /// Create an empty map
    ///
    /// # Examples
    ///
    /// ```rust
    /// use syncmap::SyncMap;
    ///
    /// let map: SyncMap<u64, String> = SyncMap::new();
    /// assert!(map.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K, V, S: Clone> SyncMap<K, V, S> {
    /// Create an empty map that hashes keys with `hasher`
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fxhash::FxBuildHasher;
    /// use syncmap::SyncMap;
    ///
    /// let map: SyncMap<u64, u64, _> = SyncMap::with_hasher(FxBuildHasher::default());
    /// ```
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            read: CachePadded::new(Atomic::new(Snapshot::empty(hasher.clone()))),
            dirty: Mutex::new(Overlay {
                entries: None,
                misses: 0,
            }),
            hasher,
            metrics: AtomicMetrics::default(),
            metrics_enabled: AtomicBool::new(true),
        }
    }
}

impl<K, V, S> SyncMap<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Load the value stored for `key`
    ///
    /// Lock-free when the key is part of the current snapshot.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use syncmap::SyncMap;
    ///
    /// let map = SyncMap::new();
    /// map.store(String::from("a"), Arc::new(1));
    /// assert_eq!(map.load("a").as_deref(), Some(&1));
    /// assert_eq!(map.load("b"), None);
    /// ```
    pub fn load<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let guard = &epoch::pin();
        let read = self.snapshot(guard);
        if let Some(cell) = read.entries.get(key) {
            return cell.load(guard);
        }
        if !read.amended {
            return None;
        }

        self.lookup_locked(key, false, guard)?.load(guard)
    }

    /// Set the value for `key`
    ///
    /// Storing `None` deletes the key.
    pub fn store(&self, key: K, value: impl Into<Option<Arc<V>>>) {
        self.swap(key, value);
    }

    /// Set the value for `key`, returning the previous value if there was one
    ///
    /// Swapping in `None` deletes the key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use syncmap::SyncMap;
    ///
    /// let map = SyncMap::new();
    /// assert_eq!(map.swap(1, Arc::new("one")), None);
    /// assert_eq!(map.swap(1, Arc::new("uno")).as_deref(), Some(&"one"));
    /// assert_eq!(map.swap(1, None).as_deref(), Some(&"uno"));
    /// assert_eq!(map.load(&1), None);
    /// ```
    pub fn swap(&self, key: K, value: impl Into<Option<Arc<V>>>) -> Option<Arc<V>> {
        let guard = &epoch::pin();
        let mut value = value.into();
        if let Some(cell) = self.snapshot(guard).entries.get(&key) {
            match cell.try_swap(value, guard) {
                Ok(previous) => return previous,
                Err(rejected) => value = rejected,
            }
        }

        let mut overlay = self.dirty.lock();
        self.record(AtomicMetrics::record_locked);
        let read = self.snapshot(guard);
        if let Some(cell) = read.entries.get(&key) {
            self.relink_locked(&mut overlay, read, key, cell, guard);
            cell.swap_locked(value, guard)
        } else if let Some(cell) = overlay.get(&key) {
            cell.swap_locked(value, guard)
        } else {
            // Deleting a key that exists nowhere changes nothing.
            if value.is_some() {
                self.insert_locked(&mut overlay, read, key, ValueCell::new(value), guard);
            }
            None
        }
    }

    /// Return the existing value for `key`, or store `value` if there is none
    ///
    /// The boolean is `true` if the value was already present. When several
    /// threads race on an absent key, exactly one of them stores its value and
    /// every caller gets that same handle back.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use syncmap::SyncMap;
    ///
    /// let map = SyncMap::new();
    /// let (first, loaded) = map.load_or_store("k", Arc::new(1));
    /// assert!(!loaded);
    ///
    /// let (actual, loaded) = map.load_or_store("k", Arc::new(2));
    /// assert!(loaded);
    /// assert!(Arc::ptr_eq(&first, &actual));
    /// ```
    pub fn load_or_store(&self, key: K, value: Arc<V>) -> (Arc<V>, bool) {
        let guard = &epoch::pin();
        let mut value = value;
        if let Some(cell) = self.snapshot(guard).entries.get(&key) {
            match cell.try_load_or_store(value, guard) {
                Ok(result) => return result,
                Err(rejected) => value = rejected,
            }
        }

        let mut overlay = self.dirty.lock();
        self.record(AtomicMetrics::record_locked);
        let read = self.snapshot(guard);
        if let Some(cell) = read.entries.get(&key) {
            self.relink_locked(&mut overlay, read, key, cell, guard);
            Self::load_or_store_locked(cell, value, guard)
        } else if let Some(cell) = overlay.get(&key).cloned() {
            let result = Self::load_or_store_locked(&cell, value, guard);
            self.miss_locked(&mut overlay, guard);
            result
        } else {
            let cell = ValueCell::new(Some(Arc::clone(&value)));
            self.insert_locked(&mut overlay, read, key, cell, guard);
            (value, false)
        }
    }

    /// Delete `key`, returning the value it had
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use syncmap::SyncMap;
    ///
    /// let map = SyncMap::new();
    /// map.store(7, Arc::new('x'));
    /// assert_eq!(map.load_and_delete(&7).as_deref(), Some(&'x'));
    /// assert_eq!(map.load_and_delete(&7), None);
    /// ```
    pub fn load_and_delete<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let guard = &epoch::pin();
        let read = self.snapshot(guard);
        if let Some(cell) = read.entries.get(key) {
            return cell.delete(guard);
        }
        if !read.amended {
            return None;
        }

        self.lookup_locked(key, true, guard)?.delete(guard)
    }

    /// Delete `key`
    pub fn delete<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.load_and_delete(key);
    }

    /// Replace the value of `key` with `new` if its current value is the
    /// `old` handle
    ///
    /// Like [`compare_and_swap`](Self::compare_and_swap), but reports why the
    /// swap did not happen.
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`] if the key has no value
    /// * [`Error::Mismatch`] if the current value is a different handle
    pub fn try_compare_and_swap<Q>(
        &self,
        key: &Q,
        old: &Arc<V>,
        new: impl Into<Option<Arc<V>>>,
    ) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let guard = &epoch::pin();
        let new = new.into();
        let read = self.snapshot(guard);
        if let Some(cell) = read.entries.get(key) {
            return cell.compare_and_swap(old, new, guard);
        }
        if !read.amended {
            return Err(Error::NotFound);
        }

        let mut overlay = self.dirty.lock();
        self.record(AtomicMetrics::record_locked);
        let read = self.snapshot(guard);
        if let Some(cell) = read.entries.get(key) {
            cell.compare_and_swap(old, new, guard)
        } else if let Some(cell) = overlay.get(key).cloned() {
            let result = cell.compare_and_swap(old, new, guard);
            self.miss_locked(&mut overlay, guard);
            result
        } else {
            Err(Error::NotFound)
        }
    }

    /// Replace the value of `key` with `new` if its current value is the
    /// `old` handle
    ///
    /// The comparison is handle identity: pass a handle obtained from the map,
    /// an equal value in a fresh [`Arc`] does not match.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use syncmap::SyncMap;
    ///
    /// let map = SyncMap::new();
    /// map.store("counter", Arc::new(1));
    ///
    /// let current = map.load("counter").unwrap();
    /// assert!(!map.compare_and_swap("counter", &Arc::new(1), Arc::new(2)));
    /// assert!(map.compare_and_swap("counter", &current, Arc::new(2)));
    /// assert_eq!(map.load("counter").as_deref(), Some(&2));
    /// ```
    pub fn compare_and_swap<Q>(&self, key: &Q, old: &Arc<V>, new: impl Into<Option<Arc<V>>>) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.try_compare_and_swap(key, old, new).is_ok()
    }

    /// Delete `key` if its current value is the `old` handle
    ///
    /// # Errors
    ///
    /// * [`Error::NotFound`] if the key has no value
    /// * [`Error::Mismatch`] if the current value is a different handle
    pub fn try_compare_and_delete<Q>(&self, key: &Q, old: &Arc<V>) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let guard = &epoch::pin();
        let read = self.snapshot(guard);
        if let Some(cell) = read.entries.get(key) {
            return cell.compare_and_swap(old, None, guard);
        }
        if !read.amended {
            return Err(Error::NotFound);
        }

        self.lookup_locked(key, false, guard)
            .ok_or(Error::NotFound)?
            .compare_and_swap(old, None, guard)
    }

    /// Delete `key` if its current value is the `old` handle
    pub fn compare_and_delete<Q>(&self, key: &Q, old: &Arc<V>) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.try_compare_and_delete(key, old).is_ok()
    }

    /// Call `visit` for each key and value until it returns `false`
    ///
    /// Iteration is not a consistent snapshot of the whole map: each key is
    /// visited at most once, and each visited value was present at some
    /// point during the call, but concurrent writes may or may not be
    /// observed. The map lock is not held while `visit` runs, so `visit` may
    /// use the map freely.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use syncmap::SyncMap;
    ///
    /// let map = SyncMap::new();
    /// for i in 1..=4 {
    ///     map.store(i, Arc::new(i));
    /// }
    ///
    /// let mut sum = 0;
    /// map.range(|_, value| {
    ///     sum += **value;
    ///     true
    /// });
    /// assert_eq!(sum, 10);
    /// ```
    pub fn range<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &Arc<V>) -> bool,
    {
        let result: core::result::Result<(), Infallible> =
            self.try_range(|key, value| Ok(visit(key, value)));
        match result {
            Ok(()) => {}
            Err(never) => match never {},
        }
    }

    /// Call a fallible `visit` for each key and value
    ///
    /// Stops at the first `Ok(false)` or at the first error, which is
    /// returned. Same consistency as [`range`](Self::range).
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `visit`.
    pub fn try_range<F, E>(&self, mut visit: F) -> core::result::Result<(), E>
    where
        F: FnMut(&K, &Arc<V>) -> core::result::Result<bool, E>,
    {
        let entries = {
            let guard = &epoch::pin();
            let mut read = self.snapshot(guard);
            if read.amended {
                let mut overlay = self.dirty.lock();
                self.record(AtomicMetrics::record_locked);
                read = self.snapshot(guard);
                if read.amended {
                    // The overlay already reflects every removal, so it can be
                    // published as is.
                    self.promote_locked(&mut overlay, guard);
                    read = self.snapshot(guard);
                }
            }
            Arc::clone(&read.entries)
        };

        for (key, cell) in entries.iter() {
            let value = match cell.load(&epoch::pin()) {
                Some(value) => value,
                None => continue,
            };
            if !visit(key, &value)? {
                break;
            }
        }
        Ok(())
    }

    /// Remove every entry
    ///
    /// Readers running concurrently may still observe some of the old entries
    /// until `clear` returns.
    pub fn clear(&self) {
        let guard = &epoch::pin();
        let read = self.snapshot(guard);
        if read.entries.is_empty() && !read.amended {
            return;
        }

        let mut overlay = self.dirty.lock();
        self.record(AtomicMetrics::record_locked);
        let read = self.snapshot(guard);
        if !read.entries.is_empty() || read.amended {
            self.publish(Snapshot::empty(self.hasher.clone()), guard);
        }
        if let Some(entries) = overlay.entries.as_mut() {
            entries.clear();
        }
        overlay.misses = 0;

        tracing::debug!("cleared map");
        self.record(AtomicMetrics::record_clear);
    }

    /// Count the entries
    ///
    /// This walks the map with [`range`](Self::range), so it is O(n) and only
    /// approximate while other threads are writing.
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.range(|_, _| {
            count += 1;
            true
        });
        count
    }

    /// Check if the map has no entries
    pub fn is_empty(&self) -> bool {
        let mut empty = true;
        self.range(|_, _| {
            empty = false;
            false
        });
        empty
    }

    // Private helper methods

    fn snapshot<'g>(&self, guard: &'g Guard) -> &'g Snapshot<K, V, S> {
        // SAFETY: the pointer is never null, and a replaced snapshot is only
        // destroyed after every guard pinned before the swap is gone.
        unsafe { self.read.load(Ordering::Acquire, guard).deref() }
    }

    /// Replace the snapshot. Caller holds the overlay lock.
    fn publish(&self, snapshot: Snapshot<K, V, S>, guard: &Guard) {
        let previous = self.read.swap(Owned::new(snapshot), Ordering::AcqRel, guard);
        // SAFETY: `previous` is no longer reachable through `self.read`.
        unsafe { guard.defer_destroy(previous) };
    }

    fn record(&self, update: impl FnOnce(&AtomicMetrics)) {
        if self.metrics_enabled.load(Ordering::Relaxed) {
            update(&self.metrics);
        }
    }

    /// Locked lookup shared by load, delete and compare-and-delete.
    ///
    /// With `unlink`, a key found only in the overlay is removed from it.
    fn lookup_locked<Q>(&self, key: &Q, unlink: bool, guard: &Guard) -> Option<Arc<ValueCell<V>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut overlay = self.dirty.lock();
        self.record(AtomicMetrics::record_locked);
        let read = self.snapshot(guard);
        if let Some(cell) = read.entries.get(key) {
            return Some(Arc::clone(cell));
        }
        if !read.amended {
            return None;
        }

        let cell = if unlink {
            overlay.remove(key)
        } else {
            overlay.get(key).cloned()
        };
        self.miss_locked(&mut overlay, guard);
        cell
    }

    fn load_or_store_locked(cell: &ValueCell<V>, value: Arc<V>, guard: &Guard) -> (Arc<V>, bool) {
        match cell.try_load_or_store(value, guard) {
            Ok(result) => result,
            Err(_) => unreachable!("cells reachable under the overlay lock are never expunged"),
        }
    }

    /// Add a cell for a key missing from both tables.
    fn insert_locked(
        &self,
        overlay: &mut Overlay<K, V, S>,
        read: &Snapshot<K, V, S>,
        key: K,
        cell: ValueCell<V>,
        guard: &Guard,
    ) {
        self.ensure_overlay(overlay, read, guard)
            .insert(key, Arc::new(cell));
        if !read.amended {
            self.publish(read.amend(), guard);
        }
    }

    /// Put an expunged snapshot cell back into the overlay.
    ///
    /// No-op unless the cell is expunged. The overlay is built before the
    /// cell leaves `Expunged`, so the rebuild cannot tombstone it again.
    fn relink_locked(
        &self,
        overlay: &mut Overlay<K, V, S>,
        read: &Snapshot<K, V, S>,
        key: K,
        cell: &Arc<ValueCell<V>>,
        guard: &Guard,
    ) {
        if !cell.is_expunged(guard) {
            return;
        }
        let entries = self.ensure_overlay(overlay, read, guard);
        // Only the lock holder moves a cell out of `Expunged`.
        cell.unexpunge_locked(guard);
        entries.insert(key, Arc::clone(cell));
    }

    /// The overlay table, built from the snapshot if it does not exist.
    fn ensure_overlay<'o>(
        &self,
        overlay: &'o mut Overlay<K, V, S>,
        read: &Snapshot<K, V, S>,
        guard: &Guard,
    ) -> &'o mut Table<K, V, S> {
        overlay
            .entries
            .get_or_insert_with(|| self.rebuild_overlay(read, guard))
    }

    /// Copy the snapshot into a fresh overlay table.
    ///
    /// Absent cells are expunged and left out; every other cell is shared.
    fn rebuild_overlay(&self, read: &Snapshot<K, V, S>, guard: &Guard) -> Table<K, V, S> {
        let mut entries = HashMap::with_capacity_and_hasher(read.entries.len(), self.hasher.clone());
        let mut expunged = 0;
        for (key, cell) in read.entries.iter() {
            if cell.try_expunge_locked(guard) {
                expunged += 1;
            } else {
                entries.insert(key.clone(), Arc::clone(cell));
            }
        }

        tracing::trace!(kept = entries.len(), expunged, "rebuilt dirty overlay");
        self.record(|metrics| metrics.record_rebuild(expunged));
        entries
    }

    fn miss_locked(&self, overlay: &mut Overlay<K, V, S>, guard: &Guard) {
        overlay.misses += 1;
        self.record(AtomicMetrics::record_miss);
        match &overlay.entries {
            Some(entries) if overlay.misses >= entries.len() => {}
            _ => return,
        }
        self.promote_locked(overlay, guard);
    }

    /// Publish the overlay as the new snapshot and discard it.
    fn promote_locked(&self, overlay: &mut Overlay<K, V, S>, guard: &Guard) {
        if let Some(entries) = overlay.entries.take() {
            tracing::trace!(
                entries = entries.len(),
                misses = overlay.misses,
                "promoting dirty overlay"
            );
            self.publish(Snapshot::promoted(entries), guard);
            self.record(AtomicMetrics::record_promotion);
        }
        overlay.misses = 0;
    }

    #[cfg(test)]
    fn is_amended(&self) -> bool {
        self.snapshot(&epoch::pin()).amended
    }

    #[cfg(test)]
    fn has_overlay(&self) -> bool {
        self.dirty.lock().entries.is_some()
    }
}

impl<K, V, S> MetricsCollector for SyncMap<K, V, S> {
    fn metrics(&self) -> MapMetrics {
        self.metrics.snapshot()
    }

    fn reset_metrics(&self) {
        self.metrics.reset();
    }

    fn set_metrics_enabled(&self, enabled: bool) {
        self.metrics_enabled.store(enabled, Ordering::Relaxed);
    }

    fn is_metrics_enabled(&self) -> bool {
        self.metrics_enabled.load(Ordering::Relaxed)
    }
}

impl<K, V, S: Clone + Default> Default for SyncMap<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> FromIterator<(K, Arc<V>)> for SyncMap<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Clone + Default + Send + Sync + 'static,
{
    fn from_iter<I: IntoIterator<Item = (K, Arc<V>)>>(iter: I) -> Self {
        let mut map = Self::default();
        map.extend(iter);
        map
    }
}

impl<K, V, S> Extend<(K, Arc<V>)> for SyncMap<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn extend<I: IntoIterator<Item = (K, Arc<V>)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.store(key, value);
        }
    }
}

impl<K, V, S> fmt::Debug for SyncMap<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + fmt::Debug + 'static,
    V: Send + Sync + fmt::Debug + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries = f.debug_map();
        self.range(|key, value| {
            entries.entry(key, value);
            true
        });
        entries.finish()
    }
}

impl<K, V, S> Drop for SyncMap<K, V, S> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no reader can still hold the current
        // snapshot; earlier snapshots were handed to the collector.
        unsafe {
            let read = self
                .read
                .get()
                .load(Ordering::Relaxed, epoch::unprotected());
            if !read.is_null() {
                drop(read.into_owned());
            }
        }
    }
}
