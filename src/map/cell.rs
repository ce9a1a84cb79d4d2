//! Value cell state machine
//!
//! A [`ValueCell`] is the per-key slot shared by the snapshot and the dirty
//! overlay. It holds one of three states:
//!
//! - `Live(handle)`: the key maps to `handle`
//! - `Absent`: the key was deleted; if an overlay exists it maps the key to
//!   this very cell
//! - `Expunged`: the key was deleted and the cell was left out of the overlay
//!   when it was last rebuilt
//!
//! Every state is an immutable heap node. Transitions swap the node pointer
//! with a single CAS and retire the previous node through the epoch guard, so
//! a reader that loaded a node may keep dereferencing it for as long as it
//! stays pinned.
//!
//! ## State transitions
//!
//! | From | To | Who |
//! |------|----|-----|
//! | `Live` | `Live` / `Absent` | any thread |
//! | `Absent` | `Live` | any thread |
//! | `Absent` | `Expunged` | overlay lock holder, during a rebuild |
//! | `Expunged` | `Absent` | overlay lock holder, before re-registering the cell |
//!
//! Nothing leaves `Expunged` without the overlay lock, which is what lets the
//! lock holder rely on "not expunged" once it has unexpunged a cell.

use crate::{Error, Result};
use core::fmt;
use core::sync::atomic::Ordering;
use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use std::sync::Arc;

/// Node stored behind a cell's atomic pointer
enum Slot<V> {
    Live(Arc<V>),
    Absent,
    Expunged,
}

impl<V> Slot<V> {
    fn from_value(value: Option<Arc<V>>) -> Self {
        match value {
            Some(value) => Slot::Live(value),
            None => Slot::Absent,
        }
    }

    fn into_value(self) -> Option<Arc<V>> {
        match self {
            Slot::Live(value) => Some(value),
            Slot::Absent | Slot::Expunged => None,
        }
    }
}

/// An atomically updatable value slot shared between snapshot and overlay
pub(crate) struct ValueCell<V> {
    slot: Atomic<Slot<V>>,
}

impl<V> ValueCell<V> {
    /// Create a cell holding `value`, or an absent cell for `None`
    pub(crate) fn new(value: Option<Arc<V>>) -> Self {
        Self {
            slot: Atomic::new(Slot::from_value(value)),
        }
    }

    fn current<'g>(&self, guard: &'g Guard) -> (Shared<'g, Slot<V>>, &'g Slot<V>) {
        let shared = self.slot.load(Ordering::Acquire, guard);
        // SAFETY: the slot is never null, and replaced nodes are only destroyed
        // once every guard that could have observed them is unpinned.
        let slot = unsafe { shared.deref() };
        (shared, slot)
    }

    /// Install `next` if the slot still points at `current`.
    ///
    /// On failure the freshly observed node and the unused replacement are
    /// handed back so the caller can re-check and retry without reallocating.
    #[allow(clippy::type_complexity)]
    fn replace<'g>(
        &self,
        current: Shared<'g, Slot<V>>,
        next: Owned<Slot<V>>,
        guard: &'g Guard,
    ) -> core::result::Result<(), (Shared<'g, Slot<V>>, Owned<Slot<V>>)> {
        match self
            .slot
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire, guard)
        {
            Ok(_) => {
                // SAFETY: `current` is now unreachable through this cell.
                unsafe { guard.defer_destroy(current) };
                Ok(())
            }
            Err(err) => Err((err.current, err.new)),
        }
    }

    /// Load the live value, if any
    pub(crate) fn load(&self, guard: &Guard) -> Option<Arc<V>> {
        match self.current(guard).1 {
            Slot::Live(value) => Some(Arc::clone(value)),
            Slot::Absent | Slot::Expunged => None,
        }
    }

    /// Replace the live value with `new` if it is the `expected` handle.
    ///
    /// Passing `None` as `new` deletes the value. Fails with
    /// [`Error::NotFound`] when the cell holds no live value and with
    /// [`Error::Mismatch`] when the live handle is a different allocation.
    pub(crate) fn compare_and_swap(
        &self,
        expected: &Arc<V>,
        new: Option<Arc<V>>,
        guard: &Guard,
    ) -> Result<()> {
        let (mut current, mut slot) = self.current(guard);
        let mut next: Option<Owned<Slot<V>>> = None;
        let mut new = Some(new);

        loop {
            match slot {
                Slot::Live(value) if Arc::ptr_eq(value, expected) => {}
                Slot::Live(_) => return Err(Error::Mismatch),
                Slot::Absent | Slot::Expunged => return Err(Error::NotFound),
            }

            let owned = match next.take() {
                Some(owned) => owned,
                None => Owned::new(Slot::from_value(new.take().flatten())),
            };

            match self.replace(current, owned, guard) {
                Ok(()) => return Ok(()),
                Err((observed, owned)) => {
                    current = observed;
                    // SAFETY: see `current`.
                    slot = unsafe { observed.deref() };
                    next = Some(owned);
                }
            }
        }
    }

    /// Return the live value, or install `candidate` if the cell is absent.
    ///
    /// `Ok((actual, loaded))` reports the value now in the cell and whether it
    /// was already there. An expunged cell is left untouched and the candidate
    /// comes back as `Err`.
    pub(crate) fn try_load_or_store(
        &self,
        candidate: Arc<V>,
        guard: &Guard,
    ) -> core::result::Result<(Arc<V>, bool), Arc<V>> {
        let (mut current, mut slot) = self.current(guard);
        let mut next: Option<Owned<Slot<V>>> = None;

        loop {
            match slot {
                Slot::Live(value) => return Ok((Arc::clone(value), true)),
                Slot::Expunged => return Err(candidate),
                Slot::Absent => {}
            }

            let owned = next
                .take()
                .unwrap_or_else(|| Owned::new(Slot::Live(Arc::clone(&candidate))));
            match self.replace(current, owned, guard) {
                Ok(()) => return Ok((candidate, false)),
                Err((observed, owned)) => {
                    current = observed;
                    // SAFETY: see `current`.
                    slot = unsafe { observed.deref() };
                    next = Some(owned);
                }
            }
        }
    }

    /// Swap in `new` unless the cell is expunged.
    ///
    /// Returns the previous live value. If the cell is expunged it is left
    /// untouched and `new` comes back as `Err`.
    pub(crate) fn try_swap(
        &self,
        new: Option<Arc<V>>,
        guard: &Guard,
    ) -> core::result::Result<Option<Arc<V>>, Option<Arc<V>>> {
        let (mut current, mut slot) = self.current(guard);
        if let Slot::Expunged = slot {
            return Err(new);
        }

        let mut next = Owned::new(Slot::from_value(new));
        loop {
            let previous = match slot {
                Slot::Live(value) => Some(Arc::clone(value)),
                Slot::Absent => None,
                Slot::Expunged => return Err(next.into_box().into_value()),
            };

            match self.replace(current, next, guard) {
                Ok(()) => return Ok(previous),
                Err((observed, owned)) => {
                    current = observed;
                    // SAFETY: see `current`.
                    slot = unsafe { observed.deref() };
                    next = owned;
                }
            }
        }
    }

    /// Unconditionally swap in `new`, returning the previous live value.
    ///
    /// The caller holds the overlay lock and has made sure the cell is not
    /// expunged.
    pub(crate) fn swap_locked(&self, new: Option<Arc<V>>, guard: &Guard) -> Option<Arc<V>> {
        let previous = self
            .slot
            .swap(Owned::new(Slot::from_value(new)), Ordering::AcqRel, guard);
        // SAFETY: see `current`.
        let value = match unsafe { previous.deref() } {
            Slot::Live(value) => Some(Arc::clone(value)),
            Slot::Absent => None,
            Slot::Expunged => {
                debug_assert!(false, "swap_locked on an expunged cell");
                None
            }
        };
        // SAFETY: the previous node is no longer reachable through this cell.
        unsafe { guard.defer_destroy(previous) };
        value
    }

    /// Delete the live value, returning it. No-op on absent and expunged cells.
    pub(crate) fn delete(&self, guard: &Guard) -> Option<Arc<V>> {
        let (mut current, mut slot) = self.current(guard);
        let mut next: Option<Owned<Slot<V>>> = None;

        loop {
            let value = match slot {
                Slot::Live(value) => Arc::clone(value),
                Slot::Absent | Slot::Expunged => return None,
            };

            let owned = next.take().unwrap_or_else(|| Owned::new(Slot::Absent));
            match self.replace(current, owned, guard) {
                Ok(()) => return Some(value),
                Err((observed, owned)) => {
                    current = observed;
                    // SAFETY: see `current`.
                    slot = unsafe { observed.deref() };
                    next = Some(owned);
                }
            }
        }
    }

    /// Mark an absent cell as expunged. Returns whether the cell ends up
    /// expunged; live cells are left alone.
    pub(crate) fn try_expunge_locked(&self, guard: &Guard) -> bool {
        let (mut current, mut slot) = self.current(guard);
        let mut next: Option<Owned<Slot<V>>> = None;

        loop {
            match slot {
                Slot::Absent => {}
                Slot::Expunged => return true,
                Slot::Live(_) => return false,
            }

            let owned = next.take().unwrap_or_else(|| Owned::new(Slot::Expunged));
            match self.replace(current, owned, guard) {
                Ok(()) => return true,
                Err((observed, owned)) => {
                    current = observed;
                    // SAFETY: see `current`.
                    slot = unsafe { observed.deref() };
                    next = Some(owned);
                }
            }
        }
    }

    /// Move an expunged cell back to absent.
    ///
    /// Returns `true` if the cell was expunged; the caller must then link it
    /// into the overlay before releasing the lock.
    pub(crate) fn unexpunge_locked(&self, guard: &Guard) -> bool {
        let (current, slot) = self.current(guard);
        if !matches!(slot, Slot::Expunged) {
            return false;
        }
        // Other threads never write to an expunged cell, so this cannot race.
        self.replace(current, Owned::new(Slot::Absent), guard).is_ok()
    }

    /// Whether the cell is expunged
    pub(crate) fn is_expunged(&self, guard: &Guard) -> bool {
        matches!(self.current(guard).1, Slot::Expunged)
    }
}

impl<V> Drop for ValueCell<V> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` proves no other thread can reach this cell, and
        // retired nodes were handed to the collector separately.
        unsafe {
            let slot = self
                .slot
                .load(Ordering::Relaxed, crossbeam_epoch::unprotected());
            if !slot.is_null() {
                drop(slot.into_owned());
            }
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for ValueCell<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = &crossbeam_epoch::pin();
        match self.current(guard).1 {
            Slot::Live(value) => f.debug_tuple("Live").field(value).finish(),
            Slot::Absent => f.write_str("Absent"),
            Slot::Expunged => f.write_str("Expunged"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_epoch as epoch;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_load_states() {
        let guard = &epoch::pin();
        let live = ValueCell::new(Some(Arc::new(7)));
        assert_eq!(live.load(guard).as_deref(), Some(&7));

        let absent: ValueCell<i32> = ValueCell::new(None);
        assert_eq!(absent.load(guard), None);
        assert!(absent.try_expunge_locked(guard));
        assert_eq!(absent.load(guard), None);
    }

    #[test]
    fn test_compare_and_swap_uses_identity() {
        let guard = &epoch::pin();
        let original = Arc::new(String::from("value"));
        let cell = ValueCell::new(Some(Arc::clone(&original)));

        // Equal contents, different allocation.
        let lookalike = Arc::new(String::from("value"));
        assert_eq!(
            cell.compare_and_swap(&lookalike, Some(Arc::new("x".into())), guard),
            Err(Error::Mismatch)
        );

        let replacement = Arc::new(String::from("replacement"));
        assert_eq!(
            cell.compare_and_swap(&original, Some(Arc::clone(&replacement)), guard),
            Ok(())
        );
        assert!(Arc::ptr_eq(&cell.load(guard).unwrap(), &replacement));

        // The old handle is stale now.
        assert_eq!(
            cell.compare_and_swap(&original, None, guard),
            Err(Error::Mismatch)
        );
    }

    #[test]
    fn test_compare_and_swap_to_absent() {
        let guard = &epoch::pin();
        let value = Arc::new(1);
        let cell = ValueCell::new(Some(Arc::clone(&value)));

        assert_eq!(cell.compare_and_swap(&value, None, guard), Ok(()));
        assert_eq!(cell.load(guard), None);
        assert_eq!(
            cell.compare_and_swap(&value, None, guard),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn test_try_load_or_store() {
        let guard = &epoch::pin();
        let cell = ValueCell::new(None);

        let first = Arc::new(1);
        let (actual, loaded) = cell.try_load_or_store(Arc::clone(&first), guard).unwrap();
        assert!(!loaded);
        assert!(Arc::ptr_eq(&actual, &first));

        let (actual, loaded) = cell.try_load_or_store(Arc::new(2), guard).unwrap();
        assert!(loaded);
        assert!(Arc::ptr_eq(&actual, &first));
    }

    #[test]
    fn test_try_load_or_store_rejects_expunged() {
        let guard = &epoch::pin();
        let cell: ValueCell<i32> = ValueCell::new(None);
        assert!(cell.try_expunge_locked(guard));

        let candidate = Arc::new(5);
        let rejected = cell
            .try_load_or_store(Arc::clone(&candidate), guard)
            .unwrap_err();
        assert!(Arc::ptr_eq(&rejected, &candidate));
        assert!(cell.is_expunged(guard));
    }

    #[test]
    fn test_try_swap() {
        let guard = &epoch::pin();
        let cell = ValueCell::new(Some(Arc::new(1)));

        assert_eq!(cell.try_swap(Some(Arc::new(2)), guard).unwrap().as_deref(), Some(&1));
        assert_eq!(cell.try_swap(None, guard).unwrap().as_deref(), Some(&2));
        assert_eq!(cell.try_swap(Some(Arc::new(3)), guard).unwrap(), None);

        assert_eq!(cell.delete(guard).as_deref(), Some(&3));
        assert!(cell.try_expunge_locked(guard));
        let rejected = cell.try_swap(Some(Arc::new(4)), guard).unwrap_err();
        assert_eq!(rejected.as_deref(), Some(&4));
        assert!(cell.is_expunged(guard));
    }

    #[test]
    fn test_delete() {
        let guard = &epoch::pin();
        let cell = ValueCell::new(Some(Arc::new("gone")));

        assert_eq!(cell.delete(guard).as_deref(), Some(&"gone"));
        assert_eq!(cell.delete(guard), None);
        assert!(cell.try_expunge_locked(guard));
        assert_eq!(cell.delete(guard), None);
    }

    #[test]
    fn test_expunge_and_unexpunge() {
        let guard = &epoch::pin();
        let cell = ValueCell::new(Some(Arc::new(1)));

        // Live cells are never expunged.
        assert!(!cell.try_expunge_locked(guard));
        assert!(!cell.unexpunge_locked(guard));

        cell.delete(guard);
        assert!(cell.try_expunge_locked(guard));
        // Idempotent.
        assert!(cell.try_expunge_locked(guard));

        assert!(cell.unexpunge_locked(guard));
        assert!(!cell.unexpunge_locked(guard));
        assert_eq!(cell.load(guard), None);

        assert_eq!(cell.swap_locked(Some(Arc::new(9)), guard), None);
        assert_eq!(cell.load(guard).as_deref(), Some(&9));
    }

    #[test]
    fn test_concurrent_load_or_store_single_winner() {
        let cell: Arc<ValueCell<usize>> = Arc::new(ValueCell::new(None));
        let num_threads = 8;
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles: Vec<_> = (0..num_threads)
            .map(|id| {
                let cell = Arc::clone(&cell);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let guard = &epoch::pin();
                    let (actual, loaded) = cell.try_load_or_store(Arc::new(id), guard).unwrap();
                    (*actual, loaded)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let stored = results.iter().filter(|(_, loaded)| !loaded).count();
        assert_eq!(stored, 1);

        let winner = results[0].0;
        assert!(results.iter().all(|(value, _)| *value == winner));
        assert_eq!(cell.load(&epoch::pin()).as_deref(), Some(&winner));
    }

    #[test]
    fn test_concurrent_compare_and_swap_counter() {
        let cell = Arc::new(ValueCell::new(Some(Arc::new(0usize))));
        let num_threads = 4;
        let increments = 500;

        let handles: Vec<_> = (0..num_threads)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    for _ in 0..increments {
                        loop {
                            let guard = &epoch::pin();
                            let current = cell.load(guard).unwrap();
                            let next = Arc::new(*current + 1);
                            if cell.compare_and_swap(&current, Some(next), guard).is_ok() {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            cell.load(&epoch::pin()).as_deref(),
            Some(&(num_threads * increments))
        );
    }
}
