//! # syncmap
//!
//! A concurrent map tuned for read-mostly workloads and for threads that touch
//! disjoint sets of keys.
//!
//! ## Features
//!
//! - **Lock-free reads**: lookups of keys already present in the published
//!   snapshot perform only atomic loads
//! - **Serialized structural writes**: new keys go through a single mutex into
//!   a dirty overlay, which is promoted to the snapshot once lookups miss often
//!   enough
//! - **Handle-identity updates**: values are shared `Arc` handles, and
//!   compare-and-swap compares handles, not contents
//! - **Dynamic keys**: [`AnyKeyMap`] accepts keys of any hashable type
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use syncmap::SyncMap;
//!
//! let map = SyncMap::new();
//! map.store("answer", Arc::new(42));
//! assert_eq!(map.load("answer").as_deref(), Some(&42));
//!
//! let (actual, loaded) = map.load_or_store("answer", Arc::new(0));
//! assert!(loaded);
//! assert_eq!(*actual, 42);
//! ```
//!
//! ## Consistency
//!
//! Each key is linearizable on its own. There is no ordering across keys, and
//! [`SyncMap::range`] does not observe a point-in-time snapshot of the whole map.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod map;
pub mod metrics;

pub use crate::map::{AnyKey, AnyKeyMap, FxSyncMap, SyncMap};
pub use crate::metrics::{MapMetrics, MetricsCollector};

/// Common utilities and helper types
pub mod util {
    use core::ops::Deref;

    /// Cache line size for alignment purposes
    pub const CACHE_LINE_SIZE: usize = 64;

    /// Pad a value to cache line size
    #[repr(align(64))]
    pub struct CachePadded<T> {
        value: T,
    }

    impl<T> CachePadded<T> {
        /// Create a new cache-padded value
        #[inline]
        pub const fn new(value: T) -> Self {
            Self { value }
        }

        /// Get a reference to the inner value
        #[inline]
        pub const fn get(&self) -> &T {
            &self.value
        }

        /// Get a mutable reference to the inner value
        #[inline]
        pub fn get_mut(&mut self) -> &mut T {
            &mut self.value
        }
    }

    impl<T> Deref for CachePadded<T> {
        type Target = T;

        #[inline]
        fn deref(&self) -> &T {
            &self.value
        }
    }

    impl<T: core::fmt::Debug> core::fmt::Debug for CachePadded<T> {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            core::fmt::Debug::fmt(&self.value, f)
        }
    }
}

/// Error types for conditional map operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The key has no live value
    NotFound,
    /// The key's live value is not the expected handle
    Mismatch,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::NotFound => write!(f, "Key has no live value"),
            Error::Mismatch => write!(f, "Current value is not the expected handle"),
        }
    }
}

impl std::error::Error for Error {}

/// Result type for conditional map operations
pub type Result<T> = core::result::Result<T, Error>;
