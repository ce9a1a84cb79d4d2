//! Map Metrics Module
//!
//! Counters describing how often a map leaves its lock-free fast path and how
//! the overlay evolves. Every counter is updated only on the locked slow path,
//! so collection never adds shared writes to lock-free reads.

use core::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a map's slow-path activity
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MapMetrics {
    /// Operations that acquired the overlay lock
    pub locked_operations: u64,
    /// Lookups resolved only through the dirty overlay
    pub misses: u64,
    /// Overlay promotions into a new snapshot
    pub promotions: u64,
    /// Dirty overlay rebuilds from the snapshot
    pub overlay_rebuilds: u64,
    /// Cells tombstoned during overlay rebuilds
    pub expunged_cells: u64,
    /// Calls to `clear` that had something to clear
    pub clears: u64,
}

impl MapMetrics {
    /// Share of locked operations that ended up consulting the overlay, as a
    /// percentage
    pub fn miss_rate(&self) -> f64 {
        if self.locked_operations == 0 {
            0.0
        } else {
            (self.misses as f64 / self.locked_operations as f64) * 100.0
        }
    }

    /// Average number of misses paid for each promotion
    pub fn misses_per_promotion(&self) -> f64 {
        if self.promotions == 0 {
            0.0
        } else {
            self.misses as f64 / self.promotions as f64
        }
    }
}

/// Internal atomic metrics collection
#[derive(Debug, Default)]
pub(crate) struct AtomicMetrics {
    locked_operations: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    overlay_rebuilds: AtomicU64,
    expunged_cells: AtomicU64,
    clears: AtomicU64,
}

impl AtomicMetrics {
    /// Record an acquisition of the overlay lock
    pub(crate) fn record_locked(&self) {
        self.locked_operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lookup served by the overlay
    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a promotion of the overlay into the snapshot
    pub(crate) fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an overlay rebuild that tombstoned `expunged` cells
    pub(crate) fn record_rebuild(&self, expunged: usize) {
        self.overlay_rebuilds.fetch_add(1, Ordering::Relaxed);
        self.expunged_cells
            .fetch_add(expunged as u64, Ordering::Relaxed);
    }

    /// Record a clear
    pub(crate) fn record_clear(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub(crate) fn snapshot(&self) -> MapMetrics {
        MapMetrics {
            locked_operations: self.locked_operations.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            overlay_rebuilds: self.overlay_rebuilds.load(Ordering::Relaxed),
            expunged_cells: self.expunged_cells.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub(crate) fn reset(&self) {
        self.locked_operations.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.promotions.store(0, Ordering::Relaxed);
        self.overlay_rebuilds.store(0, Ordering::Relaxed);
        self.expunged_cells.store(0, Ordering::Relaxed);
        self.clears.store(0, Ordering::Relaxed);
    }
}

/// Trait for data structures that support performance metrics
pub trait MetricsCollector {
    /// Get current performance metrics
    fn metrics(&self) -> MapMetrics;

    /// Reset all metrics
    fn reset_metrics(&self);

    /// Enable or disable metrics collection
    fn set_metrics_enabled(&self, enabled: bool);

    /// Check if metrics collection is enabled
    fn is_metrics_enabled(&self) -> bool;
}
