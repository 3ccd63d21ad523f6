//! Low-Memory Reservoir (spec.md §4.J), grounded on `mps_reservoir_limit_set`/
//! `mps_reserve_with_reservoir_permit`: a small pool of memory set aside so
//! that code holding a "reservoir permit" can still make forward progress
//! (typically: finish an in-flight restore or emergency cleanup) after a
//! normal allocation has already failed with out-of-memory.
//!
//! The reservoir itself is bookkeeping, not a separate heap region — it is a
//! soft floor under `Heap::committed_size` that only permit-carrying
//! allocations are allowed to cross.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Tracks how much memory is reserved against emergencies and how much of
/// the arena's commit headroom is currently protected by it.
pub struct Reservoir {
    limit: AtomicUsize,
}

impl Reservoir {
    pub fn new() -> Self {
        Self { limit: AtomicUsize::new(0) }
    }

    /// `mps_reservoir_limit_set`.
    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::SeqCst);
    }

    /// `mps_reservoir_limit`.
    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    /// `mps_reservoir_available`: how much of the reservoir is presently
    /// free to satisfy permit-carrying requests, given the arena's current
    /// committed and max sizes.
    pub fn available(&self, committed: usize, max: usize) -> usize {
        max.saturating_sub(committed).min(self.limit())
    }

    /// Whether a request of `size` bytes, with `has_reservoir_permit`, should
    /// be allowed to proceed even though a plain allocation at `committed`
    /// against `max` would fail (`mps_reserve_with_reservoir_permit`).
    /// Succeeds iff `size <= available(committed, max)` — no double-counting
    /// of the headroom already folded into `available`.
    pub fn admits(&self, size: usize, has_reservoir_permit: bool, committed: usize, max: usize) -> bool {
        has_reservoir_permit && size <= self.available(committed, max)
    }
}

impl Default for Reservoir {
    fn default() -> Self {
        Self::new()
    }
}
