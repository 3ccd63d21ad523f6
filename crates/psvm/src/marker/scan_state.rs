//! Scan-State & Fix Protocol (spec.md §4.D)
//!
//! Mirrors the real `mps_ss_s` scan-state struct (`mps.h`): a shift `w0`, a
//! zone-bitmap filter `w1`, a running summary `w2`, and a set of update marks
//! `w3`, plus a `fix` callback. A reference whose projected bit is unset in
//! `w1` cannot point into the condemned set and is skipped without chasing —
//! this is the fast-path filter every `MPS_RETAIN` call performs before paying
//! for a real fix.

use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of a `fix` call on a live reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOutcome {
    /// Reference unchanged; referent was already in its final location.
    Unchanged,
    /// Referent moved; the slot must be overwritten with `new_addr`.
    Forwarded { new_addr: usize },
}

/// The action taken on a live reference: mark, copy, forward, or install a
/// new address. Implementations are supplied per-trace by the collector
/// (mark-only trace, copying/compacting trace, etc.).
pub trait Fix: Send + Sync {
    /// Fix one reference. `addr` is the referent's current address; returns
    /// the outcome so the scanner can decide whether to rewrite the slot.
    fn fix(&self, addr: usize) -> FixOutcome;
}

/// A no-op fix used by scanners that only need liveness information
/// (`MPS_IS_RETAINED`) without side effects.
pub struct ObserveOnlyFix;

impl Fix for ObserveOnlyFix {
    fn fix(&self, _addr: usize) -> FixOutcome {
        FixOutcome::Unchanged
    }
}

/// Per-trace scan state threaded through every format scanner and root
/// scanner invoked during one collection.
pub struct ScanState<'a> {
    /// Shift applied to an address before projecting it onto the zone bitmap.
    w0: u32,
    /// Zone bitmap filter: bit `i` set means "the condemned set may contain
    /// an object whose projected address is `i`".
    w1: u64,
    /// Running summary of zones actually fixed during this scan, merged back
    /// into the enclosing scope by `scan_call`.
    w2: AtomicU64,
    /// Update marks: bits recorded by `scan_update` for addresses written
    /// into the destination segment, used to rebuild its summary.
    w3: AtomicU64,
    fix: &'a dyn Fix,
}

impl<'a> ScanState<'a> {
    /// `MPS_SCAN_BEGIN`: establish a scan block, capturing the zone bitmap
    /// locally for speed.
    pub fn begin(shift: u32, filter: u64, fix: &'a dyn Fix) -> Self {
        Self {
            w0: shift,
            w1: filter,
            w2: AtomicU64::new(0),
            w3: AtomicU64::new(0),
            fix,
        }
    }

    fn zone_bit(&self, addr: usize) -> u64 {
        1u64 << ((addr >> self.w0) & 63)
    }

    /// `MPS_RETAIN`: filter-check `addr`; if the projected bit passes, invoke
    /// `fix`. Returns `Some(new_addr)` if the slot must be overwritten with a
    /// forwarding address, `None` if the reference was not in the condemned
    /// set or was unchanged.
    pub fn retain(&self, addr: usize, condition: bool) -> Option<usize> {
        if !condition || addr == 0 {
            return None;
        }
        let bit = self.zone_bit(addr);
        if self.w1 & bit == 0 {
            return None;
        }
        match self.fix.fix(addr) {
            FixOutcome::Unchanged => {
                self.w2.fetch_or(bit, Ordering::Relaxed);
                None
            }
            FixOutcome::Forwarded { new_addr } => {
                self.w2.fetch_or(self.zone_bit(new_addr), Ordering::Relaxed);
                Some(new_addr)
            }
        }
    }

    /// `MPS_IS_RETAINED`: boolean liveness check without side effects,
    /// resolving through forwardings. Used for weak/conditional checks
    /// (spec.md §8 property 4).
    pub fn is_retained(&self, addr: usize, condition: bool) -> bool {
        if !condition || addr == 0 {
            return false;
        }
        let bit = self.zone_bit(addr);
        if self.w1 & bit == 0 {
            return false;
        }
        !matches!(self.fix.fix(addr), FixOutcome::Forwarded { new_addr } if new_addr == 0)
    }

    /// `MPS_SCAN_UPDATE`: record a bit in `w3` for `value`'s zone; used to
    /// rebuild the summary for the destination segment after a scan that
    /// writes new references without going through `retain`.
    pub fn scan_update(&self, _location: usize, value: usize) {
        self.w3.fetch_or(self.zone_bit(value), Ordering::Relaxed);
    }

    /// `MPS_SCAN_CALL`: wrap a nested scan and merge its `w2` back into this
    /// scan state's running summary.
    pub fn scan_call<F: FnOnce(&ScanState<'a>) -> R, R>(&self, f: F) -> R {
        let nested = ScanState {
            w0: self.w0,
            w1: self.w1,
            w2: AtomicU64::new(0),
            w3: AtomicU64::new(0),
            fix: self.fix,
        };
        let result = f(&nested);
        self.w2.fetch_or(nested.w2.load(Ordering::Relaxed), Ordering::Relaxed);
        self.w3.fetch_or(nested.w3.load(Ordering::Relaxed), Ordering::Relaxed);
        result
    }

    /// `MPS_SCAN_END`: the accumulated summary of zones actually referenced,
    /// to be installed as the scanned segment's new summary.
    pub fn summary(&self) -> u64 {
        self.w2.load(Ordering::Relaxed)
    }

    /// Accumulated update marks (see `scan_update`).
    pub fn update_marks(&self) -> u64 {
        self.w3.load(Ordering::Relaxed)
    }
}
