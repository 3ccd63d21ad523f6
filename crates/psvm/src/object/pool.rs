//! Composite Payload Pool (spec.md §3 "Composite payload", §4.A pool
//! classes).
//!
//! Arrays, dictionaries, gstates and strings are stored as contiguous runs of
//! `Slot`s inside a `Pool`. Per the Design Notes (spec.md §9, "Cyclic object
//! graphs... represent payloads by pool-local indices plus a generation
//! tag"), a composite is addressed by a `PoolAddr` — a stable index into the
//! pool's slot vector — rather than a raw pointer into `heap::Heap`'s byte
//! arena. That keeps the collector's `forward`/`is_forwarded` protocol
//! (`object::format`) free to change where a payload's bytes ultimately live
//! without the mutator ever chasing a stale address, and gives save-log
//! entries (which must survive a compaction untouched, §5 "Resource policy
//! for save-log") a stable handle to copy back into.
//!
//! The byte-level `heap`/`allocator` machinery is retained as the backing
//! allocator for non-composite, fixed-layout regions (AP/SAC buffers, raw
//! save-log storage) — `Pool` is the PSVM-level layer built on top of it for
//! the heterogeneous, growable composite object model.

use crate::error::{PsvmError, Result};
use crate::object::slot::{Access, Slot, SlotTag, SlotValue};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pool classes, spec.md §4.A "Pool classes".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolClass {
    /// Automatic moving collected: the default class for interpreter-visible
    /// composites (arrays, dictionaries, strings, gstates).
    Amc,
    /// Weak AMC: referents may be cleared (read as `null`) if otherwise
    /// unreachable after a collection (spec.md §8 property 4).
    AmcWeak,
    /// Segmented non-collected: save-log entries live here (§5 "Resource
    /// policy for save-log") — never moved or reclaimed by the tracing
    /// collector, so a replay always finds its bytes where it left them.
    Snc,
    /// A debug-augmented wrapper around another class: fencepost bytes and a
    /// tag word around every allocation, used by `pool_debug_walk`.
    Debug(Box<PoolClass>),
}

/// A stable reference into a `Pool`: the index of the first slot in a run.
/// `PoolAddr::NULL` is the composite analogue of a null payload pointer
/// (spec.md invariant 1: "payload pointer is either null ... or points into
/// a pool whose format scanner recognizes the layout").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolAddr(pub usize);

impl PoolAddr {
    pub const NULL: PoolAddr = PoolAddr(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn offset(self, n: usize) -> PoolAddr {
        PoolAddr(self.0 + n)
    }
}

/// A contiguous run of slots, used as the unit the write barrier and restore
/// log operate on (spec.md §3 "Composite payload").
pub struct Pool {
    class: PoolClass,
    slots: RwLock<Vec<Slot>>,
    /// The save epoch live when each slot was allocated, parallel to
    /// `slots`. Plain `alloc`/`alloc_filled` stamp `0` ("allocated before any
    /// restore-stack validation cares"); [`Pool::alloc_at_epoch`] stamps the
    /// caller's current epoch, which `save::restore::validate_stack_refs`
    /// (spec.md §4.F step 1, "stack validation") later reads back to reject
    /// a restore whose target predates the allocation.
    alloc_epochs: RwLock<Vec<u32>>,
    generation: AtomicU64,
}

impl Pool {
    pub fn new(class: PoolClass) -> Self {
        // Slot index 0 is reserved so `PoolAddr::NULL` never aliases a real
        // allocation.
        let reserved = Slot::new(SlotTag::Nothing, Access::Unlimited, false, false, true, 0, 0);
        Self {
            class,
            slots: RwLock::new(vec![reserved]),
            alloc_epochs: RwLock::new(vec![0]),
            generation: AtomicU64::new(1),
        }
    }

    pub fn class(&self) -> &PoolClass {
        &self.class
    }

    /// Whether this pool is the non-moving, non-collected save-log class
    /// (spec.md §5, "log entries are allocated in a dedicated non-moving
    /// pool (SNC)").
    pub fn is_snc(&self) -> bool {
        matches!(self.class, PoolClass::Snc)
    }

    /// Allocate `len` contiguous slots, all filled with
    /// [`Slot::stack_frame_default`] so a structural scan that races ahead of
    /// the caller populating them never trips the not-VM/local invariants
    /// (spec.md §3, the `stacks.c` "Stack slot lazy initialization" note in
    /// SPEC_FULL.md §3). `len == 0` is legal (spec.md "Boundary cases": a
    /// zero-length array/dictionary) and returns a distinct address carrying
    /// no slots.
    pub fn alloc(&self, len: usize) -> PoolAddr {
        self.alloc_at_epoch(len, 0)
    }

    /// As `alloc`, but stamps every new slot with `epoch` as its allocation
    /// epoch instead of the `0` default, so a later `restore` can validate
    /// that nothing still reachable from an interpreter stack was allocated
    /// after the restore target (spec.md §4.F step 1, scenario 4).
    pub fn alloc_at_epoch(&self, len: usize, epoch: u32) -> PoolAddr {
        let mut slots = self.slots.write();
        let base = slots.len();
        slots.reserve(len);
        for _ in 0..len {
            slots.push(Slot::stack_frame_default());
        }
        drop(slots);
        self.alloc_epochs.write().extend(std::iter::repeat(epoch).take(len));
        self.generation.fetch_add(1, Ordering::Relaxed);
        PoolAddr(base)
    }

    /// The epoch stamped on `addr` by the allocation that produced it (`0`
    /// unless it went through [`Pool::alloc_at_epoch`]).
    pub fn alloc_epoch_of(&self, addr: PoolAddr) -> u32 {
        self.alloc_epochs.read().get(addr.0).copied().unwrap_or(0)
    }

    /// Allocate `len` contiguous slots pre-filled with `value` repeated —
    /// used by `psvm_copy` and dictionary-pair allocation where the initial
    /// contents are known up front.
    pub fn alloc_filled(&self, len: usize, value: SlotValue) -> PoolAddr {
        let addr = self.alloc(len);
        for i in 0..len {
            self.write(addr, i, value);
        }
        addr
    }

    pub fn has_addr(&self, addr: PoolAddr, len: usize) -> bool {
        let slots = self.slots.read();
        !addr.is_null() && addr.0.saturating_add(len) <= slots.len()
    }

    pub fn read(&self, base: PoolAddr, index: usize) -> SlotValue {
        let slots = self.slots.read();
        SlotValue::from_slot(&slots[base.0 + index])
    }

    pub fn read_range(&self, base: PoolAddr, len: usize) -> Vec<SlotValue> {
        let slots = self.slots.read();
        (0..len)
            .map(|i| SlotValue::from_slot(&slots[base.0 + i]))
            .collect()
    }

    pub fn write(&self, base: PoolAddr, index: usize, value: SlotValue) {
        // Slot's tag word is atomic but its payload word is fixed at
        // construction, so a "write" replaces the whole cell rather than
        // mutating one field in place.
        let mut slots = self.slots.write();
        slots[base.0 + index] = value.to_slot();
    }

    pub fn write_range(&self, base: PoolAddr, values: &[SlotValue]) {
        let mut slots = self.slots.write();
        for (i, v) in values.iter().enumerate() {
            slots[base.0 + i] = v.to_slot();
        }
    }

    /// Number of slots currently allocated (including the reserved null
    /// slot at index 0).
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Bulk free, used only outside save/restore windows (spec.md §4.A
    /// `pool_clear`). Leaves the reserved null slot in place.
    pub fn clear(&self) {
        let mut slots = self.slots.write();
        slots.truncate(1);
        drop(slots);
        self.alloc_epochs.write().truncate(1);
        self.generation.fetch_add(1, Ordering::Relaxed);
    }
}
