//! Allocation Points (spec.md §4.C), mirroring `mps_ap_s`: `init`/`alloc`/
//! `limit` track a buffered region handed out by a pool, `frameptr`/`enabled`
//! support lightweight stack-like scoping on top of it (`allocator::frame`).
//!
//! An AP is the mutator-facing handle; `reserve`/`commit` split allocation
//! into a two-phase protocol so a format's scanner never observes a half
//! initialized object even under concurrent collection (spec.md invariant 5,
//! "no partially-initialized object is ever scanned").

use crate::error::{PsvmError, Result};
use crate::heap::{Heap, Reservoir};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::bump::BumpPointerAllocator;

/// A reservation returned by [`AllocationPoint::reserve`]. Must be committed
/// (or the AP's buffer discarded on refill) before the address is visible to
/// scanners.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    pub addr: usize,
    pub size: usize,
}

/// Mutator-facing allocation handle for one pool. Not `Sync`-shared across
/// threads in normal use (each thread gets its own AP, per spec.md's
/// Concurrency model §5), but built on atomics so a refill racing a reserve
/// from the same thread's deferred work still behaves.
pub struct AllocationPoint {
    /// Limit of initialized memory: everything below this is a real, scanned
    /// object; `commit` advances it.
    init: AtomicUsize,
    /// Limit of reserved-but-uncommitted memory.
    alloc: AtomicUsize,
    /// End of the current buffer; a `reserve` past this triggers a refill.
    limit: AtomicUsize,
    /// Lightweight frame pointer (`allocator::frame`); `0` when no frame is
    /// pushed.
    frameptr: AtomicUsize,
    enabled: std::sync::atomic::AtomicBool,
    heap: Arc<Heap>,
    buffer_size: usize,
    align: usize,
}

impl AllocationPoint {
    pub fn new(heap: Arc<Heap>, buffer_size: usize, align: usize) -> Self {
        Self {
            init: AtomicUsize::new(0),
            alloc: AtomicUsize::new(0),
            limit: AtomicUsize::new(0),
            frameptr: AtomicUsize::new(0),
            enabled: std::sync::atomic::AtomicBool::new(false),
            heap,
            buffer_size,
            align,
        }
    }

    /// `mps_reserve`: bump-allocate `size` bytes from the current buffer,
    /// refilling from the heap if the buffer cannot satisfy the request.
    /// Returns the reservation; the caller must initialize the object and
    /// call [`commit`](Self::commit) before the memory is live.
    pub fn reserve(&self, size: usize) -> Result<Reservation> {
        let aligned = align_up(size, self.align);
        loop {
            let alloc = self.alloc.load(Ordering::Acquire);
            let limit = self.limit.load(Ordering::Acquire);
            let next = alloc + aligned;
            if next <= limit {
                if self
                    .alloc
                    .compare_exchange_weak(alloc, next, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(Reservation { addr: alloc, size: aligned });
                }
                continue;
            }
            self.refill(aligned)?;
        }
    }

    /// `mps_commit`: confirm the reservation is fully initialized, making it
    /// visible to format scanners. Returns `false` ("trip") if a collection
    /// started mid-reservation and the object must be rebuilt in a fresh
    /// reservation (`mps_ap_trip`).
    pub fn commit(&self, reservation: Reservation) -> bool {
        if self.tripped(reservation) {
            return false;
        }
        self.init
            .fetch_max(reservation.addr + reservation.size, Ordering::AcqRel);
        true
    }

    /// `mps_ap_trip`: whether a collection-related event invalidated this
    /// reservation before commit (here: the buffer was refilled out from
    /// under it).
    fn tripped(&self, reservation: Reservation) -> bool {
        reservation.addr + reservation.size > self.limit.load(Ordering::Acquire)
    }

    fn refill(&self, min_size: usize) -> Result<()> {
        let size = min_size.max(self.buffer_size);
        let base = self.heap.allocate_tlab_memory_aligned(size, self.align)?;
        self.init.store(base, Ordering::Release);
        self.alloc.store(base, Ordering::Release);
        self.limit.store(base + size, Ordering::Release);
        Ok(())
    }

    /// `mps_ap_fill_with_reservoir_permit` (spec.md §6 Allocation group): as
    /// `reserve`, but a buffer refill that the heap's normal ceiling would
    /// reject may still succeed by drawing on `reservoir`, provided
    /// `Reservoir::admits` agrees (spec.md §4.J).
    pub fn ap_fill_with_reservoir_permit(
        &self,
        size: usize,
        reservoir: &Reservoir,
    ) -> Result<Reservation> {
        let aligned = align_up(size, self.align);
        loop {
            let alloc = self.alloc.load(Ordering::Acquire);
            let limit = self.limit.load(Ordering::Acquire);
            let next = alloc + aligned;
            if next <= limit {
                if self
                    .alloc
                    .compare_exchange_weak(alloc, next, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(Reservation { addr: alloc, size: aligned });
                }
                continue;
            }
            self.refill_with_reservoir_permit(aligned, reservoir)?;
        }
    }

    fn refill_with_reservoir_permit(&self, min_size: usize, reservoir: &Reservoir) -> Result<()> {
        let size = min_size.max(self.buffer_size);
        let base = match self.heap.allocate_tlab_memory_aligned(size, self.align) {
            Ok(base) => base,
            Err(PsvmError::OutOfMemory { .. }) => self
                .heap
                .allocate_tlab_memory_aligned_with_reservoir_permit(size, self.align, reservoir)?,
            Err(e) => return Err(e),
        };
        self.init.store(base, Ordering::Release);
        self.alloc.store(base, Ordering::Release);
        self.limit.store(base + size, Ordering::Release);
        Ok(())
    }

    /// `mps_ap_frame_push`: snapshot the current alloc position as a
    /// lightweight frame (`allocator::frame`).
    pub fn frame_push(&self) -> Result<usize> {
        if !self.enabled.load(Ordering::Acquire) {
            return Err(PsvmError::InvalidState {
                expected: "lightweight frames enabled".into(),
                actual: "lightweight frames disabled".into(),
            });
        }
        let frame = self.alloc.load(Ordering::Acquire);
        self.frameptr.store(frame, Ordering::Release);
        Ok(frame)
    }

    /// `mps_ap_frame_pop`: roll the alloc pointer back to a previously pushed
    /// frame. Only valid if nothing below `frame` has escaped (spec.md §4.C
    /// "lightweight pop is a bump-pointer rewind, not a free").
    pub fn frame_pop(&self, frame: usize) -> Result<()> {
        let current = self.alloc.load(Ordering::Acquire);
        if frame > current {
            return Err(PsvmError::InvalidArgument(
                "frame_pop target is ahead of the current alloc pointer".into(),
            ));
        }
        self.alloc.store(frame, Ordering::Release);
        self.init.fetch_min(frame, Ordering::AcqRel);
        Ok(())
    }

    pub fn set_lightweight_frames_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    pub fn alloc(&self) -> usize {
        self.alloc.load(Ordering::Acquire)
    }
}

fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

// An AP wraps a plain bump allocator conceptually; kept for pools that hand
// out a raw `BumpPointerAllocator` instead of going through `Heap` directly
// (see `allocator::sac`, which shares this buffer-refill shape per class).
pub(super) fn refill_from_bump(bump: &BumpPointerAllocator, size: usize) -> Result<usize> {
    bump.allocate(size)
}
