//! Lightweight frame scoping (spec.md §4.C, "frame_push/frame_pop").
//!
//! A frame is a cheap, AP-local stack discipline: pushing records the current
//! bump position, popping rewinds to it. Cheaper than a real allocation
//! because nothing is freed individually — the buffer segment just becomes
//! available for the next reservation. Used by interpreters to scope
//! temporary allocations to a call without going through `save`/`restore`.

use crate::error::Result;
use super::ap::AllocationPoint;

/// RAII guard for one pushed frame: dropping without calling [`pop`](Self::pop)
/// leaves the frame pushed (matching the C API, where an explicit
/// `mps_ap_frame_pop` is required — this type exists so Rust callers don't
/// have to remember the raw frame pointer themselves).
pub struct FrameGuard<'a> {
    ap: &'a AllocationPoint,
    frame: usize,
    popped: bool,
}

impl<'a> FrameGuard<'a> {
    pub fn push(ap: &'a AllocationPoint) -> Result<Self> {
        let frame = ap.frame_push()?;
        Ok(Self { ap, frame, popped: false })
    }

    pub fn pop(mut self) -> Result<()> {
        self.ap.frame_pop(self.frame)?;
        self.popped = true;
        Ok(())
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if !self.popped {
            let _ = self.ap.frame_pop(self.frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;
    use crate::heap::Heap;
    use std::sync::Arc;

    fn test_ap() -> AllocationPoint {
        let mut cfg = ArenaConfig::default();
        cfg.max_heap_size = 16 * 1024 * 1024;
        let heap = Arc::new(Heap::new(Arc::new(cfg)).unwrap());
        let ap = AllocationPoint::new(heap, 4096, 8);
        ap.set_lightweight_frames_enabled(true);
        ap
    }

    #[test]
    fn drop_without_pop_still_rewinds() {
        let ap = test_ap();
        let before = ap.alloc();
        {
            let _guard = FrameGuard::push(&ap).unwrap();
            ap.reserve(128).unwrap();
            assert!(ap.alloc() > before);
        }
        assert_eq!(ap.alloc(), before);
    }

    #[test]
    fn explicit_pop_rewinds() {
        let ap = test_ap();
        let before = ap.alloc();
        let guard = FrameGuard::push(&ap).unwrap();
        ap.reserve(64).unwrap();
        guard.pop().unwrap();
        assert_eq!(ap.alloc(), before);
    }
}
