//! Segregated-fit Allocation Cache (spec.md §4.C), grounded on the real
//! `mps_sac_s`/`mps_sac_class_s` pair: a small per-thread cache of freelists,
//! one per size class, so repeated alloc/free of similar-sized objects
//! avoids the pool lock entirely on the fast path.
//!
//! `MPS_SAC_CLASS_LIMIT` (8) bounds the number of distinct size classes a
//! cache can track; each class has a high-water "cached_count" governing how
//! many freed blocks of that size are kept before the excess is flushed back
//! to the pool.

use crate::error::{PsvmError, Result};
use crate::heap::Reservoir;
use std::sync::Arc;
use std::sync::Mutex;

use super::ap::AllocationPoint;

/// Maximum distinct size classes per cache, matching `MPS_SAC_CLASS_LIMIT`.
pub const SAC_CLASS_LIMIT: usize = 8;

/// One size class: block size plus how many freed blocks of that size the
/// cache is willing to retain before flushing to the backing pool.
#[derive(Debug, Clone, Copy)]
pub struct SacClass {
    pub block_size: usize,
    pub cached_count: usize,
    pub frequency: u32,
}

struct Freelist {
    class: SacClass,
    blocks: Vec<usize>,
}

/// Segregated-fit allocation cache. Wraps an [`AllocationPoint`] as the
/// backing source for cache misses and large (unclassed) requests.
pub struct Sac {
    middle: usize,
    freelists: Mutex<Vec<Freelist>>,
    backing: AllocationPoint,
    reservoir: Arc<Reservoir>,
}

impl Sac {
    /// `mps_sac_create`: classes must be sorted by ascending `block_size` and
    /// fit within [`SAC_CLASS_LIMIT`]; `middle` is the split point used to
    /// decide which direction the class search starts from. `reservoir` backs
    /// `alloc`'s `has_reservoir_permit` fallback.
    pub fn new(backing: AllocationPoint, classes: Vec<SacClass>, reservoir: Arc<Reservoir>) -> Result<Self> {
        if classes.len() > SAC_CLASS_LIMIT {
            return Err(PsvmError::Configuration(format!(
                "sac class count {} exceeds MPS_SAC_CLASS_LIMIT ({})",
                classes.len(),
                SAC_CLASS_LIMIT
            )));
        }
        if !classes.windows(2).all(|w| w[0].block_size < w[1].block_size) {
            return Err(PsvmError::Configuration(
                "sac classes must be strictly ascending by block_size".into(),
            ));
        }
        let middle = classes
            .get(classes.len() / 2)
            .map(|c| c.block_size)
            .unwrap_or(0);
        let freelists = classes
            .into_iter()
            .map(|class| Freelist { class, blocks: Vec::new() })
            .collect();
        Ok(Self {
            middle,
            freelists: Mutex::new(freelists),
            backing,
            reservoir,
        })
    }

    pub fn middle(&self) -> usize {
        self.middle
    }

    /// `mps_sac_alloc`: serve from the matching class's freelist if
    /// non-empty, else fall through to the backing allocation point.
    /// `has_reservoir_permit` routes the fallback through
    /// `ap_fill_with_reservoir_permit` instead of the plain `reserve`, so a
    /// permit-carrying request can still make progress once the backing AP's
    /// normal ceiling is exhausted (spec.md §4.J, §9).
    pub fn alloc(&self, size: usize, has_reservoir_permit: bool) -> Result<usize> {
        let class_index = self.class_for_size(size);
        if let Some(idx) = class_index {
            let mut freelists = self.freelists.lock().unwrap();
            if let Some(addr) = freelists[idx].blocks.pop() {
                return Ok(addr);
            }
        }
        let r = if has_reservoir_permit {
            self.backing.ap_fill_with_reservoir_permit(size, &self.reservoir)?
        } else {
            self.backing.reserve(size)?
        };
        if !self.backing.commit(r) {
            return Err(PsvmError::AtomicUpdateFailed(
                "sac fallback allocation tripped before commit".into(),
            ));
        }
        Ok(r.addr)
    }

    /// `mps_sac_free`: return a block to its class's freelist, or drop it
    /// (it becomes unreachable garbage for the next collection) once that
    /// class's `cached_count` high-water mark is exceeded.
    pub fn free(&self, addr: usize, size: usize) {
        let Some(idx) = self.class_for_size(size) else { return };
        let mut freelists = self.freelists.lock().unwrap();
        let list = &mut freelists[idx];
        if list.blocks.len() < list.class.cached_count {
            list.blocks.push(addr);
        }
    }

    /// `mps_sac_flush`: empty every class's freelist back to nothing,
    /// releasing any memory the cache was holding.
    pub fn flush(&self) {
        let mut freelists = self.freelists.lock().unwrap();
        for list in freelists.iter_mut() {
            list.blocks.clear();
        }
    }

    /// `mps_sac_free_size`: total bytes currently parked in freelists.
    pub fn free_size(&self) -> usize {
        let freelists = self.freelists.lock().unwrap();
        freelists
            .iter()
            .map(|list| list.blocks.len() * list.class.block_size)
            .sum()
    }

    fn class_for_size(&self, size: usize) -> Option<usize> {
        let freelists = self.freelists.lock().unwrap();
        freelists.iter().position(|list| list.class.block_size == size)
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
        AllocationPoint::new(heap, 4096, 8)
    }

    fn test_reservoir() -> Arc<Reservoir> {
        let reservoir = Arc::new(Reservoir::new());
        reservoir.set_limit(1024 * 1024);
        reservoir
    }

    fn classes() -> Vec<SacClass> {
        vec![
            SacClass { block_size: 16, cached_count: 4, frequency: 1 },
            SacClass { block_size: 32, cached_count: 4, frequency: 1 },
            SacClass { block_size: 64, cached_count: 2, frequency: 1 },
        ]
    }

    #[test]
    fn rejects_too_many_classes() {
        let many: Vec<SacClass> = (0..SAC_CLASS_LIMIT + 1)
            .map(|i| SacClass { block_size: (i + 1) * 8, cached_count: 1, frequency: 1 })
            .collect();
        assert!(Sac::new(test_ap(), many, test_reservoir()).is_err());
    }

    #[test]
    fn rejects_unsorted_classes() {
        let bad = vec![
            SacClass { block_size: 32, cached_count: 1, frequency: 1 },
            SacClass { block_size: 16, cached_count: 1, frequency: 1 },
        ];
        assert!(Sac::new(test_ap(), bad, test_reservoir()).is_err());
    }

    #[test]
    fn free_then_alloc_reuses_cached_block() {
        let sac = Sac::new(test_ap(), classes(), test_reservoir()).unwrap();
        let addr = sac.alloc(32, false).unwrap();
        sac.free(addr, 32);
        assert_eq!(sac.free_size(), 32);
        let addr2 = sac.alloc(32, false).unwrap();
        assert_eq!(addr2, addr);
        assert_eq!(sac.free_size(), 0);
    }

    #[test]
    fn free_beyond_cached_count_is_dropped() {
        let sac = Sac::new(test_ap(), classes(), test_reservoir()).unwrap();
        let addrs: Vec<usize> = (0..3).map(|_| sac.alloc(64, false).unwrap()).collect();
        for a in &addrs {
            sac.free(*a, 64);
        }
        // cached_count for the 64-byte class is 2, so only 2 of 3 stick.
        assert_eq!(sac.free_size(), 128);
    }

    #[test]
    fn flush_clears_all_freelists() {
        let sac = Sac::new(test_ap(), classes(), test_reservoir()).unwrap();
        let addr = sac.alloc(16, false).unwrap();
        sac.free(addr, 16);
        sac.flush();
        assert_eq!(sac.free_size(), 0);
    }

    #[test]
    fn alloc_with_reservoir_permit_succeeds_past_the_backing_aps_normal_ceiling() {
        // A heap with no normal-path headroom at all: an unclassed request
        // without a permit fails, the same request with a permit succeeds.
        let mut cfg = ArenaConfig::default();
        cfg.max_heap_size = 64 * 1024;
        cfg.reservoir_limit = 64 * 1024;
        let heap = Arc::new(Heap::new(Arc::new(cfg)).unwrap());
        let reservoir = Arc::new(Reservoir::new());
        reservoir.set_limit(64 * 1024);
        let ap = AllocationPoint::new(heap, 4096, 8);
        let sac = Sac::new(ap, classes(), reservoir).unwrap();

        assert!(sac.alloc(100, false).is_err());
        assert!(sac.alloc(100, true).is_ok());
    }
}
