//! Observer Registry (spec.md §4.G).
//!
//! Restore is mostly a fixed sequence of "purge this cache" calls into
//! subsystems the collector knows nothing about — color management, the
//! idiom index, font caches, and so on. Rather than hard-coding those
//! subsystems here, `restore` drives a registry of `Observer` implementations
//! supplied by the embedder, invoked in the fixed phase order spec.md §4.F's
//! 19-step restore sequence names.

use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;

use crate::error::Result;

/// The fixed observer phases, in the order `save::restore::restore` invokes
/// them (spec.md §4.F step order). Variants are deliberately named after
/// what each phase purges, not after a step number, so registering one
/// doesn't require memorizing the numbered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObserverPhase {
    PageDeviceDeactivate,
    ColorInvalidate,
    XpsIccPurge,
    PdfExecutionContextPurge,
    ImageContextPurge,
    CurrentFileDrop,
    FileFilterPrune,
    ProcFilterValidate,
    NameCachePurge,
    SeparationReset,
    IdiomIndexPurge,
    GStateStackFree,
    FontCachePurge,
}

impl ObserverPhase {
    /// All phases in invocation order, for registry bootstrapping and tests.
    pub const ALL: [ObserverPhase; 13] = [
        ObserverPhase::PageDeviceDeactivate,
        ObserverPhase::ColorInvalidate,
        ObserverPhase::XpsIccPurge,
        ObserverPhase::PdfExecutionContextPurge,
        ObserverPhase::ImageContextPurge,
        ObserverPhase::CurrentFileDrop,
        ObserverPhase::FileFilterPrune,
        ObserverPhase::ProcFilterValidate,
        ObserverPhase::NameCachePurge,
        ObserverPhase::SeparationReset,
        ObserverPhase::IdiomIndexPurge,
        ObserverPhase::GStateStackFree,
        ObserverPhase::FontCachePurge,
    ];

    fn rank(self) -> usize {
        Self::ALL.iter().position(|p| *p == self).expect("ObserverPhase::ALL is exhaustive")
    }
}

/// A subsystem plugged into the restore pipeline at a fixed phase (spec.md
/// §3 "Observer"). `restore_prepare` runs for every open observer before any
/// physical log rollback happens (so it can still fail the whole restore
/// cleanly, spec.md §4.F steps 1-10); `restore_commit` runs after the log has
/// been replayed, when the operation is no longer allowed to fail the
/// restore as a whole (spec.md §4.F "fatal after step 11").
pub trait Observer: Send + Sync {
    /// Which phase this observer occupies. Multiple observers may share a
    /// phase; they run in registration order within it.
    fn phase(&self) -> ObserverPhase;

    /// Validate that this subsystem can be purged for the given restore
    /// target, without mutating anything yet. An error here aborts the
    /// restore before any state changes (spec.md invariant: restore is
    /// all-or-nothing through step 10).
    fn restore_prepare(&self, target_epoch: u32) -> Result<()>;

    /// Actually purge/reset this subsystem's cached state. Errors here are
    /// logged but do not unwind the restore — by this point the log has
    /// already been replayed and backing out would leave the VM in a worse
    /// state than finishing (spec.md §4.F "fatal after step 11").
    fn restore_commit(&self, target_epoch: u32) -> Result<()>;

    /// Optional structural scan: observers that retain VM references (e.g. a
    /// name cache holding interned strings) expose them here so the tracing
    /// collector can treat them as roots (spec.md §4.E).
    fn scan(&self) -> Vec<usize> {
        Vec::new()
    }
}

struct Entry {
    phase: ObserverPhase,
    observer: Arc<dyn Observer>,
}

/// Phase-ordered collection of observers, consulted by `save::restore` in
/// two passes (`prepare_all` then `commit_all`).
#[derive(Default)]
pub struct ObserverRegistry {
    entries: Vec<Entry>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Register an observer, inserted in phase order via binary search so
    /// `prepare_all`/`commit_all` never need to sort.
    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        let phase = observer.phase();
        let pos = self
            .entries
            .binary_search_by(|e| {
                let ord = e.phase.rank().cmp(&phase.rank());
                if ord == CmpOrdering::Equal {
                    CmpOrdering::Less
                } else {
                    ord
                }
            })
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, Entry { phase, observer });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Phase order for iteration/test assertions.
    pub fn phases(&self) -> Vec<ObserverPhase> {
        self.entries.iter().map(|e| e.phase).collect()
    }

    /// Run every observer's `restore_prepare` in phase order; stops and
    /// returns the first error (spec.md §4.F: restore fails atomically
    /// through step 10).
    pub fn prepare_all(&self, target_epoch: u32) -> Result<()> {
        for entry in &self.entries {
            entry.observer.restore_prepare(target_epoch)?;
        }
        Ok(())
    }

    /// Run every observer's `restore_commit` in phase order. Individual
    /// failures are collected rather than aborting the sequence, since by
    /// this point backing out is no longer an option.
    pub fn commit_all(&self, target_epoch: u32) -> Vec<crate::error::PsvmError> {
        let mut errors = Vec::new();
        for entry in &self.entries {
            if let Err(e) = entry.observer.restore_commit(target_epoch) {
                errors.push(e);
            }
        }
        errors
    }

    pub fn scan_all(&self) -> Vec<usize> {
        self.entries.iter().flat_map(|e| e.observer.scan()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingObserver {
        phase: ObserverPhase,
        order: Arc<Mutex<Vec<ObserverPhase>>>,
        fail_prepare: bool,
    }

    use parking_lot::Mutex;

    impl Observer for RecordingObserver {
        fn phase(&self) -> ObserverPhase {
            self.phase
        }

        fn restore_prepare(&self, _target_epoch: u32) -> Result<()> {
            if self.fail_prepare {
                return Err(crate::error::PsvmError::InvalidRestore {
                    reason: "forced failure".into(),
                });
            }
            Ok(())
        }

        fn restore_commit(&self, _target_epoch: u32) -> Result<()> {
            self.order.lock().push(self.phase);
            Ok(())
        }
    }

    #[test]
    fn observers_run_in_canonical_phase_order_regardless_of_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        registry.register(Arc::new(RecordingObserver {
            phase: ObserverPhase::FontCachePurge,
            order: order.clone(),
            fail_prepare: false,
        }));
        registry.register(Arc::new(RecordingObserver {
            phase: ObserverPhase::ColorInvalidate,
            order: order.clone(),
            fail_prepare: false,
        }));
        registry.register(Arc::new(RecordingObserver {
            phase: ObserverPhase::NameCachePurge,
            order: order.clone(),
            fail_prepare: false,
        }));

        registry.prepare_all(1).unwrap();
        let errors = registry.commit_all(1);
        assert!(errors.is_empty());

        let observed = order.lock().clone();
        assert_eq!(
            observed,
            vec![
                ObserverPhase::ColorInvalidate,
                ObserverPhase::NameCachePurge,
                ObserverPhase::FontCachePurge,
            ]
        );
    }

    #[test]
    fn prepare_all_stops_at_first_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        struct CountingObserver {
            phase: ObserverPhase,
            calls: Arc<AtomicUsize>,
            fail: bool,
        }
        impl Observer for CountingObserver {
            fn phase(&self) -> ObserverPhase {
                self.phase
            }
            fn restore_prepare(&self, _target_epoch: u32) -> Result<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    return Err(crate::error::PsvmError::InvalidRestore {
                        reason: "forced".into(),
                    });
                }
                Ok(())
            }
            fn restore_commit(&self, _target_epoch: u32) -> Result<()> {
                Ok(())
            }
        }

        let mut registry = ObserverRegistry::new();
        registry.register(Arc::new(CountingObserver {
            phase: ObserverPhase::PageDeviceDeactivate,
            calls: calls.clone(),
            fail: true,
        }));
        registry.register(Arc::new(CountingObserver {
            phase: ObserverPhase::ColorInvalidate,
            calls: calls.clone(),
            fail: false,
        }));

        assert!(registry.prepare_all(1).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
