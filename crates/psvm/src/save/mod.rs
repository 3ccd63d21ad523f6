//! Save/Restore Engine (spec.md §4.F, component F), grounded in full on
//! `swmemory.c` (`purge_memory`, `save_range`, `check_asave*`,
//! `check_dsave*`, `check_gsave`, `psvm_copy_object`, `psvm_copy_dictmatch`,
//! `checkValidRestoreStack`).
//!
//! - [`record`]: `SaveRecord`/`SaveStack`, the open-save stack and its
//!   per-save log.
//! - [`barrier`]: the write barriers (`check_asave*`, `check_dsave*`,
//!   `check_gsave`) that populate that log.
//! - [`restore`]: the restore orchestration tying the log replay to the
//!   observer registry (`observer.rs`).
//! - [`copy`]: `psvm_copy`, deep-copying external object graphs into the
//!   managed heap.

pub mod barrier;
pub mod copy;
pub mod record;
pub mod restore;

pub use barrier::{check_asave, check_asave_one, check_dsave, check_dsave_all, check_gsave, check_store_scope, GStateIdCounter, ASAVE_WINDOW};
pub use copy::{psvm_copy_dictmatch, psvm_copy_object, ExternalValue};
pub use record::{AllocMode, GlobalLocalModeStack, LogEntry, SaveRecord, SaveRef, SaveStack};
pub use restore::{restore, RestoreReport};
