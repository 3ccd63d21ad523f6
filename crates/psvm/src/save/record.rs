//! SaveRecord, the save stack, and the global/local allocation-mode stack
//! (spec.md §3 "Save object (SaveRecord)", §4.F "Checkpoint (`save`)",
//! §4.H "Allocation-mode stack").

use crate::error::{PsvmError, Result};
use crate::object::pool::{Pool, PoolAddr};
use crate::object::slot::SlotValue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// PostScript VM allocation scope, spec.md Glossary "Global / Local scope".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocMode {
    Local,
    Global,
}

impl AllocMode {
    pub fn is_global(self) -> bool {
        matches!(self, AllocMode::Global)
    }
}

/// `setglallocmode`'s bracketed stack (spec.md §4.H): `set(mode)` returns the
/// previous mode so a caller can restore it symmetrically
/// (`set_glallocmode(x); ...; set_glallocmode(prev)`, spec.md §8 round-trip
/// law).
pub struct GlobalLocalModeStack {
    current: Mutex<AllocMode>,
}

impl GlobalLocalModeStack {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(AllocMode::Local),
        }
    }

    pub fn current(&self) -> AllocMode {
        *self.current.lock()
    }

    /// `set_glallocmode(bool) -> previous`.
    pub fn set(&self, global: bool) -> AllocMode {
        let mut guard = self.current.lock();
        let previous = *guard;
        *guard = if global { AllocMode::Global } else { AllocMode::Local };
        previous
    }

    pub fn restore(&self, mode: AllocMode) {
        *self.current.lock() = mode;
    }
}

impl Default for GlobalLocalModeStack {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle to a checkpoint returned by `save()` (spec.md §6 `save() ->
/// SaveRef`). Opaque to the interpreter beyond equality/ordering by epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SaveRef(pub u32);

/// One save-log entry: a composite's prior contents, captured by the write
/// barrier before an overwrite (spec.md §3 "Save log entry").
///
/// `scope` records the allocation mode active when the *write* happened
/// (not the save's own mode) — invariant 5 ("global persistence across
/// local restores") uses this to skip reverting entries made while the
/// mutator was in global mode, even if the restore target is a local save
/// nested below the point where global mode was entered.
pub struct LogEntry {
    pub pool: Arc<Pool>,
    pub base: PoolAddr,
    pub index: usize,
    pub values: Vec<SlotValue>,
    pub scope: AllocMode,
}

/// Per-checkpoint bookkeeping (spec.md §3 "Save object (SaveRecord)").
pub struct SaveRecord {
    pub epoch: u32,
    pub mode_at_save: AllocMode,
    pub gstate_id_at_save: u64,
    pub language_level: u32,
    pub name_cache_epoch: u32,
    pub idiom_index_epoch: u32,
    log: Mutex<Vec<LogEntry>>,
}

impl SaveRecord {
    fn new(epoch: u32, mode_at_save: AllocMode, gstate_id_at_save: u64, language_level: u32, name_cache_epoch: u32, idiom_index_epoch: u32) -> Self {
        Self {
            epoch,
            mode_at_save,
            gstate_id_at_save,
            language_level,
            name_cache_epoch,
            idiom_index_epoch,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Append a log entry (write-barrier step 3, spec.md §4.F).
    pub fn append(&self, entry: LogEntry) {
        self.log.lock().push(entry);
    }

    /// Number of log entries captured at this epoch — used by tests to
    /// assert barrier idempotence (spec.md §8 property 2).
    pub fn log_len(&self) -> usize {
        self.log.lock().len()
    }

    fn take_log(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.log.lock())
    }
}

/// The stack of open checkpoints plus the monotone epoch counter (spec.md
/// §4.F "State").
pub struct SaveStack {
    records: Mutex<Vec<Arc<SaveRecord>>>,
    epoch: AtomicU32,
}

impl SaveStack {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            epoch: AtomicU32::new(0),
        }
    }

    /// `save()`: steps 1-3 of spec.md §4.F "Checkpoint" (parameter/gstate/
    /// mode snapshot, push, advance epoch). Returns the new `SaveRef`.
    #[allow(clippy::too_many_arguments)]
    pub fn save(
        &self,
        mode: AllocMode,
        gstate_id: u64,
        language_level: u32,
        name_cache_epoch: u32,
        idiom_index_epoch: u32,
    ) -> SaveRef {
        let mut records = self.records.lock();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let record = Arc::new(SaveRecord::new(
            epoch,
            mode,
            gstate_id,
            language_level,
            name_cache_epoch,
            idiom_index_epoch,
        ));
        records.push(record);
        SaveRef(epoch)
    }

    pub fn current_epoch(&self) -> u32 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// `numbersaves(level) -> int`: the count of open saves (spec.md §6).
    /// `level` is accepted for ABI parity but the core tracks one global
    /// nesting depth; interpreters distinguishing per-context depth filter
    /// externally.
    pub fn numbersaves(&self, _level: i32) -> i32 {
        self.records.lock().len() as i32
    }

    pub fn depth(&self) -> usize {
        self.records.lock().len()
    }

    /// The record at the top of the stack — the record any in-flight write
    /// barrier logs into.
    pub fn top(&self) -> Option<Arc<SaveRecord>> {
        self.records.lock().last().cloned()
    }

    /// Locate `target` on the stack; `None` if it is not a currently open
    /// save (already restored, or never issued by this stack) — the caller
    /// maps that to `invalid-restore`.
    pub fn position_of(&self, target: SaveRef) -> Option<usize> {
        self.records
            .lock()
            .iter()
            .position(|r| r.epoch == target.0)
    }

    /// Commit-restore step (spec.md §4.F step 16): pop and replay every
    /// record above `target` (inclusive down to, but excluding, `target`
    /// itself), newest first, skipping log entries made in global scope
    /// (invariant 5). Returns the target record's snapshot for the caller to
    /// apply (steps 17-19).
    pub fn unwind_to(&self, target: SaveRef) -> Result<Arc<SaveRecord>> {
        let mut records = self.records.lock();
        let pos = records
            .iter()
            .position(|r| r.epoch == target.0)
            .ok_or_else(|| PsvmError::InvalidRestore {
                reason: format!("save {} is not on the open-save stack", target.0),
            })?;

        // Pop from the top down to (and not including) `pos`.
        while records.len() > pos + 1 {
            let record = records.pop().expect("checked len above");
            for entry in record.take_log().into_iter().rev() {
                if entry.scope.is_global() {
                    // Global-mode writes persist across local restores
                    // (invariant 5) — never replayed back.
                    continue;
                }
                entry.pool.write_range(entry.base, &entry.values);
            }
        }

        Ok(records[pos].clone())
    }
}

impl Default for SaveStack {
    fn default() -> Self {
        Self::new()
    }
}
