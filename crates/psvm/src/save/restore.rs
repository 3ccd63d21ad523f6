//! Restore orchestration (spec.md §4.F, the 19-step restore sequence).
//!
//! `restore` is split at a hard line: steps 1-10 only *check* whether the
//! restore can proceed (stack-position validity plus every registered
//! observer's `restore_prepare`) and mutate nothing, so a failure there
//! leaves the VM exactly as it was. From step 11 onward the save log is
//! physically replayed (`SaveStack::unwind_to`) and every observer's
//! `restore_commit` runs; a per-observer failure past this point is
//! recorded but does not unwind the restore (spec.md "fatal after step
//! 11" — by then backing out would leave the VM in a worse state than
//! finishing).

use crate::error::{PsvmError, Result};
use crate::object::pool::{Pool, PoolAddr};
use crate::object::slot::epoch_less_than;
use crate::observer::ObserverRegistry;
use crate::save::record::{AllocMode, SaveRecord, SaveRef, SaveStack};
use log::{info, warn};
use std::sync::Arc;

/// Snapshot values re-applied to the interpreter once log replay and the
/// observer commit phase complete (spec.md §4.F steps 17-19, "parameter/
/// gstate restoration").
#[derive(Debug)]
pub struct RestoreReport {
    pub restored_epoch: u32,
    pub mode: AllocMode,
    pub gstate_id: u64,
    pub language_level: u32,
    pub name_cache_epoch: u32,
    pub idiom_index_epoch: u32,
    /// Non-fatal failures from observers' `restore_commit` (spec.md "fatal
    /// after step 11"): surfaced for logging, not propagated as a restore
    /// failure.
    pub commit_errors: Vec<PsvmError>,
}

/// `checkValidRestoreStack` (spec.md §4.F step 1): reject the restore if any
/// of `stack_refs` — slots an embedder gathered by walking its operand/
/// execution/dictionary/temporary stacks — names a payload allocated (via
/// [`crate::object::pool::Pool::alloc_at_epoch`]) at an epoch later than
/// `target` (spec.md §8 scenario 4, "Invalid restore via file"). Addresses
/// never stamped through `alloc_at_epoch` read back epoch `0` and never
/// trip this check, so passing `&[]` reproduces the pre-validation
/// behavior exactly.
pub fn validate_stack_refs(stack_refs: &[(Arc<Pool>, PoolAddr)], target: SaveRef) -> Result<()> {
    for (pool, addr) in stack_refs {
        if addr.is_null() {
            continue;
        }
        let alloc_epoch = pool.alloc_epoch_of(*addr);
        if epoch_less_than(target.0, alloc_epoch) {
            return Err(PsvmError::InvalidRestore {
                reason: format!(
                    "stack references a payload allocated at epoch {alloc_epoch}, after restore target {}",
                    target.0
                ),
            });
        }
    }
    Ok(())
}

/// `restore(target)`: validate, replay, and re-apply the snapshot recorded
/// at `target`. Returns `InvalidRestore` if `target` is not an open save on
/// `stack`, if `stack_refs` names a payload allocated after `target`, or if
/// any observer's `restore_prepare` rejects the restore — in all three
/// cases nothing has been mutated (steps 1-10 only check).
pub fn restore(
    stack: &SaveStack,
    observers: &ObserverRegistry,
    stack_refs: &[(Arc<Pool>, PoolAddr)],
    target: SaveRef,
) -> Result<RestoreReport> {
    // Steps 1-2 (`checkValidRestoreStack`): target must still be open, and
    // no live stack slot may outlive it.
    stack.position_of(target).ok_or_else(|| PsvmError::InvalidRestore {
        reason: format!("save {} is not on the open-save stack", target.0),
    })?;
    validate_stack_refs(stack_refs, target)?;

    // Steps 3-10: every observer may veto the restore before anything is
    // touched.
    if let Err(e) = observers.prepare_all(target.0) {
        warn!("restore to save {}: aborted in prepare phase: {e}", target.0);
        return Err(e);
    }

    // Step 11: physically replay the log, popping every record above
    // `target` (`unwind_to` skips global-scoped entries, invariant 5).
    let record: Arc<SaveRecord> = stack.unwind_to(target)?;
    info!("restore: replayed save log back to save {}", target.0);

    // Steps 12-19: re-apply the target's parameter/gstate snapshot and let
    // every observer commit its own purge. Failures here are collected, not
    // propagated — the log has already been rolled back.
    let commit_errors = observers.commit_all(target.0);
    if !commit_errors.is_empty() {
        warn!(
            "restore to save {}: {} observer(s) failed during commit (non-fatal)",
            target.0,
            commit_errors.len()
        );
    }

    Ok(RestoreReport {
        restored_epoch: record.epoch,
        mode: record.mode_at_save,
        gstate_id: record.gstate_id_at_save,
        language_level: record.language_level,
        name_cache_epoch: record.name_cache_epoch,
        idiom_index_epoch: record.idiom_index_epoch,
        commit_errors,
    })
}
