//! `psvm_copy`: deep-copying an external (non-VM) object graph into the
//! managed heap (spec.md §4.H), grounded on `psvm_copy_object`/
//! `psvm_copy_dictwalkfn`/`psvm_copy_dictmatch` in `swmemory.c`.
//!
//! The recursion-depth cap (`ArenaConfig::copy_recursion_limit`) guards
//! against unbounded external graphs with a `LimitCheck` error. The
//! local-into-global check (invariant 3) is performed *after* each child is
//! copied, not before — matching the original's ordering exactly
//! (SPEC_FULL.md §4.H): a composite child's own scope is only known once its
//! own recursive copy has returned.

use crate::error::{PsvmError, Result};
use crate::object::pool::{Pool, PoolAddr};
use crate::object::slot::{Access, SlotTag, SlotValue};
use crate::save::barrier::check_store_scope;
use std::sync::Arc;

/// A non-VM value being copied in from outside the managed heap — the input
/// side of `psvm_copy_object`. Composite variants carry already-`ExternalValue`
/// children, so a whole input graph can be described without ever touching
/// the VM.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalValue {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Null,
    String(Vec<u8>),
    Array(Vec<ExternalValue>),
    Dictionary(Vec<(ExternalValue, ExternalValue)>),
    /// An opaque VM type already resident in the managed heap (file, save,
    /// gstate, long-string per spec.md §4.H) — copied by reference, not
    /// reallocated. Carries its own `global` flag forward unchanged, which
    /// is what lets `check_store_scope` actually observe a local-into-global
    /// violation: every other variant inherits the copy's target scope, so
    /// only a `VmRef` can disagree with it.
    VmRef(SlotValue),
}

/// Copies `value` into `pool`, allocating any composites under `global`
/// scope. Fails with `LimitCheck` if nesting exceeds `recursion_limit`, or
/// `InvalidAccess` if a copied child turns out to be local while `global` is
/// `true` (invariant 3).
pub fn psvm_copy_object(
    pool: &Arc<Pool>,
    value: &ExternalValue,
    global: bool,
    recursion_limit: usize,
) -> Result<SlotValue> {
    copy_inner(pool, value, global, recursion_limit, 0)
}

fn copy_inner(
    pool: &Arc<Pool>,
    value: &ExternalValue,
    global: bool,
    recursion_limit: usize,
    depth: usize,
) -> Result<SlotValue> {
    if depth > recursion_limit {
        return Err(PsvmError::LimitCheck {
            reason: format!("psvm_copy exceeded recursion limit of {recursion_limit}"),
        });
    }

    match value {
        ExternalValue::Integer(i) => Ok(immediate(SlotTag::Integer, *i as usize, global)),
        ExternalValue::Real(r) => Ok(immediate(SlotTag::Real, r.to_bits() as usize, global)),
        ExternalValue::Boolean(b) => Ok(immediate(SlotTag::Boolean, *b as usize, global)),
        ExternalValue::Null => Ok(immediate(SlotTag::Null, 0, global)),
        ExternalValue::String(bytes) => {
            let addr = pool.alloc(bytes.len());
            for (i, byte) in bytes.iter().enumerate() {
                pool.write(addr, i, immediate(SlotTag::Integer, *byte as usize, global));
            }
            Ok(composite(SlotTag::String, addr, global))
        }
        ExternalValue::Array(items) => {
            let addr = pool.alloc(items.len());
            for (i, item) in items.iter().enumerate() {
                let copied = copy_inner(pool, item, global, recursion_limit, depth + 1)?;
                // Checked after the copy, not before (SPEC_FULL.md §4.H).
                check_store_scope(global, copied.global)?;
                pool.write(addr, i, copied);
            }
            Ok(composite(SlotTag::Array, addr, global))
        }
        ExternalValue::Dictionary(pairs) => psvm_copy_dictmatch(pool, pairs, global, recursion_limit, depth),
        ExternalValue::VmRef(slot) => Ok(*slot),
    }
}

/// `psvm_copy_dictmatch`: copies a dictionary's key/value pairs as one flat
/// slot run (`key0, value0, key1, value1, ...`), matching
/// `psvm_copy_dictwalkfn`'s wholesale pair layout rather than separate key
/// and value pools.
pub fn psvm_copy_dictmatch(
    pool: &Arc<Pool>,
    pairs: &[(ExternalValue, ExternalValue)],
    global: bool,
    recursion_limit: usize,
    depth: usize,
) -> Result<SlotValue> {
    if depth > recursion_limit {
        return Err(PsvmError::LimitCheck {
            reason: format!("psvm_copy exceeded recursion limit of {recursion_limit}"),
        });
    }
    let addr = pool.alloc(pairs.len() * 2);
    for (i, (key, val)) in pairs.iter().enumerate() {
        let copied_key = copy_inner(pool, key, global, recursion_limit, depth + 1)?;
        check_store_scope(global, copied_key.global)?;
        pool.write(addr, i * 2, copied_key);

        let copied_val = copy_inner(pool, val, global, recursion_limit, depth + 1)?;
        check_store_scope(global, copied_val.global)?;
        pool.write(addr, i * 2 + 1, copied_val);
    }
    Ok(composite(SlotTag::Dictionary, addr, global))
}

fn immediate(tag: SlotTag, payload: usize, global: bool) -> SlotValue {
    SlotValue {
        tag,
        access: Access::Unlimited,
        access_override: false,
        executable: false,
        global,
        not_vm: false,
        saved_epoch: 0,
        payload,
    }
}

fn composite(tag: SlotTag, addr: PoolAddr, global: bool) -> SlotValue {
    SlotValue {
        tag,
        access: Access::Unlimited,
        access_override: false,
        executable: false,
        global,
        not_vm: false,
        saved_epoch: 0,
        payload: addr.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::pool::PoolClass;

    #[test]
    fn copies_nested_array_and_preserves_payload_addresses() {
        let pool = Arc::new(Pool::new(PoolClass::Amc));
        let value = ExternalValue::Array(vec![
            ExternalValue::Integer(1),
            ExternalValue::Array(vec![ExternalValue::Integer(2), ExternalValue::Integer(3)]),
        ]);
        let copied = psvm_copy_object(&pool, &value, false, 64).unwrap();
        assert_eq!(copied.tag, SlotTag::Array);
        let outer_addr = PoolAddr(copied.payload);
        assert_eq!(pool.read(outer_addr, 0).payload, 1);
        let inner = pool.read(outer_addr, 1);
        assert_eq!(inner.tag, SlotTag::Array);
        let inner_addr = PoolAddr(inner.payload);
        assert_eq!(pool.read(inner_addr, 0).payload, 2);
        assert_eq!(pool.read(inner_addr, 1).payload, 3);
    }

    #[test]
    fn dictmatch_lays_out_keys_and_values_alternating() {
        let pool = Arc::new(Pool::new(PoolClass::Amc));
        let pairs = vec![
            (ExternalValue::Integer(10), ExternalValue::Integer(100)),
            (ExternalValue::Integer(20), ExternalValue::Integer(200)),
        ];
        let copied = psvm_copy_dictmatch(&pool, &pairs, false, 64, 0).unwrap();
        assert_eq!(copied.tag, SlotTag::Dictionary);
        let addr = PoolAddr(copied.payload);
        assert_eq!(pool.read(addr, 0).payload, 10);
        assert_eq!(pool.read(addr, 1).payload, 100);
        assert_eq!(pool.read(addr, 2).payload, 20);
        assert_eq!(pool.read(addr, 3).payload, 200);
    }

    #[test]
    fn exceeding_recursion_limit_is_limit_check() {
        let pool = Arc::new(Pool::new(PoolClass::Amc));
        let mut value = ExternalValue::Integer(0);
        for _ in 0..10 {
            value = ExternalValue::Array(vec![value]);
        }
        assert!(matches!(
            psvm_copy_object(&pool, &value, false, 3),
            Err(PsvmError::LimitCheck { .. })
        ));
    }

    #[test]
    fn local_child_into_global_array_is_invalid_access() {
        let pool = Arc::new(Pool::new(PoolClass::Amc));
        // A dictionary value holds a local array nested inside a global
        // array: the inner array is copied under `global=false` explicitly
        // via a manual call to exercise the invariant-3 check path.
        let inner_local = copy_inner(&pool, &ExternalValue::Array(vec![]), false, 64, 0).unwrap();
        assert!(!inner_local.global);
        assert!(check_store_scope(true, inner_local.global).is_err());
    }

    #[test]
    fn psvm_copy_rejects_local_vmref_nested_under_global_copy() {
        let pool = Arc::new(Pool::new(PoolClass::Amc));
        let local_addr = pool.alloc(1);
        let local_file = SlotValue {
            tag: SlotTag::File,
            access: Access::Unlimited,
            access_override: false,
            executable: false,
            global: false,
            not_vm: false,
            saved_epoch: 0,
            payload: local_addr.0,
        };
        let value = ExternalValue::Array(vec![ExternalValue::VmRef(local_file)]);
        let err = psvm_copy_object(&pool, &value, true, 64).unwrap_err();
        assert!(matches!(err, PsvmError::InvalidAccess { .. }));
    }

    #[test]
    fn psvm_copy_accepts_global_vmref_nested_under_global_copy() {
        let pool = Arc::new(Pool::new(PoolClass::Amc));
        let global_addr = pool.alloc(1);
        let global_file = SlotValue {
            tag: SlotTag::File,
            access: Access::Unlimited,
            access_override: false,
            executable: false,
            global: true,
            not_vm: false,
            saved_epoch: 0,
            payload: global_addr.0,
        };
        let value = ExternalValue::Array(vec![ExternalValue::VmRef(global_file)]);
        let copied = psvm_copy_object(&pool, &value, true, 64).unwrap();
        let addr = PoolAddr(copied.payload);
        assert_eq!(pool.read(addr, 0).payload, global_addr.0);
        assert!(pool.read(addr, 0).global);
    }
}
