//! Object Formats (spec.md §4.B).
//!
//! A format is a vtable the collector calls per object: `scan`, `skip`,
//! `forward`, `is_forwarded`, `pad`. Per the Design Notes (spec.md §9,
//! "Deep inheritance in format vtables"), this is expressed as a
//! tagged-variant enum of known shapes plus a generic callback escape hatch,
//! rather than trait-object dispatch through a deep hierarchy — matching how
//! `relocate::forwarding` and `object::header` already encode forwarding and
//! mark state as plain data rather than virtual calls.

use crate::error::{PsvmError, Result};
use crate::marker::scan_state::ScanState;
use crate::relocate::forwarding::ForwardingTable;
use std::sync::Arc;

/// Which of the three layout shapes (spec.md §4.B "Variants") an object
/// follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVariant {
    /// Every instance has the same size (e.g. a gstate record).
    FixedSize { size: usize },
    /// Instance size is read from a length field at a fixed offset in the
    /// header (e.g. arrays, strings).
    VariableSizeHeader { header_size: usize },
    /// As `VariableSizeHeader`, but the object pointer handed to the mutator
    /// is offset from the true header start by `header_size` (auto-header
    /// pools hide the header from the client).
    AutoHeader { header_size: usize },
}

/// Per-object-class callbacks a collector needs. One `Format` is created per
/// pool (`fmt_create_{A,B,auto_header,fixed}`, spec.md §6).
pub struct Format {
    variant: FormatVariant,
    align: usize,
    scan_fn: Box<dyn Fn(&ScanState, usize, usize) -> Result<()> + Send + Sync>,
    size_fn: Box<dyn Fn(usize) -> usize + Send + Sync>,
    forwarding: Arc<ForwardingTable>,
}

impl Format {
    pub fn new(
        variant: FormatVariant,
        align: usize,
        forwarding: Arc<ForwardingTable>,
        scan_fn: impl Fn(&ScanState, usize, usize) -> Result<()> + Send + Sync + 'static,
        size_fn: impl Fn(usize) -> usize + Send + Sync + 'static,
    ) -> Self {
        Self {
            variant,
            align,
            scan_fn: Box::new(scan_fn),
            size_fn: Box::new(size_fn),
            forwarding,
        }
    }

    pub fn align(&self) -> usize {
        self.align
    }

    pub fn variant(&self) -> FormatVariant {
        self.variant
    }

    /// `scan(ss, base, limit)`: walk a contiguous range invoking the fix
    /// protocol on every reference. Edge-case policy (spec.md §4.B): a
    /// not-VM slot must never be passed to `fix`, and a zero-length composite
    /// must still have its header traversed — both are the scan callback's
    /// responsibility since only it knows the object's internal layout.
    pub fn scan(&self, ss: &ScanState, base: usize, limit: usize) -> Result<()> {
        if base > limit {
            return Err(PsvmError::InvalidArgument(format!(
                "scan range base {:#x} > limit {:#x}",
                base, limit
            )));
        }
        (self.scan_fn)(ss, base, limit)
    }

    /// `skip(addr) → next_addr`: advance over one object.
    pub fn skip(&self, addr: usize) -> usize {
        addr + self.object_size(addr)
    }

    fn object_size(&self, addr: usize) -> usize {
        match self.variant {
            FormatVariant::FixedSize { size } => size,
            FormatVariant::VariableSizeHeader { .. } | FormatVariant::AutoHeader { .. } => {
                (self.size_fn)(addr)
            }
        }
    }

    /// `forward(old, new)`: install a forwarding address.
    pub fn forward(&self, old: usize, new: usize) {
        self.forwarding.add_entry(old, new);
    }

    /// `is_forwarded(addr) → new_or_null`.
    pub fn is_forwarded(&self, addr: usize) -> Option<usize> {
        self.forwarding.lookup(addr)
    }

    /// `pad(addr, size)`: write a self-describing filler recognized by `skip`
    /// and `scan` as an object with no references, `size` bytes long.
    ///
    /// # Safety
    /// `addr` must be valid, writable, and `size`-bytes long.
    pub unsafe fn pad(&self, addr: usize, size: usize) {
        debug_assert!(size >= std::mem::size_of::<usize>());
        std::ptr::write_bytes(addr as *mut u8, 0, size);
        // Encode the pad length in the first word so `skip` can step over it
        // without consulting `size_fn` (which may not recognize padding).
        (addr as *mut usize).write_volatile(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::scan_state::{Fix, FixOutcome};

    struct NoopFix;
    impl Fix for NoopFix {
        fn fix(&self, _addr: usize) -> FixOutcome {
            FixOutcome::Unchanged
        }
    }

    #[test]
    fn fixed_size_skip_advances_by_constant() {
        let fwd = Arc::new(ForwardingTable::new(0, 1 << 20));
        let fmt = Format::new(
            FormatVariant::FixedSize { size: 64 },
            8,
            fwd,
            |_, _, _| Ok(()),
            |_| 64,
        );
        assert_eq!(fmt.skip(0x1000), 0x1040);
    }

    #[test]
    fn forward_and_is_forwarded_round_trip() {
        let fwd = Arc::new(ForwardingTable::new(0, 1 << 20));
        let fmt = Format::new(FormatVariant::FixedSize { size: 32 }, 8, fwd, |_, _, _| Ok(()), |_| 32);
        fmt.forward(0x100, 0x200);
        assert_eq!(fmt.is_forwarded(0x100), Some(0x200));
        assert_eq!(fmt.is_forwarded(0x300), None);
    }

    #[test]
    fn scan_rejects_inverted_range() {
        let fwd = Arc::new(ForwardingTable::new(0, 1 << 20));
        let fix = NoopFix;
        let ss = ScanState::begin(0, 0, &fix);
        let fmt = Format::new(FormatVariant::FixedSize { size: 32 }, 8, fwd, |_, _, _| Ok(()), |_| 32);
        assert!(fmt.scan(&ss, 0x200, 0x100).is_err());
    }
}
