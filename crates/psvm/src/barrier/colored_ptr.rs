//! Colored Pointer Implementation

use std::sync::atomic::{AtomicUsize, Ordering};

/// ColoredPointer - wrapper for pointer with metadata bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColoredPointer {
    raw: usize,
}

impl ColoredPointer {
    pub const MARKED0_MASK: usize = 1 << 44;
    pub const MARKED1_MASK: usize = 1 << 45;
    pub const REMAPPED_MASK: usize = 1 << 46;
    pub const FINALIZABLE_MASK: usize = 1 << 47;
    #[allow(dead_code)]
    const COLOR_MASK: usize =
        Self::MARKED0_MASK | Self::MARKED1_MASK | Self::REMAPPED_MASK | Self::FINALIZABLE_MASK;
    pub const ADDRESS_MASK: usize = (1 << 44) - 1;

    pub fn new(address: usize) -> Self {
        Self {
            raw: address & Self::ADDRESS_MASK,
        }
    }

    pub fn address(&self) -> usize {
        self.raw & Self::ADDRESS_MASK
    }

    pub fn is_marked0(&self) -> bool {
        (self.raw & Self::MARKED0_MASK) != 0
    }

    pub fn is_marked1(&self) -> bool {
        (self.raw & Self::MARKED1_MASK) != 0
    }

    pub fn is_marked(&self) -> bool {
        self.is_marked0() || self.is_marked1()
    }

    pub fn is_remapped(&self) -> bool {
        (self.raw & Self::REMAPPED_MASK) != 0
    }

    pub fn is_finalizable(&self) -> bool {
        (self.raw & Self::FINALIZABLE_MASK) != 0
    }

    pub fn set_marked0(&mut self) {
        self.raw |= Self::MARKED0_MASK;
    }

    pub fn set_marked1(&mut self) {
        self.raw |= Self::MARKED1_MASK;
    }

    pub fn set_remapped(&mut self) {
        self.raw |= Self::REMAPPED_MASK;
    }

    pub fn set_finalizable(&mut self) {
        self.raw |= Self::FINALIZABLE_MASK;
    }

    pub fn clear_color(&mut self) {
        self.raw &= Self::ADDRESS_MASK;
    }

    pub fn set_marked0_atomic(ptr: &AtomicUsize) {
        ptr.fetch_or(Self::MARKED0_MASK, Ordering::Acquire);
    }

    pub fn set_marked1_atomic(ptr: &AtomicUsize) {
        ptr.fetch_or(Self::MARKED1_MASK, Ordering::Acquire);
    }

    pub fn set_remapped_atomic(ptr: &AtomicUsize) {
        ptr.fetch_or(Self::REMAPPED_MASK, Ordering::Acquire);
    }

    pub fn set_finalizable_atomic(ptr: &AtomicUsize) {
        ptr.fetch_or(Self::FINALIZABLE_MASK, Ordering::Acquire);
    }

    pub fn clear_color_atomic(ptr: &AtomicUsize) {
        ptr.fetch_and(Self::ADDRESS_MASK, Ordering::Release);
    }

    pub fn flip_mark_bit_atomic(ptr: &AtomicUsize) {
        ptr.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            let marked0 = (current & Self::MARKED0_MASK) != 0;
            let marked1 = (current & Self::MARKED1_MASK) != 0;
            let mut new_value = current & !(Self::MARKED0_MASK | Self::MARKED1_MASK);
            if marked0 {
                new_value |= Self::MARKED1_MASK;
            } else if marked1 {
                new_value |= Self::MARKED0_MASK;
            } else {
                new_value |= Self::MARKED0_MASK;
            }
            Some(new_value)
        })
        .ok();
    }

    pub fn test_and_set_marked0(ptr: &AtomicUsize) -> bool {
        let old = ptr.fetch_or(Self::MARKED0_MASK, Ordering::AcqRel);
        (old & Self::MARKED0_MASK) != 0
    }

    pub fn test_and_set_marked1(ptr: &AtomicUsize) -> bool {
        let old = ptr.fetch_or(Self::MARKED1_MASK, Ordering::AcqRel);
        (old & Self::MARKED1_MASK) != 0
    }

    pub fn load_atomic(ptr: &AtomicUsize) -> usize {
        ptr.load(Ordering::Acquire)
    }

    pub fn store_atomic(ptr: &AtomicUsize, value: usize) {
        ptr.store(value, Ordering::Release);
    }

    pub fn cas_atomic(
        ptr: &AtomicUsize,
        expected: usize,
        new: usize,
    ) -> crate::error::Result<usize> {
        match ptr.compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire) {
            Ok(val) => Ok(val),
            Err(current) => Err(crate::error::PsvmError::AtomicUpdateFailed(current)),
        }
    }

    pub fn flip_mark_bit(&mut self) {
        let marked0 = self.is_marked0();
        let marked1 = self.is_marked1();
        self.raw &= !(Self::MARKED0_MASK | Self::MARKED1_MASK);
        if marked0 {
            self.raw |= Self::MARKED1_MASK;
        } else if marked1 {
            self.raw |= Self::MARKED0_MASK;
        } else {
            self.raw |= Self::MARKED0_MASK;
        }
    }

    pub fn raw(&self) -> usize {
        self.raw
    }

    pub fn from_raw(raw: usize) -> Self {
        Self { raw }
    }

    pub fn needs_processing(&self, gc_phase: GcPhase) -> bool {
        match gc_phase {
            GcPhase::Marking => !self.is_marked(),
            GcPhase::Relocating => !self.is_remapped(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    Idle,
    Marking,
    Relocating,
    Cleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    None,
    Marked0,
    Marked1,
    Remapped,
    Finalizable,
}

impl From<Color> for usize {
    fn from(color: Color) -> usize {
        match color {
            Color::None => 0,
            Color::Marked0 => ColoredPointer::MARKED0_MASK,
            Color::Marked1 => ColoredPointer::MARKED1_MASK,
            Color::Remapped => ColoredPointer::REMAPPED_MASK,
            Color::Finalizable => ColoredPointer::FINALIZABLE_MASK,
        }
    }
}
