//! Object Module - GC-managed object model
//!
//! This module defines the structure of objects managed by PSVM.

pub mod header;
pub mod pool;
pub mod refmap;
pub mod slot;
pub mod format;
pub mod weak;

pub use header::{ObjectHeader, HEADER_SIZE, OBJECT_ALIGNMENT};
pub use header::{get_header, get_data_start, get_object_addr};

pub use pool::{Pool, PoolAddr, PoolClass};
pub use refmap::ReferenceMap;
pub use slot::{Slot, SlotTag, SlotValue, Access, epoch_less_than};
pub use format::{Format, FormatVariant};
