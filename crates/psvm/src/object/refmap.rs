//! Reference Map - Tells GC where pointer fields are located within objects
//!
//! Each bit in the bitmap represents 8 bytes of object data.
//! - Bit = 1: Contains a pointer reference
//! - Bit = 0: Non-pointer data (primitive, padding, etc.)
//!
//! # Layout
//!
//! ```text
//! Object Data Layout:
//! ┌─────────┬─────────┬─────────┬─────────┐
//! │ 0-7     │ 8-15    │ 16-23   │ 24-31   │
//! │ (bit 0) │ (bit 1) │ (bit 2) │ (bit 3) │
//! ├─────────┼─────────┼─────────┼─────────┤
//! │ ptr     │ i64     │ ptr     │ padding │
//! │ bit=1   │ bit=0   │ bit=1   │ bit=0   │
//! └─────────┴─────────┴─────────┴─────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use psvm::object::ReferenceMap;
//!
//! // Create a reference map with pointers at offsets 0 and 16
//! let map = ReferenceMap::new(&[0, 16]);
//!
//! assert!(map.is_reference(0));    // offset 0 has pointer
//! assert!(!map.is_reference(8));   // offset 8 is not a pointer
//! assert!(map.is_reference(16));   // offset 16 has pointer
//! assert_eq!(map.count(), 2);      // 2 references total
//! ```

/// Size of each slot tracked by the reference map (in bytes)
pub const SLOT_SIZE: usize = 8;

/// Maximum number of reference fields tracked per object
/// Limited by the 64-bit bitmap
pub const MAX_REFS: usize = 64;

/// Maximum object data size that can be tracked (64 slots * 8 bytes)
pub const MAX_TRACKED_SIZE: usize = MAX_REFS * SLOT_SIZE;

/// Reference map for an object type
///
/// Uses a bitmap where each bit represents 8 bytes of object data.
/// This allows efficient scanning of objects during GC marking phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReferenceMap {
    /// Bitmap: each bit represents 8 bytes
    /// - Bit 0 = offset 0-7
    /// - Bit 1 = offset 8-15
    /// - Bit 2 = offset 16-23
    /// - etc.
    bitmap: u64,
    /// Number of reference fields in the object
    count: u8,
}

impl ReferenceMap {
    /// Create an empty reference map with no pointers
    ///
    /// # Example
    ///
    /// ```rust
    /// use psvm::object::ReferenceMap;
    ///
    /// let map = ReferenceMap::empty();
    /// assert_eq!(map.count(), 0);
    /// assert!(!map.is_reference(0));
    /// ```
    #[inline]
    pub const fn empty() -> Self {
        Self {
            bitmap: 0,
            count: 0,
        }
    }

    /// Create a reference map with specific pointer offsets
    ///
    /// # Arguments
    ///
    /// * `offsets` - Array of byte offsets where pointers are located.
    ///   Each offset must be aligned to SLOT_SIZE (8 bytes).
    ///
    /// # Panics
    ///
    /// Panics if:
    /// - More than MAX_REFS offsets are provided
    /// - Any offset is not aligned to SLOT_SIZE
    /// - Any offset would exceed the bitmap capacity
    ///
    /// # Example
    ///
    /// ```rust
    /// use psvm::object::ReferenceMap;
    ///
    /// // Object with pointers at offset 0 and 16
    /// let map = ReferenceMap::new(&[0, 16]);
    /// assert_eq!(map.count(), 2);
    /// ```
    #[inline]
    pub fn new(offsets: &[usize]) -> Self {
        let mut bitmap: u64 = 0;
        let mut count: u8 = 0;

        for &offset in offsets {
            // Validate alignment
            debug_assert!(
                offset % SLOT_SIZE == 0,
                "Offset {} must be aligned to {} bytes",
                offset,
                SLOT_SIZE
            );

            // Calculate bit position
            let bit = offset / SLOT_SIZE;

            // Validate bitmap capacity
            debug_assert!(
                bit < MAX_REFS,
                "Offset {} exceeds maximum tracked size",
                offset
            );

            // Set the bit
            bitmap |= 1u64 << bit;
            count = count.saturating_add(1);
        }

        Self { bitmap, count }
    }

    /// Create a reference map from a raw bitmap
    ///
    /// # Safety
    ///
    /// The caller must ensure that `count` matches the number of set bits
    /// in `bitmap`. This is intended for serialization/deserialization.
    ///
    /// # Example
    ///
    /// ```rust
    /// use psvm::object::ReferenceMap;
    ///
    /// // Bitmap with bits 0 and 2 set (pointers at offset 0 and 16)
    /// let map = unsafe { ReferenceMap::from_raw(0b101, 2) };
    /// assert_eq!(map.count(), 2);
    /// ```
    #[inline]
    pub const unsafe fn from_raw(bitmap: u64, count: u8) -> Self {
        Self { bitmap, count }
    }

    /// Check if a given offset contains a pointer reference
    ///
    /// # Arguments
    ///
    /// * `offset` - Byte offset within the object data
    ///
    /// # Returns
    ///
    /// `true` if the offset contains a pointer, `false` otherwise.
    /// Returns `false` for unaligned offsets (not multiples of SLOT_SIZE).
    ///
    /// # Example
    ///
    /// ```rust
    /// use psvm::object::ReferenceMap;
    ///
    /// let map = ReferenceMap::new(&[0, 16]);
    /// assert!(map.is_reference(0));
    /// assert!(!map.is_reference(8));
    /// assert!(map.is_reference(16));
    /// assert!(!map.is_reference(4)); // Unaligned offset
    /// ```
    #[inline]
    pub fn is_reference(&self, offset: usize) -> bool {
        // Only check aligned offsets
        if !offset.is_multiple_of(SLOT_SIZE) {
            return false;
        }

        // Check if offset is within tracked range
        let bit = offset / SLOT_SIZE;
        if bit >= MAX_REFS {
            return false;
        }

        (self.bitmap & (1u64 << bit)) != 0
    }

    /// Get the number of reference fields in the object
    ///
    /// # Example
    ///
    /// ```rust
    /// use psvm::object::ReferenceMap;
    ///
    /// let map = ReferenceMap::new(&[0, 8, 16]);
    /// assert_eq!(map.count(), 3);
    /// ```
    #[inline]
    pub const fn count(&self) -> u8 {
        self.count
    }

    /// Get the raw bitmap representation
    ///
    /// Useful for serialization or low-level operations.
    ///
    /// # Example
    ///
    /// ```rust
    /// use psvm::object::ReferenceMap;
    ///
    /// let map = ReferenceMap::new(&[0, 16]);
    /// assert_eq!(map.bitmap(), 0b101);
    /// ```
    #[inline]
    pub const fn bitmap(&self) -> u64 {
        self.bitmap
    }

    /// Check if the reference map is empty (no pointers)
    ///
    /// # Example
    ///
    /// ```rust
    /// use psvm::object::ReferenceMap;
    ///
    /// let empty = ReferenceMap::empty();
    /// assert!(empty.is_empty());
    ///
    /// let with_refs = ReferenceMap::new(&[0]);
    /// assert!(!with_refs.is_empty());
    /// ```
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.bitmap == 0
    }

    /// Iterate over all reference offsets
    ///
    /// # Example
    ///
    /// ```rust
    /// use psvm::object::ReferenceMap;
    ///
    /// let map = ReferenceMap::new(&[0, 16, 32]);
    /// let offsets: Vec<usize> = map.iter().collect();
    /// assert_eq!(offsets, vec![0, 16, 32]);
    /// ```
    #[inline]
    pub const fn iter(&self) -> ReferenceMapIter {
        ReferenceMapIter {
            bitmap: self.bitmap,
            current_bit: 0,
        }
    }

    /// Check if a specific bit is set in the bitmap
    ///
    /// # Arguments
    ///
    /// * `bit` - Bit position to check (0-63)
    #[inline]
    #[allow(dead_code)]
    const fn has_bit(&self, bit: usize) -> bool {
        if bit >= MAX_REFS {
            return false;
        }
        (self.bitmap & (1u64 << bit)) != 0
    }
}

/// Iterator over reference offsets in a ReferenceMap
///
/// Yields byte offsets where pointers are located.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceMapIter {
    /// Remaining bitmap to iterate
    bitmap: u64,
    /// Current bit position being examined
    current_bit: usize,
}

impl Iterator for ReferenceMapIter {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        // Find the next set bit
        while self.current_bit < MAX_REFS {
            let bit = self.current_bit;
            self.current_bit += 1;

            if (self.bitmap & (1u64 << bit)) != 0 {
                // Convert bit position to byte offset
                return Some(bit * SLOT_SIZE);
            }
        }

        None
    }

    /// Provide a size hint for the iterator
    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        // Count remaining set bits from current_bit onwards
        let remaining_bits = self.bitmap >> self.current_bit;
        let remaining = remaining_bits.count_ones() as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ReferenceMapIter {}

impl std::iter::FusedIterator for ReferenceMapIter {}

/// Builder for creating ReferenceMap with a fluent API
///
/// # Example
///
/// ```rust
/// use psvm::object::refmap::ReferenceMapBuilder;
///
/// let map = ReferenceMapBuilder::new()
///     .with_reference(0)
///     .with_reference(16)
///     .with_reference(32)
///     .build();
///
/// assert_eq!(map.count(), 3);
/// ```
#[derive(Debug, Default)]
pub struct ReferenceMapBuilder {
    bitmap: u64,
    count: u8,
}

impl ReferenceMapBuilder {
    /// Create a new empty builder
    #[inline]
    pub const fn new() -> Self {
        Self {
            bitmap: 0,
            count: 0,
        }
    }

    /// Add a reference at the given offset
    ///
    /// # Arguments
    ///
    /// * `offset` - Byte offset where the pointer is located
    ///
    /// # Panics
    ///
    /// Panics if offset is not aligned to SLOT_SIZE or exceeds capacity.
    #[inline]
    pub fn with_reference(mut self, offset: usize) -> Self {
        debug_assert!(
            offset.is_multiple_of(SLOT_SIZE),
            "Offset {} must be aligned to {} bytes",
            offset,
            SLOT_SIZE
        );

        let bit = offset / SLOT_SIZE;
        debug_assert!(bit < MAX_REFS, "Offset {} exceeds capacity", offset);

        self.bitmap |= 1u64 << bit;
        self.count = self.count.saturating_add(1);
        self
    }

    /// Build the ReferenceMap
    #[inline]
    pub const fn build(self) -> ReferenceMap {
        ReferenceMap {
            bitmap: self.bitmap,
            count: self.count,
        }
    }
}
