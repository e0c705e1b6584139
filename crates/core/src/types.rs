//! Identifier and address types.
//!
//! Shared memory is exposed to callers as opaque virtual addresses rather
//! than raw pointers. An [`Address`] encodes a segment index and a byte
//! offset; the runtime resolves it through the region's segment table, which
//! makes range validation exact and keeps pointer arithmetic out of the
//! public surface.

/// Unique transaction identifier, allocated monotonically per region.
///
/// Id 0 is never issued and can serve as a sentinel.
pub type TxId = u64;

/// Index of a segment within a region's segment table.
///
/// Indices are allocated monotonically and never reused, so an address
/// range is never issued twice during a region's lifetime.
pub type SegmentIndex = u32;

/// Opaque virtual address into a region.
///
/// Layout: `(segment_index + 1) << 32 | byte_offset`. The `+ 1` keeps the
/// all-zero value invalid, so `Address(0)` is a distinguished null. The
/// first segment of every region therefore starts at `1 << 32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub u64);

/// Number of bits reserved for the byte offset within a segment.
const OFFSET_BITS: u32 = 32;

/// Mask selecting the byte offset within a segment.
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

impl Address {
    /// The invalid (null) address.
    pub const NULL: Address = Address(0);

    /// Build an address from a segment index and a byte offset.
    pub fn new(segment: SegmentIndex, offset: u64) -> Self {
        debug_assert!(offset <= OFFSET_MASK);
        Address(((segment as u64 + 1) << OFFSET_BITS) | offset)
    }

    /// The segment this address points into, or `None` for the null
    /// address.
    pub fn segment(self) -> Option<SegmentIndex> {
        let tag = self.0 >> OFFSET_BITS;
        if tag == 0 {
            None
        } else {
            Some((tag - 1) as SegmentIndex)
        }
    }

    /// Byte offset within the segment.
    pub fn offset(self) -> u64 {
        self.0 & OFFSET_MASK
    }

    /// Address `bytes` past this one, staying within the same segment.
    ///
    /// Returns `None` if the result would spill into the next segment's
    /// index space.
    pub fn checked_add(self, bytes: u64) -> Option<Address> {
        let offset = self.offset().checked_add(bytes)?;
        if offset > OFFSET_MASK {
            return None;
        }
        Some(Address(self.0 - self.offset() + offset))
    }

    /// Whether the offset is a multiple of `align`.
    ///
    /// `align` must be a power of two.
    pub fn is_aligned_to(self, align: usize) -> bool {
        debug_assert!(align.is_power_of_two());
        self.offset() & (align as u64 - 1) == 0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.segment() {
            Some(segment) => write!(f, "{}:{:#x}", segment, self.offset()),
            None => write!(f, "<null>"),
        }
    }
}

/// Whether `size` is a valid block length for a region aligned to `align`:
/// strictly positive and a multiple of the alignment.
pub fn is_valid_block_size(size: usize, align: usize) -> bool {
    size > 0 && size % align == 0
}
