//! Segments and the region-wide segment table.
//!
//! A [`Segment`] is one contiguous block of shared storage: zero-initialized
//! bytes plus one [`VersionedLock`] per alignment word. The [`SegmentTable`]
//! maps segment indices to live segments; it is the only path from an
//! [`Address`] to storage, so removing a segment from the table is what
//! makes its address range invalid.
//!
//! # Design
//!
//! - `DashMap` keyed by segment index: lock-free lookups on the hot
//!   read/write path, sharded writes on the rare alloc/free path.
//! - Indices are allocated monotonically and never reused, so no address
//!   range is ever issued twice during a region's lifetime.
//! - Storage is held behind `Arc`: a retired segment's memory is reclaimed
//!   only when the last in-flight transaction drops its reference, never
//!   while anything can still read it.

use crate::vlock::VersionedLock;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use txmem_core::types::is_valid_block_size;
use txmem_core::{Error, Result, SegmentIndex, TxId};

/// Segment visible to every transaction.
const STATE_LIVE: u8 = 0;
/// Segment tentatively created by a still-running transaction.
const STATE_TENTATIVE: u8 = 1;
/// Segment freed by a committed transaction; kept only for stragglers.
const STATE_DEAD: u8 = 2;

/// One contiguous, aligned block of shared memory.
///
/// Bytes are stored as relaxed atomics; consistency comes from the per-word
/// locks, not from the byte accesses themselves. A reader samples the word's
/// lock before and after copying and discards the copy if the samples
/// disagree, so a torn read is never observed by the caller.
pub struct Segment {
    index: SegmentIndex,
    len: usize,
    align: usize,
    data: Box<[AtomicU8]>,
    locks: Box<[VersionedLock]>,
    state: AtomicU8,
    /// Creating transaction while tentative; irrelevant once live.
    owner: TxId,
}

impl Segment {
    fn new(index: SegmentIndex, len: usize, align: usize, owner: TxId) -> Result<Self> {
        let words = len / align;

        // try_reserve keeps allocator exhaustion a reportable error instead
        // of an allocator abort.
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
        data.resize_with(len, || AtomicU8::new(0));

        let mut locks = Vec::new();
        locks
            .try_reserve_exact(words)
            .map_err(|_| Error::OutOfMemory)?;
        locks.resize_with(words, VersionedLock::new);

        let state = if owner == 0 { STATE_LIVE } else { STATE_TENTATIVE };
        Ok(Segment {
            index,
            len,
            align,
            data: data.into_boxed_slice(),
            locks: locks.into_boxed_slice(),
            state: AtomicU8::new(state),
            owner,
        })
    }

    /// Index of this segment in the table.
    pub fn index(&self) -> SegmentIndex {
        self.index
    }

    /// Byte length of the segment.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the segment holds no bytes (never true in practice; sizes
    /// are validated as strictly positive).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of alignment words.
    pub fn word_count(&self) -> u32 {
        (self.len / self.align) as u32
    }

    /// Lock guarding the given word.
    pub fn lock_at(&self, word: u32) -> &VersionedLock {
        &self.locks[word as usize]
    }

    /// Whether `tx` may address this segment.
    ///
    /// Live segments are visible to everyone; a tentative segment is
    /// visible only to the transaction that created it.
    pub fn is_visible_to(&self, tx: TxId) -> bool {
        match self.state.load(Ordering::Acquire) {
            STATE_LIVE => true,
            STATE_TENTATIVE => self.owner == tx,
            _ => false,
        }
    }

    /// Publish a tentative segment region-wide (commit of its creating
    /// transaction).
    pub fn make_live(&self) {
        self.state.store(STATE_LIVE, Ordering::Release);
    }

    fn mark_dead(&self) {
        self.state.store(STATE_DEAD, Ordering::Release);
    }

    /// Copy one word out of shared storage into `dst`.
    ///
    /// `dst` must be exactly one alignment word long. Callers validate the
    /// copy against the word's lock samples.
    pub fn read_word_into(&self, word: u32, dst: &mut [u8]) {
        debug_assert_eq!(dst.len(), self.align);
        let start = word as usize * self.align;
        for (i, byte) in dst.iter_mut().enumerate() {
            *byte = self.data[start + i].load(Ordering::Relaxed);
        }
    }

    /// Store one word into shared storage.
    ///
    /// Only ever called while the word's lock is held by the committing
    /// transaction.
    pub fn write_word(&self, word: u32, src: &[u8]) {
        debug_assert_eq!(src.len(), self.align);
        let start = word as usize * self.align;
        for (i, byte) in src.iter().enumerate() {
            self.data[start + i].store(*byte, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("index", &self.index)
            .field("len", &self.len)
            .field("align", &self.align)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}

/// The set of segments backing one region.
///
/// Owned exclusively by the region, never a process-wide singleton, so
/// multiple regions coexist independently.
#[derive(Debug)]
pub struct SegmentTable {
    align: usize,
    segments: DashMap<SegmentIndex, Arc<Segment>>,
    next_index: AtomicU32,
    /// Upper bound on simultaneously live segments; `u32::MAX` when
    /// unlimited. Exceeding it surfaces as `OutOfMemory`.
    max_segments: u32,
}

impl SegmentTable {
    /// New table for a region with the given word alignment.
    pub fn new(align: usize, max_segments: u32) -> Self {
        SegmentTable {
            align,
            segments: DashMap::new(),
            next_index: AtomicU32::new(0),
            max_segments,
        }
    }

    /// Word alignment shared by every segment in the table.
    pub fn align(&self) -> usize {
        self.align
    }

    /// Number of segments currently in the table (live or tentative).
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the table holds no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Allocate and register a new zero-initialized segment.
    ///
    /// `owner` is the creating transaction for a tentative segment, or 0
    /// for the region's first segment, which is born live.
    ///
    /// # Errors
    /// - `InvalidArgument` if `size` is not a strictly positive multiple of
    ///   the alignment, or does not fit the address encoding.
    /// - `OutOfMemory` if the allocator or the segment budget is exhausted.
    pub fn create(&self, size: usize, owner: TxId) -> Result<Arc<Segment>> {
        if !is_valid_block_size(size, self.align) {
            return Err(Error::InvalidArgument(format!(
                "segment size {} is not a positive multiple of alignment {}",
                size, self.align
            )));
        }
        if size as u64 > u32::MAX as u64 {
            return Err(Error::OutOfMemory);
        }
        if self.segments.len() >= self.max_segments as usize {
            return Err(Error::OutOfMemory);
        }

        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        if index == u32::MAX {
            // Index space exhausted; leave the counter saturated.
            return Err(Error::OutOfMemory);
        }

        let segment = Arc::new(Segment::new(index, size, self.align, owner)?);
        self.segments.insert(index, Arc::clone(&segment));
        Ok(segment)
    }

    /// Look up a segment by index.
    pub fn get(&self, index: SegmentIndex) -> Option<Arc<Segment>> {
        self.segments.get(&index).map(|s| Arc::clone(s.value()))
    }

    /// Reverse a tentative creation after an abort.
    ///
    /// The segment was never visible outside its creating transaction, so
    /// it is unlinked immediately.
    pub fn rollback_creation(&self, index: SegmentIndex) {
        self.segments.remove(&index);
    }

    /// Retire a segment on commit of a free.
    ///
    /// The segment is marked dead and unlinked, invalidating its address
    /// range; its storage is reclaimed when the last in-flight reference
    /// drops.
    pub fn retire(&self, index: SegmentIndex) {
        if let Some((_, segment)) = self.segments.remove(&index) {
            segment.mark_dead();
        }
    }
}
