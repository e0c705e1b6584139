//! The shared memory region and its transaction handle.
//!
//! A [`Region`] is the top-level object: it owns the segment table, the
//! global version clock, and the active-transaction counter. Callers clone
//! the handle freely (it is an `Arc` underneath), open a [`Transaction`]
//! per thread with [`Region::begin`], and drive it through reads, writes,
//! allocations and frees until [`Transaction::commit`] or
//! [`Transaction::end`].
//!
//! # Failure discipline
//!
//! Any fatal error — invalid argument or conflict — dooms the transaction:
//! it rejects every further operation and `end` reports abort. The only
//! survivable failure is `OutOfMemory` from [`Transaction::alloc`], which
//! leaves the transaction active. Aborts are never retried internally;
//! the caller owns the retry policy.

use crate::manager::{self, TxManager};
use crate::segment::{Segment, SegmentTable};
use crate::transaction::{TransactionContext, TransactionStatus, WordRef};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use txmem_core::types::is_valid_block_size;
use txmem_core::{Address, Error, Result, SegmentIndex, TxId};

/// Index of the segment created at region construction.
///
/// It is the one segment that can never be freed.
const FIRST_SEGMENT: SegmentIndex = 0;

/// Shared state behind every `Region` handle and every live transaction.
#[derive(Debug)]
struct RegionInner {
    align: usize,
    first_len: usize,
    table: SegmentTable,
    manager: TxManager,
    /// Transactions begun but not yet ended.
    active: AtomicU64,
}

impl Drop for RegionInner {
    fn drop(&mut self) {
        // Transactions hold an Arc of this state, so the counter is
        // necessarily zero by the time the last handle drops.
        debug_assert_eq!(self.active.load(Ordering::SeqCst), 0);
    }
}

/// Configuration for a new region.
///
/// Obtained from [`Region::builder`]; `max_segments` bounds how many
/// segments (including the first) may be live at once, surfacing as
/// `OutOfMemory` from `alloc` when exceeded.
#[derive(Debug, Clone)]
pub struct RegionBuilder {
    size: usize,
    align: usize,
    max_segments: u32,
}

impl RegionBuilder {
    /// Cap the number of simultaneously live segments.
    pub fn max_segments(mut self, max: u32) -> Self {
        self.max_segments = max;
        self
    }

    /// Create the region with one live first segment.
    ///
    /// # Errors
    /// - `InvalidArgument` if the alignment is not a power of two or the
    ///   size is not a strictly positive multiple of it.
    /// - `OutOfMemory` if the first segment cannot be allocated.
    pub fn build(self) -> Result<Region> {
        if self.align == 0 || !self.align.is_power_of_two() {
            return Err(Error::InvalidArgument(format!(
                "alignment {} is not a power of two",
                self.align
            )));
        }
        // Alignments below the pointer width are clamped up; the region
        // then works in pointer-sized words.
        let align = self.align.max(std::mem::size_of::<*const ()>());
        if !is_valid_block_size(self.size, align) {
            return Err(Error::InvalidArgument(format!(
                "region size {} is not a positive multiple of alignment {}",
                self.size, align
            )));
        }

        let table = SegmentTable::new(align, self.max_segments);
        table.create(self.size, 0)?;

        tracing::debug!(size = self.size, align, "region created");
        Ok(Region {
            inner: Arc::new(RegionInner {
                align,
                first_len: self.size,
                table,
                manager: TxManager::new(),
                active: AtomicU64::new(0),
            }),
        })
    }
}

/// A shared memory region.
///
/// Cheap to clone; all clones refer to the same region. The region is
/// destroyed when the last handle and the last outstanding transaction
/// drop, which makes "destroy only with no active transactions" hold by
/// construction.
#[derive(Debug, Clone)]
pub struct Region {
    inner: Arc<RegionInner>,
}

impl Region {
    /// Create a region with one first segment of `size` bytes.
    ///
    /// `size` must be a strictly positive multiple of `align`; `align`
    /// must be a power of two. Alignments below the pointer width are
    /// clamped up to it.
    pub fn new(size: usize, align: usize) -> Result<Region> {
        Region::builder(size, align).build()
    }

    /// Start configuring a region.
    pub fn builder(size: usize, align: usize) -> RegionBuilder {
        RegionBuilder {
            size,
            align,
            max_segments: u32::MAX,
        }
    }

    /// Start address of the first segment.
    pub fn start(&self) -> Address {
        Address::new(FIRST_SEGMENT, 0)
    }

    /// Byte length of the first segment.
    pub fn size(&self) -> usize {
        self.inner.first_len
    }

    /// Alignment (in bytes) of every access on this region.
    pub fn alignment(&self) -> usize {
        self.inner.align
    }

    /// Number of transactions begun but not yet ended.
    pub fn active_transactions(&self) -> u64 {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Begin a transaction.
    ///
    /// Takes a snapshot of the global clock; the transaction will only
    /// observe state committed before this point. Infallible: the region
    /// handle cannot outlive the region.
    pub fn begin(&self) -> Transaction {
        let txn_id = self.inner.manager.next_txn_id();
        let start_version = self.inner.manager.current_version();
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(txn_id, start_version, "transaction begun");
        Transaction {
            inner: Arc::clone(&self.inner),
            ctx: TransactionContext::new(txn_id, start_version),
            finished: false,
        }
    }
}

/// An open transaction against a [`Region`].
///
/// Ends exactly once, through [`commit`](Transaction::commit) or
/// [`end`](Transaction::end); dropping an un-ended transaction aborts it.
/// All bookkeeping is discarded either way.
#[derive(Debug)]
pub struct Transaction {
    inner: Arc<RegionInner>,
    ctx: TransactionContext,
    finished: bool,
}

impl Transaction {
    /// Unique id of this transaction.
    pub fn id(&self) -> TxId {
        self.ctx.txn_id
    }

    /// Clock snapshot taken at `begin`.
    pub fn start_version(&self) -> u64 {
        self.ctx.start_version
    }

    /// Current lifecycle status.
    pub fn status(&self) -> &TransactionStatus {
        &self.ctx.status
    }

    /// Whether a fatal error has already doomed this transaction.
    pub fn is_doomed(&self) -> bool {
        self.ctx.is_aborted()
    }

    /// Read `buf.len()` bytes of shared memory starting at `source`.
    ///
    /// The length must be a strictly positive multiple of the region's
    /// alignment and the whole range must lie within one live segment.
    /// Words this transaction already wrote are served from its own
    /// write-set.
    ///
    /// # Errors
    /// - `InvalidArgument` for misaligned or out-of-range accesses (dooms
    ///   the transaction).
    /// - `Conflict` if a concurrent commit touched the range (dooms the
    ///   transaction).
    /// - `TransactionInactive` if the transaction was already doomed.
    pub fn read(&mut self, source: Address, buf: &mut [u8]) -> Result<()> {
        self.ctx.ensure_active()?;
        let (segment, index, base_word) = match self.locate(source, buf.len()) {
            Ok(found) => found,
            Err(e) => {
                self.ctx.doom(e.to_string());
                return Err(e);
            }
        };

        let align = self.inner.align;
        for (i, chunk) in buf.chunks_exact_mut(align).enumerate() {
            let word = WordRef {
                segment: index,
                word: base_word + i as u32,
            };

            // Read-your-own-writes: pending bytes win.
            if let Some(bytes) = self.ctx.buffered(&word) {
                chunk.copy_from_slice(bytes);
                continue;
            }

            let lock = segment.lock_at(word.word);
            let before = lock.sample();
            if before.locked || before.version > self.ctx.start_version {
                let reason = format!(
                    "read of segment {} word {} observed a concurrent commit",
                    word.segment, word.word
                );
                self.ctx.doom(reason.clone());
                return Err(Error::Conflict(reason));
            }

            segment.read_word_into(word.word, chunk);

            // The copy is only good if nothing intervened.
            let after = lock.sample();
            if after.locked || after.version != before.version {
                let reason = format!(
                    "segment {} word {} changed during read",
                    word.segment, word.word
                );
                self.ctx.doom(reason.clone());
                return Err(Error::Conflict(reason));
            }

            self.ctx.record_read(word, before.version);
        }
        Ok(())
    }

    /// Write `bytes` to shared memory starting at `target`.
    ///
    /// Buffered in the transaction's write-set; shared memory is not
    /// touched until commit, so writes never conflict eagerly. Same
    /// size/alignment/bounds constraints as [`read`](Transaction::read).
    pub fn write(&mut self, bytes: &[u8], target: Address) -> Result<()> {
        self.ctx.ensure_active()?;
        let (_, index, base_word) = match self.locate(target, bytes.len()) {
            Ok(found) => found,
            Err(e) => {
                self.ctx.doom(e.to_string());
                return Err(e);
            }
        };

        let align = self.inner.align;
        for (i, chunk) in bytes.chunks_exact(align).enumerate() {
            let word = WordRef {
                segment: index,
                word: base_word + i as u32,
            };
            self.ctx.buffer_write(word, chunk);
        }
        Ok(())
    }

    /// Allocate a new segment of `size` bytes.
    ///
    /// The segment is visible only to this transaction until commit. On
    /// abort it is rolled back as if it never existed.
    ///
    /// # Errors
    /// - `OutOfMemory` if the allocator is exhausted — **recoverable**,
    ///   the transaction stays active.
    /// - `InvalidArgument` if `size` is not a strictly positive multiple
    ///   of the alignment (dooms the transaction).
    pub fn alloc(&mut self, size: usize) -> Result<Address> {
        self.ctx.ensure_active()?;
        match self.inner.table.create(size, self.ctx.txn_id) {
            Ok(segment) => {
                let index = segment.index();
                self.ctx.alloc_set.push(index);
                tracing::trace!(txn_id = self.ctx.txn_id, segment = index, size, "alloc");
                Ok(Address::new(index, 0))
            }
            Err(Error::OutOfMemory) => Err(Error::OutOfMemory),
            Err(e) => {
                self.ctx.doom(e.to_string());
                Err(e)
            }
        }
    }

    /// Free the segment whose base address is `target`.
    ///
    /// Recorded tentatively; the segment disappears region-wide only when
    /// this transaction commits. Freeing a segment allocated by this same
    /// transaction cancels the allocation immediately.
    ///
    /// # Errors
    /// `InvalidArgument` (dooming the transaction) if `target` is not the
    /// base address of a freeable live segment — in particular the first
    /// segment is never freeable.
    pub fn free(&mut self, target: Address) -> Result<()> {
        self.ctx.ensure_active()?;

        let index = match target.segment() {
            Some(index) if target.offset() == 0 => index,
            _ => return Err(self.doom_invalid(format!("{} is not a segment base", target))),
        };
        if index == FIRST_SEGMENT {
            return Err(self.doom_invalid("the first segment is not freeable".to_string()));
        }
        if self.ctx.freed(index) {
            return Err(self.doom_invalid(format!("segment {} already freed", index)));
        }

        if self.ctx.allocated(index) {
            // Allocated by us in this very transaction: nobody else has
            // ever seen it, cancel it on the spot.
            self.ctx.alloc_set.retain(|i| *i != index);
            self.ctx.write_set.retain(|w, _| w.segment != index);
            self.ctx.read_set.retain(|w, _| w.segment != index);
            self.inner.table.rollback_creation(index);
            return Ok(());
        }

        match self.inner.table.get(index) {
            Some(segment) if segment.is_visible_to(self.ctx.txn_id) => {
                self.ctx.free_set.push(index);
                tracing::trace!(txn_id = self.ctx.txn_id, segment = index, "tentative free");
                Ok(())
            }
            _ => Err(self.doom_invalid(format!("segment {} is not live", index))),
        }
    }

    /// Commit the transaction, consuming it.
    ///
    /// Read-only transactions validate their read-set without locking;
    /// writers run the full commit protocol. On `Err` the transaction
    /// aborted and none of its effects are visible.
    pub fn commit(mut self) -> Result<()> {
        self.finish().map(|_| ())
    }

    /// End the transaction, reporting `true` for commit and `false` for
    /// abort.
    pub fn end(mut self) -> bool {
        self.finish().is_ok()
    }

    fn finish(&mut self) -> Result<u64> {
        debug_assert!(!self.finished);
        self.finished = true;

        if self.ctx.is_aborted() {
            // Doomed earlier; roll back tentative allocations now.
            let reason = self.ctx.abort_reason().unwrap_or("aborted").to_string();
            manager::rollback(&self.inner.table, &mut self.ctx, reason.clone());
            return Err(Error::TransactionInactive(reason));
        }

        match manager::commit(&self.inner.manager, &self.inner.table, &mut self.ctx) {
            Ok(version) => Ok(version),
            Err(e) => {
                let reason = e.to_string();
                manager::rollback(&self.inner.table, &mut self.ctx, reason.clone());
                Err(Error::Conflict(reason))
            }
        }
    }

    fn doom_invalid(&mut self, reason: String) -> Error {
        self.ctx.doom(reason.clone());
        Error::InvalidArgument(reason)
    }

    /// Resolve an address range to a segment and base word, enforcing
    /// every access constraint.
    fn locate(&self, addr: Address, len: usize) -> Result<(Arc<Segment>, SegmentIndex, u32)> {
        let align = self.inner.align;
        if !is_valid_block_size(len, align) {
            return Err(Error::InvalidArgument(format!(
                "access size {} is not a positive multiple of alignment {}",
                len, align
            )));
        }
        let Some(index) = addr.segment() else {
            return Err(Error::InvalidArgument("null address".to_string()));
        };
        if !addr.is_aligned_to(align) {
            return Err(Error::InvalidArgument(format!(
                "address {} is not {}-byte aligned",
                addr, align
            )));
        }
        if self.ctx.freed(index) {
            return Err(Error::InvalidArgument(format!(
                "segment {} was freed by this transaction",
                index
            )));
        }
        let Some(segment) = self.inner.table.get(index) else {
            return Err(Error::InvalidArgument(format!(
                "address {} is not within a live segment",
                addr
            )));
        };
        if !segment.is_visible_to(self.ctx.txn_id) {
            return Err(Error::InvalidArgument(format!(
                "address {} is not within a live segment",
                addr
            )));
        }
        let end = addr.offset() as usize + len;
        if end > segment.len() {
            return Err(Error::InvalidArgument(format!(
                "range {}+{} exceeds segment length {}",
                addr,
                len,
                segment.len()
            )));
        }
        let base_word = (addr.offset() / align as u64) as u32;
        Ok((segment, index, base_word))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            manager::rollback(&self.inner.table, &mut self.ctx, "transaction dropped");
        }
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}
