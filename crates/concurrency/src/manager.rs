//! Commit protocol and the region-global clocks.
//!
//! Provides atomic commit by orchestrating:
//! 1. Commit-time locking of the write footprint, in a fixed global order
//! 2. Read-set validation against current word versions
//! 3. Publication (writes, allocation finalization, segment retirement)
//!
//! ## Commit sequence (writers)
//!
//! ```text
//! 1. Resolve every touched segment through the table
//! 2. Build the lock plan: written words + every word of freed segments,
//!    sorted ascending by (segment, word), deduplicated
//! 3. try-lock each word with a bounded budget; any failure releases all
//!    locks already taken and aborts
//! 4. Re-check every footprint segment is still in the table; a free that
//!    committed concurrently aborts this transaction
//! 5. Validate the read-set; failure releases everything and aborts
//! 6. Bump the global clock once for the whole transaction
//! 7. Publish buffered writes, make tentative segments live, retire freed
//!    segments
//! 8. Release every lock, stamping the commit version
//! ```
//!
//! Step 3's fixed ordering is what makes concurrent commits deadlock-free:
//! two committers can contend but never hold-and-wait in a cycle, and a
//! loser releases everything before reporting abort. Read-only
//! transactions skip locking entirely: validation alone proves their
//! snapshot was never overwritten.

use crate::segment::{Segment, SegmentTable};
use crate::transaction::{TransactionContext, WordRef};
use crate::validation::{validate_read_set, ValidationResult};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use txmem_core::SegmentIndex;

/// Retry budget for each commit-time lock acquisition.
///
/// Small on purpose: the holder is itself committing and will release
/// promptly, so either a few backoff steps suffice or the word is truly
/// contended and aborting is cheaper than waiting.
const COMMIT_LOCK_BUDGET: u32 = 8;

/// Why a commit was refused.
#[derive(Debug, Error)]
pub enum CommitError {
    /// The read-set no longer matches current word versions.
    #[error("read validation failed with {} conflict(s)", .0.conflict_count())]
    ValidationFailed(ValidationResult),

    /// A word in the write footprint is locked by another committer.
    #[error("write lock busy at segment {} word {}", .0.segment, .0.word)]
    WordLockBusy(WordRef),

    /// A segment touched by this transaction was freed by a committed one.
    #[error("segment {0} was retired concurrently")]
    SegmentRetired(SegmentIndex),
}

/// Region-global counters: the version clock and the transaction id
/// source.
///
/// Owned by the region, never shared across regions.
#[derive(Debug)]
pub(crate) struct TxManager {
    /// Global version clock; bumped once per committed writer.
    clock: AtomicU64,
    /// Next transaction id; ids start at 1 so 0 stays a sentinel.
    next_txn_id: AtomicU64,
}

impl TxManager {
    /// Fresh clocks for a new region.
    pub(crate) fn new() -> Self {
        TxManager {
            clock: AtomicU64::new(0),
            next_txn_id: AtomicU64::new(1),
        }
    }

    /// Current clock value; the snapshot version for a beginning
    /// transaction.
    pub(crate) fn current_version(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    /// Allocate the commit version: bump the clock once for the whole
    /// transaction.
    pub(crate) fn allocate_version(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Allocate a fresh transaction id.
    pub(crate) fn next_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// Commit-time locks with scoped release.
///
/// Dropping the set releases every held lock without a version change
/// (the abort path); `publish` releases them stamping the commit version.
/// Either way no exit path can leak a locked word.
struct CommitLocks {
    held: Vec<(Arc<Segment>, u32)>,
}

impl CommitLocks {
    fn with_capacity(n: usize) -> Self {
        CommitLocks {
            held: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, segment: Arc<Segment>, word: u32) {
        self.held.push((segment, word));
    }

    /// Release everything, stamping `version` on each word.
    fn publish(mut self, version: u64) {
        for (segment, word) in self.held.drain(..) {
            segment.lock_at(word).unlock_with_version(version);
        }
    }
}

impl Drop for CommitLocks {
    fn drop(&mut self) {
        for (segment, word) in &self.held {
            segment.lock_at(*word).unlock();
        }
    }
}

/// Attempt to commit `tx`, returning the commit version on success.
///
/// On failure the transaction has touched nothing: all locks are released
/// and no write was published. The caller is responsible for the abort
/// bookkeeping (see [`rollback`]).
pub(crate) fn commit(
    manager: &TxManager,
    table: &SegmentTable,
    tx: &mut TransactionContext,
) -> Result<u64, CommitError> {
    debug_assert!(tx.is_active());

    // Pure readers: validation alone decides, no locking needed.
    if tx.is_read_only() {
        let result = validate_read_set(tx, table);
        if !result.is_valid() {
            return Err(CommitError::ValidationFailed(result));
        }
        tx.mark_committed();
        return Ok(tx.start_version);
    }

    // Resolve every segment in the commit footprint. A miss means a
    // concurrent free already committed.
    let mut segments: FxHashMap<SegmentIndex, Arc<Segment>> = FxHashMap::default();
    for index in tx
        .write_set
        .keys()
        .map(|w| w.segment)
        .chain(tx.free_set.iter().copied())
    {
        if !segments.contains_key(&index) {
            let segment = table
                .get(index)
                .ok_or(CommitError::SegmentRetired(index))?;
            segments.insert(index, segment);
        }
    }

    // Lock plan: written words plus every word of every freed segment,
    // in ascending global order.
    let mut plan: Vec<WordRef> = tx.write_set.keys().copied().collect();
    for &index in &tx.free_set {
        for word in 0..segments[&index].word_count() {
            plan.push(WordRef {
                segment: index,
                word,
            });
        }
    }
    plan.sort_unstable();
    plan.dedup();

    let mut locks = CommitLocks::with_capacity(plan.len());
    for &word in &plan {
        let segment = &segments[&word.segment];
        if !segment.lock_at(word.word).try_lock_with_budget(COMMIT_LOCK_BUDGET) {
            tracing::trace!(
                txn_id = tx.txn_id,
                segment = word.segment,
                word = word.word,
                "commit lock busy, aborting"
            );
            return Err(CommitError::WordLockBusy(word));
        }
        locks.push(Arc::clone(segment), word.word);
    }

    // The footprint was resolved before any lock was taken, so a commit
    // racing ahead of this one may have retired a footprint segment in the
    // window. Indices are never reused: a table hit here proves the
    // resolved segment is still the live one.
    for &index in segments.keys() {
        if table.get(index).is_none() {
            tracing::trace!(
                txn_id = tx.txn_id,
                segment = index,
                "segment retired during commit, aborting"
            );
            return Err(CommitError::SegmentRetired(index));
        }
    }

    let result = validate_read_set(tx, table);
    if !result.is_valid() {
        tracing::trace!(
            txn_id = tx.txn_id,
            conflicts = result.conflict_count(),
            "read validation failed, aborting"
        );
        return Err(CommitError::ValidationFailed(result));
    }

    let commit_version = manager.allocate_version();

    // Publish buffered writes through the held locks.
    for (word, bytes) in &tx.write_set {
        segments[&word.segment].write_word(word.word, bytes);
    }

    // Tentative segments become visible region-wide.
    for &index in &tx.alloc_set {
        if let Some(segment) = table.get(index) {
            segment.make_live();
        }
    }

    // Freed segments leave the table; storage follows the last reference.
    for &index in &tx.free_set {
        table.retire(index);
    }

    locks.publish(commit_version);
    tx.mark_committed();

    tracing::debug!(
        txn_id = tx.txn_id,
        commit_version,
        writes = tx.write_count(),
        "transaction committed"
    );
    Ok(commit_version)
}

/// Abort bookkeeping: roll back tentative allocations, discard tentative
/// frees, and mark the transaction aborted.
///
/// Safe to call on an already-doomed transaction; the first reason wins.
pub(crate) fn rollback(table: &SegmentTable, tx: &mut TransactionContext, reason: impl Into<String>) {
    for &index in &tx.alloc_set {
        table.rollback_creation(index);
    }
    tx.alloc_set.clear();
    tx.free_set.clear();
    tx.doom(reason);
    tracing::debug!(
        txn_id = tx.txn_id,
        reason = tx.abort_reason().unwrap_or(""),
        "transaction aborted"
    );
}
