//! Transaction bookkeeping.
//!
//! A [`TransactionContext`] tracks everything a transaction has done so far:
//! the words it read (with the versions observed), the words it wrote (with
//! the pending bytes), and the segments it tentatively allocated or freed.
//! Nothing here touches shared memory; the commit protocol in `manager`
//! consumes this bookkeeping to validate and publish.
//!
//! # Read-Your-Own-Writes
//!
//! Reads consult the write-set before shared memory, so a transaction
//! always sees its own pending writes. Such self-reads do not enter the
//! read-set: there is nothing to validate, the bytes never left this
//! transaction.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use txmem_core::{Error, Result, SegmentIndex, TxId};

/// One alignment word of one segment: the unit of conflict detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WordRef {
    /// Segment the word belongs to.
    pub segment: SegmentIndex,
    /// Word index within the segment (offset / alignment).
    pub word: u32,
}

/// Status of a transaction in its lifecycle.
///
/// State transitions:
/// - `Active` → `Committed` (validation passed, effects published)
/// - `Active` → `Aborted` (conflict, caller error, or explicit abort)
///
/// Both terminal states are reached through `end`; neither allows further
/// operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction is executing; reads and writes are accepted.
    Active,
    /// Transaction committed; every effect is visible region-wide.
    Committed,
    /// Transaction aborted; no effect is visible anywhere.
    Aborted {
        /// Human-readable reason for the abort.
        reason: String,
    },
}

/// Bookkeeping for one transaction.
///
/// Created at `begin`, mutated by every operation issued under the
/// transaction, discarded unconditionally at `end`.
#[derive(Debug)]
pub struct TransactionContext {
    /// Unique transaction id (never 0).
    pub txn_id: TxId,

    /// Global clock value sampled at `begin`.
    ///
    /// A word whose version exceeds this was committed after this
    /// transaction started; observing one would breach the snapshot, so
    /// the read aborts instead.
    pub start_version: u64,

    /// Words read from shared memory, with the version observed.
    pub(crate) read_set: FxHashMap<WordRef, u64>,

    /// Words written, with the pending bytes (exactly one word each).
    pub(crate) write_set: FxHashMap<WordRef, Box<[u8]>>,

    /// Segments tentatively created by this transaction.
    pub(crate) alloc_set: SmallVec<[SegmentIndex; 4]>,

    /// Segments tentatively freed by this transaction.
    pub(crate) free_set: SmallVec<[SegmentIndex; 4]>,

    /// Current lifecycle state.
    pub(crate) status: TransactionStatus,
}

impl TransactionContext {
    /// New active transaction bookkeeping.
    pub fn new(txn_id: TxId, start_version: u64) -> Self {
        TransactionContext {
            txn_id,
            start_version,
            read_set: FxHashMap::default(),
            write_set: FxHashMap::default(),
            alloc_set: SmallVec::new(),
            free_set: SmallVec::new(),
            status: TransactionStatus::Active,
        }
    }

    /// Whether the transaction still accepts operations.
    pub fn is_active(&self) -> bool {
        matches!(self.status, TransactionStatus::Active)
    }

    /// Whether the transaction committed.
    pub fn is_committed(&self) -> bool {
        matches!(self.status, TransactionStatus::Committed)
    }

    /// Whether the transaction aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self.status, TransactionStatus::Aborted { .. })
    }

    /// Abort reason, if aborted.
    pub fn abort_reason(&self) -> Option<&str> {
        match &self.status {
            TransactionStatus::Aborted { reason } => Some(reason),
            _ => None,
        }
    }

    /// Error unless the transaction is still active.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::TransactionInactive(format!(
                "transaction {} is {:?}",
                self.txn_id, self.status
            )))
        }
    }

    /// Mark the transaction aborted and drop its pending effects.
    ///
    /// The read-set is kept for diagnostics; write buffers and tentative
    /// lists are cleared since nothing will ever be published. Idempotent
    /// on already-aborted transactions; never demotes a commit.
    pub(crate) fn doom(&mut self, reason: impl Into<String>) {
        debug_assert!(!self.is_committed(), "doom after commit");
        if self.is_active() {
            self.status = TransactionStatus::Aborted {
                reason: reason.into(),
            };
            self.write_set.clear();
        }
    }

    /// Mark the transaction committed.
    pub(crate) fn mark_committed(&mut self) {
        debug_assert!(self.is_active());
        self.status = TransactionStatus::Committed;
    }

    /// Pending bytes for a word this transaction already wrote, if any.
    pub(crate) fn buffered(&self, word: &WordRef) -> Option<&[u8]> {
        self.write_set.get(word).map(|b| &**b)
    }

    /// Buffer one word of pending bytes (latest write wins).
    pub(crate) fn buffer_write(&mut self, word: WordRef, bytes: &[u8]) {
        self.write_set.insert(word, bytes.into());
    }

    /// Record a validated read.
    ///
    /// The first observed version is kept; any later change to the word is
    /// caught by the snapshot check at read time or by validation at
    /// commit.
    pub(crate) fn record_read(&mut self, word: WordRef, version: u64) {
        self.read_set.entry(word).or_insert(version);
    }

    /// Whether this transaction tentatively allocated `segment`.
    pub(crate) fn allocated(&self, segment: SegmentIndex) -> bool {
        self.alloc_set.contains(&segment)
    }

    /// Whether this transaction tentatively freed `segment`.
    pub(crate) fn freed(&self, segment: SegmentIndex) -> bool {
        self.free_set.contains(&segment)
    }

    /// A pure reader: nothing to publish, nothing to lock at commit.
    pub fn is_read_only(&self) -> bool {
        self.write_set.is_empty() && self.alloc_set.is_empty() && self.free_set.is_empty()
    }

    /// Number of words in the read-set.
    pub fn read_count(&self) -> usize {
        self.read_set.len()
    }

    /// Number of words in the write-set.
    pub fn write_count(&self) -> usize {
        self.write_set.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_transaction_is_active_and_read_only() {
        let tx = TransactionContext::new(1, 10);
        assert!(tx.is_active());
        assert!(tx.is_read_only());
        assert!(tx.ensure_active().is_ok());
    }

    #[test]
    fn buffered_write_is_read_back() {
        let mut tx = TransactionContext::new(1, 0);
        let w = WordRef { segment: 0, word: 3 };
        assert!(tx.buffered(&w).is_none());
        tx.buffer_write(w, &[9u8; 8]);
        assert_eq!(tx.buffered(&w), Some(&[9u8; 8][..]));
        assert!(!tx.is_read_only());
    }

    #[test]
    fn latest_write_wins() {
        let mut tx = TransactionContext::new(1, 0);
        let w = WordRef { segment: 0, word: 0 };
        tx.buffer_write(w, &[1u8; 8]);
        tx.buffer_write(w, &[2u8; 8]);
        assert_eq!(tx.buffered(&w), Some(&[2u8; 8][..]));
        assert_eq!(tx.write_count(), 1);
    }

    #[test]
    fn record_read_keeps_first_version() {
        let mut tx = TransactionContext::new(1, 10);
        let w = WordRef { segment: 0, word: 1 };
        tx.record_read(w, 4);
        tx.record_read(w, 9);
        assert_eq!(tx.read_set[&w], 4);
    }

    #[test]
    fn doomed_transaction_rejects_operations_and_drops_writes() {
        let mut tx = TransactionContext::new(1, 0);
        tx.buffer_write(WordRef { segment: 0, word: 0 }, &[1u8; 8]);
        tx.doom("version changed under read");
        assert!(tx.is_aborted());
        assert_eq!(tx.write_count(), 0);
        assert_eq!(tx.abort_reason(), Some("version changed under read"));
        assert!(tx.ensure_active().is_err());
    }

    #[test]
    fn doom_is_idempotent() {
        let mut tx = TransactionContext::new(1, 0);
        tx.doom("first");
        tx.doom("second");
        assert_eq!(tx.abort_reason(), Some("first"));
    }
}
