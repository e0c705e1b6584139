//! Commit-time read-set validation.
//!
//! A transaction's reads were individually consistent when they happened
//! (each copy was bracketed by matching lock samples). Validation proves
//! they are *still* current at commit: every word read must be unlocked —
//! or locked by the committing transaction itself — at exactly the version
//! that was observed. Any deviation means a concurrent commit intervened
//! and the transaction must abort to preserve isolation.

use crate::segment::SegmentTable;
use crate::transaction::{TransactionContext, WordRef};

/// Why a read-set entry failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The word is write-locked by another committing transaction.
    LockedByOther,
    /// The word's version moved past the one observed at read time.
    VersionChanged,
    /// The segment was freed by a committed transaction.
    SegmentGone,
}

/// One failed read-set entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict {
    /// The word that failed.
    pub word: WordRef,
    /// How it failed.
    pub kind: ConflictKind,
}

/// Outcome of validating an entire read-set.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    conflicts: Vec<Conflict>,
}

impl ValidationResult {
    /// Whether every read is still current.
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Number of failed reads.
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    /// The failed reads.
    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    fn push(&mut self, word: WordRef, kind: ConflictKind) {
        self.conflicts.push(Conflict { word, kind });
    }
}

/// Validate every read-set entry of `tx` against current word versions.
///
/// Called with the transaction's commit-time locks already held (writers)
/// or with no locks at all (pure readers). A word that is locked counts as
/// held-by-self — and therefore validatable — only if this transaction
/// wrote it or freed its segment; those are exactly the locks the commit
/// protocol acquires.
pub fn validate_read_set(tx: &TransactionContext, table: &SegmentTable) -> ValidationResult {
    let mut result = ValidationResult::default();

    for (&word, &observed) in &tx.read_set {
        let Some(segment) = table.get(word.segment) else {
            result.push(word, ConflictKind::SegmentGone);
            continue;
        };

        let sample = segment.lock_at(word.word).sample();
        let held_by_self = tx.write_set.contains_key(&word) || tx.freed(word.segment);

        if sample.locked && !held_by_self {
            result.push(word, ConflictKind::LockedByOther);
        } else if sample.version != observed {
            result.push(word, ConflictKind::VersionChanged);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentTable;

    fn setup() -> (SegmentTable, TransactionContext) {
        let table = SegmentTable::new(8, u32::MAX);
        table.create(64, 0).unwrap();
        (table, TransactionContext::new(1, 0))
    }

    fn word(w: u32) -> WordRef {
        WordRef { segment: 0, word: w }
    }

    #[test]
    fn untouched_reads_validate() {
        let (table, mut tx) = setup();
        tx.record_read(word(0), 0);
        tx.record_read(word(3), 0);
        assert!(validate_read_set(&tx, &table).is_valid());
    }

    #[test]
    fn version_change_is_a_conflict() {
        let (table, mut tx) = setup();
        tx.record_read(word(0), 0);

        // Another transaction publishes through the word.
        let seg = table.get(0).unwrap();
        assert!(seg.lock_at(0).try_lock());
        seg.lock_at(0).unlock_with_version(1);

        let result = validate_read_set(&tx, &table);
        assert_eq!(result.conflict_count(), 1);
        assert_eq!(result.conflicts()[0].kind, ConflictKind::VersionChanged);
    }

    #[test]
    fn foreign_lock_is_a_conflict() {
        let (table, mut tx) = setup();
        tx.record_read(word(2), 0);

        let seg = table.get(0).unwrap();
        assert!(seg.lock_at(2).try_lock());

        let result = validate_read_set(&tx, &table);
        assert_eq!(result.conflicts()[0].kind, ConflictKind::LockedByOther);
        seg.lock_at(2).unlock();
    }

    #[test]
    fn own_write_lock_is_not_a_conflict() {
        let (table, mut tx) = setup();
        tx.record_read(word(1), 0);
        tx.buffer_write(word(1), &[5u8; 8]);

        // Simulate the commit protocol holding our write lock.
        let seg = table.get(0).unwrap();
        assert!(seg.lock_at(1).try_lock());

        assert!(validate_read_set(&tx, &table).is_valid());
        seg.lock_at(1).unlock();
    }

    #[test]
    fn freed_segment_is_a_conflict() {
        let (table, mut tx) = setup();
        tx.record_read(word(0), 0);
        table.retire(0);

        let result = validate_read_set(&tx, &table);
        assert_eq!(result.conflicts()[0].kind, ConflictKind::SegmentGone);
    }
}
