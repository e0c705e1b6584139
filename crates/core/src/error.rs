//! Unified error types for txmem.
//!
//! Every operation reports failure synchronously through its return value.
//! The taxonomy distinguishes three fates for the calling transaction:
//!
//! - `OutOfMemory` from an allocation is **recoverable**: the transaction
//!   stays active and the caller may retry or move on.
//! - `Conflict` is **transaction-fatal**: the transaction is aborted and the
//!   caller owns the retry policy (begin a fresh one).
//! - `InvalidArgument` is a **caller error**: the transaction is aborted and
//!   must be ended; no further operations are accepted on it.

use thiserror::Error;

/// All txmem errors.
///
/// This is the canonical error type for all region and transaction
/// operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller error: misaligned size, out-of-range address, freeing the
    /// first segment, and similar contract violations.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying allocator could not satisfy the request.
    ///
    /// Recoverable inside a transaction (`alloc` may be retried or skipped);
    /// fatal at region creation.
    #[error("out of memory")]
    OutOfMemory,

    /// Concurrent transactions touched overlapping memory incompatibly.
    ///
    /// The transaction has been aborted; none of its effects are visible.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Operation attempted on a transaction that already committed or
    /// aborted.
    #[error("transaction is no longer active: {0}")]
    TransactionInactive(String),
}

/// Result type for txmem operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is retryable with a fresh transaction.
    ///
    /// Conflicts may succeed on retry once the competing transaction has
    /// finished; caller errors and exhaustion will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Check if this is an allocation-exhaustion error.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Error::OutOfMemory)
    }

    /// Check if this error leaves the transaction unusable.
    ///
    /// `OutOfMemory` from `alloc` is the only failure a transaction
    /// survives; everything else requires the caller to end it.
    pub fn is_transaction_fatal(&self) -> bool {
        !matches!(self, Error::OutOfMemory)
    }
}
