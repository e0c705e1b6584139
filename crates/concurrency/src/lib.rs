//! Transactional concurrency for shared memory regions
//!
//! This crate implements word-granular optimistic concurrency control:
//! - `VersionedLock`: per-word version/lock conflict records
//! - `SegmentTable`: the segment allocator backing a region
//! - `TransactionContext`: read/write-set tracking with
//!   read-your-own-writes
//! - Commit-time validation and publication in a fixed global lock order
//!
//! Transactions never block each other: conflicts are resolved by abort,
//! and the caller retries with a fresh transaction. Every transaction —
//! committed or aborted — observes a consistent snapshot of memory.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod region;
pub mod segment;
pub mod transaction;
pub mod validation;
pub mod vlock;

pub use manager::CommitError;
pub use region::{Region, RegionBuilder, Transaction};
pub use transaction::{TransactionContext, TransactionStatus};
pub use validation::{validate_read_set, Conflict, ConflictKind, ValidationResult};
pub use vlock::{Backoff, LockSample, VersionedLock};
