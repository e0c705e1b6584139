//! # txmem
//!
//! Word-granular software transactional memory for shared in-process
//! regions.
//!
//! A [`Region`] is a shared memory area made of aligned segments. Any
//! number of threads open transactions against it; each transaction either
//! commits — all of its reads, writes, allocations and frees take effect
//! atomically — or aborts with no visible effect at all. Even aborted
//! transactions only ever observe consistent snapshots of memory.
//!
//! ## Quick Start
//!
//! ```
//! use txmem::prelude::*;
//!
//! # fn main() -> txmem::Result<()> {
//! // One region, 64 bytes, 8-byte aligned accesses.
//! let region = Region::new(64, 8)?;
//!
//! // A writer publishes atomically.
//! let mut tx = region.begin();
//! tx.write(&42u64.to_le_bytes(), region.start())?;
//! assert!(tx.end());
//!
//! // Later transactions see the committed value.
//! let mut tx = region.begin();
//! let mut buf = [0u8; 8];
//! tx.read(region.start(), &mut buf)?;
//! assert_eq!(u64::from_le_bytes(buf), 42);
//! assert!(tx.end());
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! Conflict detection is optimistic and word-granular: reads validate
//! against per-word version locks, writes are buffered until commit, and
//! committers lock their write footprint in a fixed global order before
//! publishing. A transaction that loses a race aborts immediately — it
//! never waits on the winner — and the caller retries with a fresh
//! [`Region::begin`]:
//!
//! ```
//! # use txmem::prelude::*;
//! # fn main() -> txmem::Result<()> {
//! # let region = Region::new(64, 8)?;
//! let value = loop {
//!     let mut tx = region.begin();
//!     let mut buf = [0u8; 8];
//!     if tx.read(region.start(), &mut buf).is_err() {
//!         let _ = tx.end();
//!         continue; // conflict: retry with a fresh snapshot
//!     }
//!     if tx.end() {
//!         break u64::from_le_bytes(buf);
//!     }
//! };
//! # assert_eq!(value, 0);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod prelude;

pub use txmem_concurrency::{Region, RegionBuilder, Transaction, TransactionStatus};
pub use txmem_core::{Address, Error, Result};
