//! Core types shared across the txmem crates
//!
//! This crate defines the vocabulary of the transactional memory runtime:
//! opaque addresses, segment and transaction identifiers, and the error
//! taxonomy every operation reports through.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Address, SegmentIndex, TxId};
