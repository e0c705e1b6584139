//! Convenience re-exports for typical callers.
//!
//! ```
//! use txmem::prelude::*;
//! ```

pub use crate::{Address, Error, Region, Result, Transaction};
