//! Fleetward Document Store
//!
//! A versioned, file-backed JSON document store with:
//! - Format versioning checked on open
//! - Typed records validated on read
//! - Atomic (write-then-rename) document writes
//! - UUID document IDs

pub mod storage;
pub mod meta;
pub mod collection;
pub mod document;
pub mod query;
pub mod error;

pub use storage::{NoSqlEngine, Stored};
pub use meta::Meta;
pub use collection::Collection;
pub use document::{Document, Record};
pub use query::{Filter, FilterOp, Query};
pub use error::{NoSqlError, Result};
