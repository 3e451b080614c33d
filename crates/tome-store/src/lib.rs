//! SQLite-backed document and vector-mapping persistence.
//!
//! The relational store is the source of truth for which vectors are live:
//! a vector id without a mapping row no longer represents data, even if the
//! vector index still physically contains it.

pub mod error;
pub mod sqlite;
pub mod types;

pub use error::StoreError;
pub use sqlite::SqliteStore;
pub use types::{Document, DocumentId, VectorId, VectorMapping};
