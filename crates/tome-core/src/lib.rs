//! Retrieval-augmented indexing and ranking engine.
//!
//! The pipeline: documents are split into sentence-respecting chunks,
//! embedded, and written to two independently persisted stores: a
//! relational document/mapping store and a vector similarity index. The
//! relational side is the source of truth for which vectors are live; the
//! index is the source of truth for which vectors are nearest. Queries
//! oversample the index, then diversity-rank candidates per document.

pub mod answer;
pub mod chunker;
pub mod config;
pub mod error;
pub mod ingest;
pub mod retrieve;

pub use answer::Answer;
pub use chunker::{ChunkerConfig, chunk_text};
pub use config::{Config, ProviderKind};
pub use error::CoreError;
pub use ingest::{DocumentInput, IngestionCoordinator, RebuildReport};
pub use retrieve::{QueryState, RetrievalConfig, RetrievalEngine, RetrievedChunk};
