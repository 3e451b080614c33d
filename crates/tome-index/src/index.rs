use std::future::Future;
use std::pin::Pin;

use crate::error::IndexError;

/// Boxed future used to keep [`VectorIndex`] object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One raw search candidate: a vector id and its distance to the query,
/// prior to any filtering or ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub vector_id: i64,
    pub distance: f32,
}

/// Append-only similarity search backend.
///
/// Ids are assigned implicitly by insertion offset from a monotonic counter
/// and are never reused after deletion. `count()` reports that counter (the
/// insertion high-water mark), so a caller seeding new ids from it can never
/// collide with ids that are still live, or were ever issued.
pub trait VectorIndex: Send + Sync {
    /// Append vectors; returns the id assigned to the first one. The rest
    /// follow contiguously.
    fn add(&self, vectors: Vec<Vec<f32>>) -> BoxFuture<'_, Result<i64, IndexError>>;

    /// Nearest neighbours by ascending distance. `k` is clamped to the
    /// number of live entries; an empty index yields an empty result, never
    /// an error.
    fn search(&self, query: Vec<f32>, k: usize) -> BoxFuture<'_, Result<Vec<SearchHit>, IndexError>>;

    /// Drop entries by id; unknown ids are ignored. Returns how many were
    /// actually removed. Freed ids are never reissued.
    fn delete_by_ids(&self, ids: Vec<i64>) -> BoxFuture<'_, Result<usize, IndexError>>;

    /// Write the current state to durable storage.
    fn persist(&self) -> BoxFuture<'_, Result<(), IndexError>>;

    /// Reload state from durable storage, replacing in-memory contents.
    fn load(&self) -> BoxFuture<'_, Result<(), IndexError>>;

    /// Drop every entry and reset the id counter to zero. Only valid when
    /// the caller has invalidated the entire previous id space (rebuild).
    fn clear(&self) -> BoxFuture<'_, Result<(), IndexError>>;

    /// The id high-water mark: total vectors ever inserted.
    fn count(&self) -> BoxFuture<'_, Result<i64, IndexError>>;
}
