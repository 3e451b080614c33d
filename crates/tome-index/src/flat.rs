//! Brute-force cosine-distance index with a JSON snapshot on disk.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::index::{BoxFuture, SearchHit, VectorIndex};

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    id: i64,
    vector: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FlatState {
    next_id: i64,
    entries: Vec<Entry>,
}

/// In-process vector index. Entries live in memory; `persist` writes the
/// whole state as JSON via a temp file + rename so a crashed write never
/// truncates the previous snapshot.
#[derive(Debug)]
pub struct FlatIndex {
    path: PathBuf,
    state: RwLock<FlatState>,
}

impl FlatIndex {
    /// Open an index backed by `path`, loading the snapshot if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let state = read_snapshot(&path).await?;
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Number of live (searchable) entries, as opposed to the id
    /// high-water mark reported by `count()`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn live_len(&self) -> usize {
        self.state.read().unwrap().entries.len()
    }
}

async fn read_snapshot(path: &Path) -> Result<FlatState, IndexError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no index snapshot, starting empty");
            Ok(FlatState::default())
        }
        Err(e) => Err(e.into()),
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(1.0);
    }

    Some(1.0 - dot / (norm_a * norm_b))
}

impl VectorIndex for FlatIndex {
    fn add(&self, vectors: Vec<Vec<f32>>) -> BoxFuture<'_, Result<i64, IndexError>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();

            if let (Some(first), Some(existing)) = (vectors.first(), state.entries.last())
                && first.len() != existing.vector.len()
            {
                return Err(IndexError::DimensionMismatch {
                    expected: existing.vector.len(),
                    got: first.len(),
                });
            }

            let base = state.next_id;
            for vector in vectors {
                let id = state.next_id;
                state.next_id += 1;
                state.entries.push(Entry { id, vector });
            }
            Ok(base)
        })
    }

    fn search(&self, query: Vec<f32>, k: usize) -> BoxFuture<'_, Result<Vec<SearchHit>, IndexError>> {
        Box::pin(async move {
            if query.is_empty() {
                return Ok(Vec::new());
            }

            let state = self.state.read().unwrap();
            if state.entries.is_empty() {
                return Ok(Vec::new());
            }

            let dim = state.entries[0].vector.len();
            if query.len() != dim {
                return Err(IndexError::DimensionMismatch {
                    expected: dim,
                    got: query.len(),
                });
            }

            let mut hits: Vec<SearchHit> = state
                .entries
                .iter()
                .filter_map(|entry| {
                    cosine_distance(&query, &entry.vector).map(|distance| SearchHit {
                        vector_id: entry.id,
                        distance,
                    })
                })
                .collect();

            hits.sort_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            hits.truncate(k.min(state.entries.len()));
            Ok(hits)
        })
    }

    fn delete_by_ids(&self, ids: Vec<i64>) -> BoxFuture<'_, Result<usize, IndexError>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let before = state.entries.len();
            state.entries.retain(|entry| !ids.contains(&entry.id));
            Ok(before - state.entries.len())
        })
    }

    fn persist(&self) -> BoxFuture<'_, Result<(), IndexError>> {
        Box::pin(async move {
            let json = {
                let state = self.state.read().unwrap();
                serde_json::to_vec(&*state)?
            };

            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }

            let tmp = self.path.with_extension("tmp");
            tokio::fs::write(&tmp, &json).await?;
            tokio::fs::rename(&tmp, &self.path).await?;
            Ok(())
        })
    }

    fn load(&self) -> BoxFuture<'_, Result<(), IndexError>> {
        Box::pin(async move {
            let fresh = read_snapshot(&self.path).await?;
            *self.state.write().unwrap() = fresh;
            Ok(())
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<(), IndexError>> {
        Box::pin(async move {
            *self.state.write().unwrap() = FlatState::default();
            Ok(())
        })
    }

    fn count(&self) -> BoxFuture<'_, Result<i64, IndexError>> {
        Box::pin(async move { Ok(self.state.read().unwrap().next_id) })
    }
}
