use chrono::{DateTime, Utc};

/// Strongly typed wrapper for document ids (opaque UUID strings).
#[derive(Debug, Clone, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    /// Mint a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Strongly typed wrapper for vector ids.
///
/// The id space is owned by the vector index: ids are assigned from a
/// monotonic counter and never reused after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct VectorId(pub i64);

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for VectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored document. Immutable once indexed: editing content requires a
/// full re-chunk, re-embed, and invalidation of prior vectors.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One row of the vector_id → document_id mapping table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorMapping {
    pub vector_id: VectorId,
    pub document_id: DocumentId,
}
