//! Ingestion coordination: chunk → embed → store, atomically per document.
//!
//! Write ordering is relational-first: the document row and its mapping rows
//! commit in one transaction, then the embeddings are appended to the vector
//! index. There is no shared transaction across the two stores; a failed
//! index append leaves mapping rows pointing at ids the index never durably
//! received, which is tolerated (the mapping table is authoritative and
//! [`IngestionCoordinator::rebuild`] repairs drift).

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use tome_index::VectorIndex;
use tome_llm::LlmProvider;
use tome_store::{Document, DocumentId, SqliteStore, VectorId, VectorMapping};

use crate::chunker::{ChunkerConfig, chunk_text};
use crate::error::CoreError;

/// Caller-supplied document fields.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub title: String,
    pub content: String,
    pub url: Option<String>,
}

/// Summary of a reconciliation pass.
#[derive(Debug, Default)]
pub struct RebuildReport {
    pub documents: usize,
    pub vectors: usize,
    /// Documents that produced no chunks and are unsearchable by vector.
    pub unsearchable: usize,
}

/// Orchestrates writes across the relational store and the vector index.
pub struct IngestionCoordinator<P: LlmProvider> {
    store: SqliteStore,
    index: Arc<dyn VectorIndex>,
    provider: Arc<P>,
    chunker: ChunkerConfig,
    /// Serializes the id-counter read with the relational commit so two
    /// concurrent ingestions never claim overlapping vector id ranges.
    id_gate: Mutex<()>,
}

impl<P: LlmProvider> IngestionCoordinator<P> {
    #[must_use]
    pub fn new(
        store: SqliteStore,
        index: Arc<dyn VectorIndex>,
        provider: Arc<P>,
        chunker: ChunkerConfig,
    ) -> Self {
        Self {
            store,
            index,
            provider,
            chunker,
            id_gate: Mutex::new(()),
        }
    }

    /// Ingest a single document. A document with no extractable chunks is
    /// still stored, just unsearchable by vector.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for empty required fields,
    /// [`CoreError::Provider`] if embedding fails (no partial writes), or
    /// [`CoreError::Store`] if the relational transaction fails.
    pub async fn ingest(&self, input: DocumentInput) -> Result<Document, CoreError> {
        let mut stored = self.ingest_batch(vec![input]).await?;
        Ok(stored.pop().expect("one input yields one stored document"))
    }

    /// Ingest a batch of documents. Vector ids are assigned from a single
    /// counter shared across the whole batch, so the batch occupies one
    /// contiguous, non-overlapping id range.
    ///
    /// # Errors
    ///
    /// Validation and embedding errors abort the whole batch before any
    /// write. A relational failure aborts the remainder of the batch;
    /// documents already committed stay (each is individually consistent).
    pub async fn ingest_batch(
        &self,
        inputs: Vec<DocumentInput>,
    ) -> Result<Vec<Document>, CoreError> {
        for input in &inputs {
            if input.title.trim().is_empty() {
                return Err(CoreError::Validation("title must not be empty".into()));
            }
            if input.content.trim().is_empty() {
                return Err(CoreError::Validation("content must not be empty".into()));
            }
        }

        // Chunk and embed everything up front: a provider failure must
        // abort the ingestion before anything is written.
        let mut embedded: Vec<Vec<Vec<f32>>> = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let chunks = chunk_text(&input.content, self.chunker.chunk_size);
            if chunks.is_empty() {
                tracing::debug!(title = %input.title, "document produced no chunks");
                embedded.push(Vec::new());
            } else {
                embedded.push(self.provider.embed_batch(&chunks).await?);
            }
        }

        // Critical section: the counter read and the relational commits must
        // not interleave with another ingestion's.
        let _gate = self.id_gate.lock().await;
        let mut next_id = self.index.count().await?;

        let mut stored = Vec::with_capacity(inputs.len());
        for (input, vectors) in inputs.into_iter().zip(embedded) {
            let document = Document {
                id: DocumentId::generate(),
                title: input.title,
                content: input.content,
                url: input.url,
                created_at: Utc::now(),
            };

            let mappings: Vec<VectorMapping> = (0..vectors.len() as i64)
                .map(|offset| VectorMapping {
                    vector_id: VectorId(next_id + offset),
                    document_id: document.id.clone(),
                })
                .collect();

            self.store
                .insert_document_with_mappings(&document, &mappings)
                .await?;

            if !vectors.is_empty() {
                // Post-commit append: failures leave tolerated drift, never
                // a rolled-back relational write.
                match self.index.add(vectors).await {
                    Ok(base) => debug_assert_eq!(base, next_id),
                    Err(e) => {
                        tracing::warn!(id = %document.id, "index append failed after commit: {e:#}");
                    }
                }
                next_id += mappings.len() as i64;
            }

            tracing::info!(id = %document.id, chunks = mappings.len(), "document ingested");
            stored.push(document);
        }

        if let Err(e) = self.index.persist().await {
            tracing::warn!("index persist failed after ingest: {e:#}");
        }

        Ok(stored)
    }

    /// Delete a document: mapping rows and the document row go in one
    /// relational transaction, then the index is told to drop the same ids.
    ///
    /// Returns whether the document existed. A failed index drop leaves
    /// stale index entries; retrieval filters them out by mapping-table
    /// presence, so they never resolve to a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the relational transaction fails.
    pub async fn delete(&self, id: &DocumentId) -> Result<bool, CoreError> {
        let Some(vector_ids) = self.store.delete_document(id).await? else {
            return Ok(false);
        };

        if !vector_ids.is_empty() {
            let raw: Vec<i64> = vector_ids.iter().map(|v| v.0).collect();
            match self.index.delete_by_ids(raw).await {
                Ok(removed) => {
                    tracing::info!(id = %id, removed, "document deleted");
                    if let Err(e) = self.index.persist().await {
                        tracing::warn!("index persist failed after delete: {e:#}");
                    }
                }
                Err(e) => {
                    tracing::warn!(id = %id, "index drop failed, stale entries remain: {e:#}");
                }
            }
        }

        Ok(true)
    }

    /// Rebuild the vector index from the relational documents: re-chunk,
    /// re-embed, and repopulate both the mapping table and the index. This
    /// is the repair path for drift between the two stores.
    ///
    /// # Errors
    ///
    /// Unlike ingestion, index failures are not tolerated here: a repair
    /// pass either completes or fails loudly.
    pub async fn rebuild(&self) -> Result<RebuildReport, CoreError> {
        let _gate = self.id_gate.lock().await;

        self.store.clear_vector_mappings().await?;
        self.index.clear().await?;

        let mut report = RebuildReport::default();
        let mut next_id = 0i64;
        let mut offset = 0i64;
        const PAGE: i64 = 64;

        loop {
            let page = self.store.recent_documents(PAGE, offset).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as i64;

            for document in page {
                report.documents += 1;

                let chunks = chunk_text(&document.content, self.chunker.chunk_size);
                if chunks.is_empty() {
                    report.unsearchable += 1;
                    continue;
                }

                let vectors = self.provider.embed_batch(&chunks).await?;
                let mappings: Vec<VectorMapping> = (0..vectors.len() as i64)
                    .map(|o| VectorMapping {
                        vector_id: VectorId(next_id + o),
                        document_id: document.id.clone(),
                    })
                    .collect();

                self.store.insert_vector_mappings(&mappings).await?;
                let base = self.index.add(vectors).await?;
                debug_assert_eq!(base, next_id);
                next_id += mappings.len() as i64;
                report.vectors += mappings.len();
            }
        }

        self.index.persist().await?;
        tracing::info!(
            documents = report.documents,
            vectors = report.vectors,
            unsearchable = report.unsearchable,
            "index rebuilt"
        );
        Ok(report)
    }

    /// The relational store backing this coordinator.
    #[must_use]
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }
}
