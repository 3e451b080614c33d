//! Query-time candidate retrieval and diversity-aware re-ranking.
//!
//! A query embeds once, searches the index with a fixed oversampling pool,
//! and survives a distance cutoff. Surviving candidates resolve through the
//! mapping table (unmapped ids are silently dropped; the mapping table is
//! authoritative), group by parent document, and rank by
//! `best_distance - diversity_weight * ln(1 + hits)`: a document with
//! several near hits beats a single marginally-closer hit elsewhere.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use tome_index::{SearchHit, VectorIndex};
use tome_llm::{LlmError, LlmProvider};
use tome_store::{DocumentId, SqliteStore, VectorId};

use crate::error::CoreError;

/// Most recent distinct query embeddings kept around.
const QUERY_CACHE_CAPACITY: usize = 20;

/// Retrieval tuning. The diversity score is an empirical heuristic, so every
/// knob is configuration rather than a literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Oversampling pool fetched from the index regardless of how many
    /// documents the caller wants; feeds diversity selection.
    pub pool_k: usize,
    /// Candidates farther than this are discarded.
    pub distance_cutoff: f32,
    /// Weight of the per-document hit-count bonus.
    pub diversity_weight: f32,
    /// Default number of documents returned.
    pub top_documents: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            pool_k: 100,
            distance_cutoff: 0.8,
            diversity_weight: 0.1,
            top_documents: 5,
        }
    }
}

/// A ranked, hydrated result: the best chunk of one document.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub document_id: DocumentId,
    pub vector_id: VectorId,
    pub distance: f32,
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Query lifecycle, published for progress reporting. `Complete` carries the
/// final ranked chunk list; `Failed` is terminal with the triggering error.
/// There is no automatic retry.
#[derive(Debug, Clone, Default)]
pub enum QueryState {
    #[default]
    Idle,
    Embedding,
    Searching,
    Retrieving,
    Ranking,
    Complete(Vec<RetrievedChunk>),
    Failed(String),
}

/// Embeds queries, searches the vector index, and hydrates + ranks results.
pub struct RetrievalEngine<P: LlmProvider> {
    store: SqliteStore,
    index: Arc<dyn VectorIndex>,
    provider: Arc<P>,
    config: RetrievalConfig,
    query_cache: Mutex<HashMap<String, Vec<f32>>>,
    state_tx: watch::Sender<QueryState>,
}

impl<P: LlmProvider> RetrievalEngine<P> {
    #[must_use]
    pub fn new(
        store: SqliteStore,
        index: Arc<dyn VectorIndex>,
        provider: Arc<P>,
        config: RetrievalConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(QueryState::Idle);
        Self {
            store,
            index,
            provider,
            config,
            query_cache: Mutex::new(HashMap::new()),
            state_tx,
        }
    }

    /// Watch query lifecycle transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<QueryState> {
        self.state_tx.subscribe()
    }

    /// Retrieve the most relevant documents for a query, at most one chunk
    /// per document and at most `top_documents` entries.
    ///
    /// An empty result is a successful "no relevant documents" answer,
    /// never conflated with a failure.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Retrieval`] if embedding or the vector search
    /// fails, [`CoreError::Store`] if hydration fails. No partial results.
    pub async fn retrieve(
        &self,
        query: &str,
        top_documents: Option<usize>,
    ) -> Result<Vec<RetrievedChunk>, CoreError> {
        let top = top_documents.unwrap_or(self.config.top_documents);
        match self.retrieve_inner(query, top).await {
            Ok(chunks) => {
                self.state_tx.send_replace(QueryState::Complete(chunks.clone()));
                Ok(chunks)
            }
            Err(e) => {
                self.state_tx.send_replace(QueryState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn retrieve_inner(
        &self,
        query: &str,
        top: usize,
    ) -> Result<Vec<RetrievedChunk>, CoreError> {
        self.state_tx.send_replace(QueryState::Embedding);
        let query_vector = self
            .cached_query_embedding(query)
            .await
            .map_err(|e| CoreError::Retrieval(format!("query embedding failed: {e}")))?;

        self.state_tx.send_replace(QueryState::Searching);
        let pool = self
            .index
            .search(query_vector, self.config.pool_k)
            .await
            .map_err(|e| CoreError::Retrieval(format!("vector search failed: {e}")))?;

        let candidates: Vec<SearchHit> = pool
            .into_iter()
            .filter(|hit| hit.distance <= self.config.distance_cutoff)
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        self.state_tx.send_replace(QueryState::Retrieving);
        let vector_ids: Vec<VectorId> =
            candidates.iter().map(|hit| VectorId(hit.vector_id)).collect();
        let mappings = self.store.mappings_by_vector_ids(&vector_ids).await?;
        let by_vector: HashMap<i64, DocumentId> = mappings
            .into_iter()
            .map(|m| (m.vector_id.0, m.document_id))
            .collect();

        struct DocGroup {
            best: SearchHit,
            hits: usize,
        }

        let mut groups: HashMap<DocumentId, DocGroup> = HashMap::new();
        for hit in &candidates {
            let Some(document_id) = by_vector.get(&hit.vector_id) else {
                // Consistency gap: the index still holds a vector whose
                // mapping row is gone. Shrinks the candidate set, never an
                // error.
                tracing::debug!(vector_id = hit.vector_id, "candidate has no mapping row");
                continue;
            };
            groups
                .entry(document_id.clone())
                .and_modify(|group| {
                    group.hits += 1;
                    if hit.distance < group.best.distance {
                        group.best = *hit;
                    }
                })
                .or_insert(DocGroup { best: *hit, hits: 1 });
        }
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        self.state_tx.send_replace(QueryState::Ranking);
        let mut ranked: Vec<(DocumentId, SearchHit, f32)> = groups
            .into_iter()
            .map(|(document_id, group)| {
                let score =
                    diversity_score(group.best.distance, group.hits, self.config.diversity_weight);
                (document_id, group.best, score)
            })
            .collect();
        ranked.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(top);

        let document_ids: Vec<DocumentId> = ranked.iter().map(|(id, _, _)| id.clone()).collect();
        let documents = self.store.documents_by_ids(&document_ids).await?;
        let by_id: HashMap<DocumentId, tome_store::Document> = documents
            .into_iter()
            .map(|doc| (doc.id.clone(), doc))
            .collect();

        let chunks = ranked
            .into_iter()
            .filter_map(|(document_id, best, _)| {
                by_id.get(&document_id).map(|doc| RetrievedChunk {
                    document_id: document_id.clone(),
                    vector_id: VectorId(best.vector_id),
                    distance: best.distance,
                    title: doc.title.clone(),
                    content: doc.content.clone(),
                    url: doc.url.clone(),
                    created_at: doc.created_at,
                })
            })
            .collect();
        Ok(chunks)
    }

    async fn cached_query_embedding(&self, query: &str) -> Result<Vec<f32>, LlmError> {
        {
            let cache = self.query_cache.lock().unwrap();
            if let Some(vector) = cache.get(query) {
                tracing::debug!("query embedding cache hit");
                return Ok(vector.clone());
            }
        }

        let vector = self.provider.embed(query).await?;

        {
            let mut cache = self.query_cache.lock().unwrap();
            if cache.len() >= QUERY_CACHE_CAPACITY && !cache.contains_key(query) {
                if let Some(evict) = cache.keys().next().cloned() {
                    cache.remove(&evict);
                }
            }
            cache.insert(query.to_owned(), vector.clone());
        }

        Ok(vector)
    }
}

/// Lower is better: the raw best distance discounted by how many chunks of
/// the same document landed in the candidate pool.
#[allow(clippy::cast_precision_loss)]
fn diversity_score(best_distance: f32, hits: usize, weight: f32) -> f32 {
    best_distance - weight * (hits as f32).ln_1p()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use tome_index::FlatIndex;
    use tome_llm::mock::MockProvider;
    use tome_store::{Document, VectorMapping};

    use super::*;

    /// Unit vector at the given cosine similarity to the query `[1, 0]`,
    /// i.e. at cosine distance `1 - cos`.
    fn unit_at(cos: f32) -> Vec<f32> {
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: SqliteStore,
        index: Arc<dyn VectorIndex>,
        engine: RetrievalEngine<MockProvider>,
    }

    async fn fixture(config: RetrievalConfig, provider: MockProvider) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(":memory:").await.unwrap();
        let index: Arc<dyn VectorIndex> = Arc::new(
            FlatIndex::open(dir.path().join("vectors.json"))
                .await
                .unwrap(),
        );
        let engine = RetrievalEngine::new(
            store.clone(),
            Arc::clone(&index),
            Arc::new(provider),
            config,
        );
        Fixture {
            _dir: dir,
            store,
            index,
            engine,
        }
    }

    async fn seed_document(f: &Fixture, title: &str, vectors: Vec<Vec<f32>>) -> DocumentId {
        let document = Document {
            id: DocumentId::generate(),
            title: title.into(),
            content: format!("{title} body."),
            url: None,
            created_at: Utc::now(),
        };
        let base = f.index.add(vectors.clone()).await.unwrap();
        let mappings: Vec<VectorMapping> = (0..vectors.len() as i64)
            .map(|offset| VectorMapping {
                vector_id: VectorId(base + offset),
                document_id: document.id.clone(),
            })
            .collect();
        f.store
            .insert_document_with_mappings(&document, &mappings)
            .await
            .unwrap();
        document.id
    }

    fn query_provider() -> MockProvider {
        MockProvider::default().with_embedding(vec![1.0, 0.0])
    }

    fn tight_config() -> RetrievalConfig {
        RetrievalConfig {
            distance_cutoff: 0.30,
            ..RetrievalConfig::default()
        }
    }

    #[test]
    fn diversity_score_discounts_by_hit_count() {
        let single = diversity_score(0.25, 1, 0.1);
        assert!((single - (0.25 - 0.1 * 2.0f32.ln())).abs() < 1e-6);

        // Two near hits beat one marginally closer hit.
        let two_hits = diversity_score(0.20, 2, 0.1);
        let one_closer = diversity_score(0.18, 1, 0.1);
        assert!(two_hits < one_closer);
    }

    #[tokio::test]
    async fn diversity_ranking_promotes_multi_hit_documents() {
        let f = fixture(tight_config(), query_provider()).await;

        let doc_a = seed_document(&f, "A", vec![unit_at(0.80), unit_at(0.78)]).await;
        let doc_b = seed_document(&f, "B", vec![unit_at(0.85), unit_at(0.82)]).await;
        let doc_c = seed_document(&f, "C", vec![unit_at(0.75)]).await;

        let results = f.engine.retrieve("query", Some(3)).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].document_id, doc_b);
        assert_eq!(results[1].document_id, doc_a);
        assert_eq!(results[2].document_id, doc_c);

        // At most one chunk per document, each carrying its best distance.
        assert!((results[0].distance - 0.15).abs() < 1e-3);
        assert!((results[1].distance - 0.20).abs() < 1e-3);
        assert!((results[2].distance - 0.25).abs() < 1e-3);
    }

    #[tokio::test]
    async fn cutoff_excludes_distant_candidates() {
        let f = fixture(tight_config(), query_provider()).await;

        let near = seed_document(&f, "Near", vec![unit_at(0.90)]).await;
        let far = seed_document(&f, "Far", vec![unit_at(0.50)]).await;

        let results = f.engine.retrieve("query", None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, near);
        assert_ne!(results[0].document_id, far);
        for chunk in &results {
            assert!(chunk.distance <= 0.30);
        }
    }

    #[tokio::test]
    async fn all_candidates_beyond_cutoff_is_empty_success() {
        let f = fixture(tight_config(), query_provider()).await;
        seed_document(&f, "Far", vec![unit_at(0.10)]).await;

        let results = f.engine.retrieve("query", None).await.unwrap();
        assert!(results.is_empty());

        let state = f.engine.subscribe().borrow().clone();
        assert!(matches!(state, QueryState::Complete(ref chunks) if chunks.is_empty()));
    }

    #[tokio::test]
    async fn empty_index_returns_empty() {
        let f = fixture(tight_config(), query_provider()).await;
        let results = f.engine.retrieve("query", None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn unmapped_candidates_are_silently_dropped() {
        let f = fixture(tight_config(), query_provider()).await;

        let mapped = seed_document(&f, "Mapped", vec![unit_at(0.85)]).await;
        // A live index entry with no mapping row: tolerated staleness.
        f.index.add(vec![unit_at(0.95)]).await.unwrap();

        let results = f.engine.retrieve("query", None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, mapped);
    }

    #[tokio::test]
    async fn top_documents_limits_result_count() {
        let f = fixture(tight_config(), query_provider()).await;
        seed_document(&f, "One", vec![unit_at(0.90)]).await;
        seed_document(&f, "Two", vec![unit_at(0.85)]).await;
        seed_document(&f, "Three", vec![unit_at(0.80)]).await;

        let results = f.engine.retrieve("query", Some(2)).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn results_hydrate_parent_document_fields() {
        let f = fixture(tight_config(), query_provider()).await;

        let document = Document {
            id: DocumentId::generate(),
            title: "Hydrated".into(),
            content: "Full document body.".into(),
            url: Some("https://example.com".into()),
            created_at: Utc::now(),
        };
        let base = f.index.add(vec![unit_at(0.9)]).await.unwrap();
        f.store
            .insert_document_with_mappings(
                &document,
                &[VectorMapping {
                    vector_id: VectorId(base),
                    document_id: document.id.clone(),
                }],
            )
            .await
            .unwrap();

        let results = f.engine.retrieve("query", None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Hydrated");
        assert_eq!(results[0].content, "Full document body.");
        assert_eq!(results[0].url.as_deref(), Some("https://example.com"));
        assert_eq!(results[0].vector_id, VectorId(base));
    }

    #[tokio::test]
    async fn embedding_failure_is_retrieval_error_with_failed_state() {
        let f = fixture(tight_config(), MockProvider::failing_embeddings()).await;
        seed_document(&f, "Doc", vec![unit_at(0.9)]).await;

        let result = f.engine.retrieve("query", None).await;
        assert!(matches!(result, Err(CoreError::Retrieval(_))));

        let state = f.engine.subscribe().borrow().clone();
        assert!(matches!(state, QueryState::Failed(_)));
    }

    #[tokio::test]
    async fn repeated_queries_hit_the_embedding_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let provider = MockProvider::default().with_embed_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![1.0, 0.0]
        });

        let f = fixture(tight_config(), provider).await;
        seed_document(&f, "Doc", vec![unit_at(0.9)]).await;

        f.engine.retrieve("same query", None).await.unwrap();
        f.engine.retrieve("same query", None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        f.engine.retrieve("different query", None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn subscribe_starts_idle() {
        let f = fixture(RetrievalConfig::default(), query_provider()).await;
        let state = f.engine.subscribe().borrow().clone();
        assert!(matches!(state, QueryState::Idle));
    }
}
