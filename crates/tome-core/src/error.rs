#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Rejected before any I/O: a required ingestion field was missing or
    /// empty.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An embedding or completion call failed; the current operation is
    /// aborted with no partial writes.
    #[error("provider error: {0}")]
    Provider(#[from] tome_llm::LlmError),

    #[error("store error: {0}")]
    Store(#[from] tome_store::StoreError),

    #[error("index error: {0}")]
    Index(#[from] tome_index::IndexError),

    /// Embedding or vector search failed during a query. Distinct from an
    /// empty-but-successful result.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
