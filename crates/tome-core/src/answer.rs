//! Context assembly and completion composition.
//!
//! Runs strictly after retrieval completes: the ranked chunks become a
//! context prompt for the completion provider. Retrieval itself never
//! depends on this module.

use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use tome_llm::LlmProvider;

use crate::error::CoreError;
use crate::retrieve::RetrievedChunk;

const NO_CONTEXT_ANSWER: &str = "I couldn't find any relevant information for your query.";

/// A generated answer together with the chunks it was grounded on.
#[derive(Debug)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
}

/// Build the completion prompt from retrieved context.
#[must_use]
pub fn assemble_prompt(query: &str, chunks: &[RetrievedChunk]) -> String {
    let context = chunks
        .iter()
        .map(|chunk| format!("Source: {}\n{}", chunk.title, chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    format!(
        "Context information:\n{context}\n\nQuestion: {query}\n\n\
         Based on the context above, provide a helpful answer:"
    )
}

/// Generate an answer for `query` grounded on `chunks`.
///
/// Empty context short-circuits to a fixed "nothing relevant" answer
/// without calling the provider.
///
/// # Errors
///
/// Returns [`CoreError::Provider`] if the completion call fails.
pub async fn generate<P: LlmProvider>(
    provider: &P,
    query: &str,
    chunks: Vec<RetrievedChunk>,
) -> Result<Answer, CoreError> {
    if chunks.is_empty() {
        return Ok(Answer {
            text: NO_CONTEXT_ANSWER.to_owned(),
            sources: chunks,
        });
    }

    let prompt = assemble_prompt(query, &chunks);
    let text = provider.complete(&prompt).await?;
    Ok(Answer {
        text,
        sources: chunks,
    })
}

/// Stream an answer's fragments into `tx` as they arrive.
///
/// # Errors
///
/// Returns [`CoreError::Provider`] if the stream cannot be started or a
/// fragment fails mid-stream.
pub async fn generate_stream<P: LlmProvider>(
    provider: &P,
    query: &str,
    chunks: &[RetrievedChunk],
    tx: &mpsc::UnboundedSender<String>,
) -> Result<(), CoreError> {
    if chunks.is_empty() {
        let _ = tx.send(NO_CONTEXT_ANSWER.to_owned());
        return Ok(());
    }

    let prompt = assemble_prompt(query, chunks);
    let mut stream = provider.complete_stream(&prompt).await?;
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        if tx.send(fragment).is_err() {
            // Receiver dropped: the caller stopped listening.
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use tome_llm::mock::MockProvider;
    use tome_store::{DocumentId, VectorId};

    use super::*;

    fn chunk(title: &str, content: &str) -> RetrievedChunk {
        RetrievedChunk {
            document_id: DocumentId::generate(),
            vector_id: VectorId(0),
            distance: 0.1,
            title: title.into(),
            content: content.into(),
            url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn prompt_contains_sources_and_question() {
        let chunks = vec![chunk("Alpha", "Alpha body."), chunk("Beta", "Beta body.")];
        let prompt = assemble_prompt("what is alpha?", &chunks);

        assert!(prompt.contains("Source: Alpha\nAlpha body."));
        assert!(prompt.contains("Source: Beta\nBeta body."));
        assert!(prompt.contains("---"));
        assert!(prompt.contains("Question: what is alpha?"));
    }

    #[test]
    fn prompt_preserves_chunk_order() {
        let chunks = vec![chunk("First", "a"), chunk("Second", "b")];
        let prompt = assemble_prompt("q", &chunks);
        let first = prompt.find("Source: First").unwrap();
        let second = prompt.find("Source: Second").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn empty_context_skips_the_provider() {
        let provider = MockProvider::failing();
        let answer = generate(&provider, "anything", Vec::new()).await.unwrap();
        assert_eq!(answer.text, NO_CONTEXT_ANSWER);
        assert!(answer.sources.is_empty());
    }

    #[tokio::test]
    async fn generate_returns_completion_and_sources() {
        let provider = MockProvider::with_responses(vec!["the answer".into()]);
        let chunks = vec![chunk("Doc", "Body.")];
        let answer = generate(&provider, "q", chunks).await.unwrap();
        assert_eq!(answer.text, "the answer");
        assert_eq!(answer.sources.len(), 1);
    }

    #[tokio::test]
    async fn generate_propagates_provider_failure() {
        let provider = MockProvider::failing();
        let chunks = vec![chunk("Doc", "Body.")];
        let result = generate(&provider, "q", chunks).await;
        assert!(matches!(result, Err(CoreError::Provider(_))));
    }

    #[tokio::test]
    async fn stream_forwards_all_fragments() {
        let provider = MockProvider::with_responses(vec!["hi".into()]);
        let chunks = vec![chunk("Doc", "Body.")];
        let (tx, mut rx) = mpsc::unbounded_channel();

        generate_stream(&provider, "q", &chunks, &tx).await.unwrap();
        drop(tx);

        let mut out = String::new();
        while let Some(fragment) = rx.recv().await {
            out.push_str(&fragment);
        }
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn stream_empty_context_sends_fallback() {
        let provider = MockProvider::failing();
        let (tx, mut rx) = mpsc::unbounded_channel();

        generate_stream(&provider, "q", &[], &tx).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await.unwrap(), NO_CONTEXT_ANSWER);
    }
}
