//! Test-only mock provider.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::{CompletionStream, LlmProvider};

type EmbedFn = dyn Fn(&str) -> Vec<f32> + Send + Sync;

#[derive(Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    pub default_response: String,
    pub embedding: Vec<f32>,
    embed_fn: Option<Arc<EmbedFn>>,
    pub supports_embeddings: bool,
    pub streaming: bool,
    pub fail_complete: bool,
    pub fail_embed: bool,
}

impl fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProvider")
            .field("default_response", &self.default_response)
            .field("embedding", &self.embedding)
            .field("embed_fn", &self.embed_fn.is_some())
            .field("supports_embeddings", &self.supports_embeddings)
            .field("streaming", &self.streaming)
            .field("fail_complete", &self.fail_complete)
            .field("fail_embed", &self.fail_embed)
            .finish_non_exhaustive()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            embedding: vec![0.0; 384],
            embed_fn: None,
            supports_embeddings: true,
            streaming: false,
            fail_complete: false,
            fail_embed: false,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_complete: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing_embeddings() -> Self {
        Self {
            fail_embed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Derive embeddings from the input text, for tests that need distinct
    /// vectors per document.
    #[must_use]
    pub fn with_embed_fn(mut self, f: impl Fn(&str) -> Vec<f32> + Send + Sync + 'static) -> Self {
        self.embed_fn = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }
}

impl LlmProvider for MockProvider {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        if self.fail_complete {
            return Err(LlmError::Other("mock completion error".into()));
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn complete_stream(&self, prompt: &str) -> Result<CompletionStream, LlmError> {
        let response = self.complete(prompt).await?;
        let chunks: Vec<_> = response.chars().map(|c| c.to_string()).map(Ok).collect();
        Ok(Box::pin(tokio_stream::iter(chunks)))
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if self.fail_embed {
            return Err(LlmError::Other("mock embedding error".into()));
        }
        if !self.supports_embeddings {
            return Err(LlmError::EmbedUnsupported {
                provider: "mock".into(),
            });
        }
        match &self.embed_fn {
            Some(f) => Ok(f(text)),
            None => Ok(self.embedding.clone()),
        }
    }

    fn supports_embeddings(&self) -> bool {
        self.supports_embeddings
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn default_response_returned() {
        let mock = MockProvider::default();
        assert_eq!(mock.complete("x").await.unwrap(), "mock response");
    }

    #[tokio::test]
    async fn queued_responses_consumed_in_order() {
        let mock = MockProvider::with_responses(vec!["one".into(), "two".into()]);
        assert_eq!(mock.complete("a").await.unwrap(), "one");
        assert_eq!(mock.complete("b").await.unwrap(), "two");
        assert_eq!(mock.complete("c").await.unwrap(), "mock response");
    }

    #[tokio::test]
    async fn failing_mock_errors() {
        let mock = MockProvider::failing();
        assert!(mock.complete("x").await.is_err());
    }

    #[tokio::test]
    async fn failing_embeddings_errors() {
        let mock = MockProvider::failing_embeddings();
        assert!(mock.embed("x").await.is_err());
        assert!(mock.complete("x").await.is_ok());
    }

    #[tokio::test]
    async fn embed_fn_overrides_fixed_embedding() {
        let mock = MockProvider::default().with_embed_fn(|text| vec![text.len() as f32]);
        assert_eq!(mock.embed("abc").await.unwrap(), vec![3.0]);
        assert_eq!(mock.embed("abcdef").await.unwrap(), vec![6.0]);
    }

    #[tokio::test]
    async fn stream_concatenates_to_full_response() {
        let mock = MockProvider::with_responses(vec!["hi!".into()]).with_streaming();
        let mut stream = mock.complete_stream("x").await.unwrap();
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            out.push_str(&chunk.unwrap());
        }
        assert_eq!(out, "hi!");
    }
}
