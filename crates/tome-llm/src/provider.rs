use std::pin::Pin;

use futures::Stream;

use crate::error::LlmError;

/// Boxed stream of completion text fragments, consumed incrementally.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// A backend that turns text into embedding vectors and prompts into
/// completions. Implementations are black boxes behind this seam: the
/// indexing and retrieval pipeline never assumes anything about the model
/// beyond order-preserving, 1:1 batch embedding.
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for a prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to communicate or the response
    /// is invalid.
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String, LlmError>> + Send;

    /// Generate a completion as a stream of text fragments.
    ///
    /// Backends without native streaming return a single-fragment stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be started.
    fn complete_stream(
        &self,
        prompt: &str,
    ) -> impl Future<Output = Result<CompletionStream, LlmError>> + Send;

    fn supports_streaming(&self) -> bool {
        false
    }

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails or does not support embeddings.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    /// Embed a batch of texts, order-preserving and 1:1 with the input.
    ///
    /// The default issues sequential [`LlmProvider::embed`] calls; backends
    /// with a batch endpoint override this.
    ///
    /// # Errors
    ///
    /// Returns an error on the first failed embedding; no partial results.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, LlmError>> + Send {
        async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }

    fn supports_embeddings(&self) -> bool;

    fn name(&self) -> &str;
}
