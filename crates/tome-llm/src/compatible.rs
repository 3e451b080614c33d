//! OpenAI-compatible HTTP provider (LM Studio, llama.cpp server, vLLM, ...).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{CompletionStream, LlmProvider};

pub struct CompatibleProvider {
    client: reqwest::Client,
    provider_name: String,
    api_key: Option<String>,
    base_url: String,
    model: String,
    max_tokens: u32,
    embedding_model: Option<String>,
}

impl fmt::Debug for CompatibleProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompatibleProvider")
            .field("provider_name", &self.provider_name)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("embedding_model", &self.embedding_model)
            .finish_non_exhaustive()
    }
}

impl Clone for CompatibleProvider {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            provider_name: self.provider_name.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            embedding_model: self.embedding_model.clone(),
        }
    }
}

impl CompatibleProvider {
    #[must_use]
    pub fn new(
        provider_name: String,
        api_key: Option<String>,
        mut base_url: String,
        model: String,
        max_tokens: u32,
        embedding_model: Option<String>,
    ) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: crate::http::default_client(),
            provider_name,
            api_key,
            base_url,
            model,
            max_tokens,
            embedding_model,
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl LlmProvider for CompatibleProvider {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ApiMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            stream: false,
        };

        let response = self.request("/chat/completions").json(&body).send().await?;

        let status = response.status();
        let text = response.text().await.map_err(LlmError::Http)?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            tracing::error!("{} API error {status}: {text}", self.provider_name);
            return Err(LlmError::Other(format!(
                "{} chat request failed (status {status})",
                self.provider_name
            )));
        }

        let resp: ChatResponse = serde_json::from_str(&text)?;
        resp.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse {
                provider: self.provider_name.clone(),
            })
    }

    async fn complete_stream(&self, prompt: &str) -> Result<CompletionStream, LlmError> {
        // No SSE path: the whole completion arrives as one fragment.
        let text = self.complete(prompt).await?;
        Ok(Box::pin(tokio_stream::once(Ok(text))))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let input = [text.to_owned()];
        let mut vectors = self.embed_batch(&input).await?;
        vectors.pop().ok_or(LlmError::EmptyResponse {
            provider: self.provider_name.clone(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let Some(embedding_model) = &self.embedding_model else {
            return Err(LlmError::EmbedUnsupported {
                provider: self.provider_name.clone(),
            });
        };
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingsRequest {
            model: embedding_model,
            input: texts,
        };

        let response = self.request("/embeddings").json(&body).send().await?;

        let status = response.status();
        let text = response.text().await.map_err(LlmError::Http)?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            tracing::error!("{} embeddings error {status}: {text}", self.provider_name);
            return Err(LlmError::Other(format!(
                "{} embeddings request failed (status {status})",
                self.provider_name
            )));
        }

        let resp: EmbeddingsResponse = serde_json::from_str(&text)?;
        if resp.data.len() != texts.len() {
            return Err(LlmError::EmbedCountMismatch {
                sent: texts.len(),
                received: resp.data.len(),
            });
        }

        Ok(resp.data.into_iter().map(|row| row.embedding).collect())
    }

    fn supports_embeddings(&self) -> bool {
        self.embedding_model.is_some()
    }

    fn name(&self) -> &str {
        &self.provider_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> CompatibleProvider {
        CompatibleProvider::new(
            "lmstudio".into(),
            None,
            format!("{}/v1", server.uri()),
            "test-model".into(),
            1024,
            Some("test-embed".into()),
        )
    }

    #[test]
    fn name_returns_custom_provider_name() {
        let p = CompatibleProvider::new(
            "lmstudio".into(),
            None,
            "http://localhost:1234/v1".into(),
            "m".into(),
            1024,
            None,
        );
        assert_eq!(p.name(), "lmstudio");
    }

    #[test]
    fn base_url_trailing_slashes_stripped() {
        let p = CompatibleProvider::new(
            "x".into(),
            None,
            "http://localhost:1234/v1///".into(),
            "m".into(),
            1024,
            None,
        );
        assert_eq!(p.base_url, "http://localhost:1234/v1");
    }

    #[test]
    fn supports_embeddings_requires_model() {
        let without = CompatibleProvider::new(
            "x".into(),
            None,
            "http://localhost".into(),
            "m".into(),
            1024,
            None,
        );
        assert!(!without.supports_embeddings());

        let with = CompatibleProvider::new(
            "x".into(),
            None,
            "http://localhost".into(),
            "m".into(),
            1024,
            Some("e".into()),
        );
        assert!(with.supports_embeddings());
    }

    #[test]
    fn debug_redacts_api_key() {
        let p = CompatibleProvider::new(
            "x".into(),
            Some("sk-secret".into()),
            "http://localhost".into(),
            "m".into(),
            1024,
            None,
        );
        let debug = format!("{p:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn complete_parses_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "forty-two"}}]
            })))
            .mount(&server)
            .await;

        let answer = provider_for(&server).complete("meaning of life?").await.unwrap();
        assert_eq!(answer, "forty-two");
    }

    #[tokio::test]
    async fn complete_empty_choices_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let result = provider_for(&server).complete("hi").await;
        assert!(matches!(result, Err(LlmError::EmptyResponse { .. })));
    }

    #[tokio::test]
    async fn complete_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let result = provider_for(&server).complete("hi").await;
        assert!(matches!(result, Err(LlmError::RateLimited)));
    }

    #[tokio::test]
    async fn complete_stream_yields_single_fragment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "whole answer"}}]
            })))
            .mount(&server)
            .await;

        let mut stream = provider_for(&server).complete_stream("hi").await.unwrap();
        let mut fragments = Vec::new();
        while let Some(item) = stream.next().await {
            fragments.push(item.unwrap());
        }
        assert_eq!(fragments, vec!["whole answer".to_string()]);
    }

    #[tokio::test]
    async fn embed_batch_preserves_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"embedding": [1.0, 0.0]},
                    {"embedding": [0.0, 1.0]}
                ]
            })))
            .mount(&server)
            .await;

        let texts = vec!["first".to_string(), "second".to_string()];
        let vectors = provider_for(&server).embed_batch(&texts).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn embed_batch_count_mismatch_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [1.0]}]
            })))
            .mount(&server)
            .await;

        let texts = vec!["a".to_string(), "b".to_string()];
        let result = provider_for(&server).embed_batch(&texts).await;
        assert!(matches!(
            result,
            Err(LlmError::EmbedCountMismatch {
                sent: 2,
                received: 1
            })
        ));
    }

    #[tokio::test]
    async fn embed_without_model_errors() {
        let p = CompatibleProvider::new(
            "lmstudio".into(),
            None,
            "http://127.0.0.1:1/v1".into(),
            "m".into(),
            1024,
            None,
        );
        let result = p.embed("test").await;
        assert!(matches!(result, Err(LlmError::EmbedUnsupported { .. })));
    }

    #[tokio::test]
    async fn embed_batch_empty_input_skips_request() {
        let p = CompatibleProvider::new(
            "lmstudio".into(),
            None,
            "http://127.0.0.1:1/v1".into(),
            "m".into(),
            1024,
            Some("e".into()),
        );
        let vectors = p.embed_batch(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }

    #[tokio::test]
    async fn chat_unreachable_errors() {
        let p = CompatibleProvider::new(
            "lmstudio".into(),
            None,
            "http://127.0.0.1:1/v1".into(),
            "m".into(),
            1024,
            None,
        );
        assert!(p.complete("hello").await.is_err());
    }
}
