use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunker::ChunkerConfig;
use crate::error::CoreError;
use crate::retrieve::RetrievalConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub index: IndexConfig,
    pub chunker: ChunkerConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    /// Any OpenAI-compatible server (LM Studio, llama.cpp, vLLM, ...).
    Compatible,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            base_url: "http://localhost:11434".into(),
            model: "mistral:7b".into(),
            embedding_model: "nomic-embed-text".into(),
            max_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub sqlite_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "./data/tome.db".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub path: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: "./data/index.json".into(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| CoreError::Config(format!("failed to read config file: {e}")))?;
            toml::from_str::<Self>(&content)
                .map_err(|e| CoreError::Config(format!("failed to parse config file: {e}")))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TOME_LLM_PROVIDER") {
            match v.as_str() {
                "ollama" => self.llm.provider = ProviderKind::Ollama,
                "compatible" => self.llm.provider = ProviderKind::Compatible,
                other => tracing::warn!("ignoring unknown TOME_LLM_PROVIDER: {other}"),
            }
        }
        if let Ok(v) = std::env::var("TOME_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("TOME_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("TOME_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("TOME_SQLITE_PATH") {
            self.store.sqlite_path = v;
        }
        if let Ok(v) = std::env::var("TOME_INDEX_PATH") {
            self.index.path = v;
        }
    }
}
