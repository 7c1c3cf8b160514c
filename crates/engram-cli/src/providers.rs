//! OpenAI-compatible embedding and chat providers
//!
//! Configured entirely from environment variables; with no API key the CLI
//! runs the engine in keyword mode. Transport failures retry with
//! exponential backoff on 429.

use std::time::Duration;

use engram_core::{ChatProvider, EmbeddingProvider, EngineError, StorageError};
use serde::Deserialize;
use serde_json::json;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const MAX_RETRIES: u32 = 3;

/// Provider settings resolved from the environment
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub api_base: String,
    pub embed_model: String,
    pub chat_model: String,
}

impl ProviderConfig {
    /// None when no API key is set; the engine then takes the keyword path.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ENGRAM_API_KEY").ok().filter(|k| !k.is_empty())?;
        Some(Self {
            api_key,
            api_base: std::env::var("ENGRAM_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            embed_model: std::env::var("ENGRAM_EMBED_MODEL")
                .unwrap_or_else(|_| DEFAULT_EMBED_MODEL.to_string()),
            chat_model: std::env::var("ENGRAM_CHAT_MODEL")
                .unwrap_or_else(|_| DEFAULT_CHAT_MODEL.to_string()),
        })
    }
}

fn transport_error(context: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::Storage(StorageError::Io(std::io::Error::other(format!(
        "{context}: {err}"
    ))))
}

/// POST with up to three retries on 429, backing off exponentially.
fn post_json(
    client: &reqwest::blocking::Client,
    url: &str,
    api_key: &str,
    body: &serde_json::Value,
) -> Result<serde_json::Value, EngineError> {
    let mut attempt = 0;
    loop {
        let response = client
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .map_err(|e| transport_error("request failed", e))?;

        if response.status().as_u16() == 429 && attempt < MAX_RETRIES {
            let backoff = Duration::from_millis(500 * 2u64.pow(attempt));
            tracing::warn!(?backoff, attempt, "rate limited, backing off");
            std::thread::sleep(backoff);
            attempt += 1;
            continue;
        }
        if !response.status().is_success() {
            return Err(transport_error(
                "api error",
                format!("{} from {url}", response.status()),
            ));
        }
        return response
            .json()
            .map_err(|e| transport_error("bad response body", e));
    }
}

// ============================================================================
// EMBEDDINGS
// ============================================================================

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f64>,
}

/// Embeddings over the OpenAI `/embeddings` endpoint
pub struct OpenAiEmbeddings {
    client: reqwest::blocking::Client,
    config: ProviderConfig,
}

impl OpenAiEmbeddings {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            config,
        }
    }
}

impl EmbeddingProvider for OpenAiEmbeddings {
    fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f64>>>, EngineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({
            "model": self.config.embed_model,
            "input": texts,
        });
        let url = format!("{}/embeddings", self.config.api_base);
        let raw = post_json(&self.client, &url, &self.config.api_key, &body)?;
        let parsed: EmbeddingsResponse = serde_json::from_value(raw)
            .map_err(|e| EngineError::LlmParse(format!("embeddings response: {e}")))?;
        if parsed.data.len() != texts.len() {
            return Err(EngineError::LlmParse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        Ok(parsed
            .data
            .into_iter()
            .map(|row| Some(row.embedding))
            .collect())
    }
}

// ============================================================================
// CHAT
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Chat over the OpenAI `/chat/completions` endpoint
pub struct OpenAiChat {
    client: reqwest::blocking::Client,
    config: ProviderConfig,
}

impl OpenAiChat {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            config,
        }
    }
}

impl ChatProvider for OpenAiChat {
    fn chat(&self, prompt: &str) -> Result<String, EngineError> {
        let body = json!({
            "model": self.config.chat_model,
            "messages": [{"role": "user", "content": prompt}],
        });
        let url = format!("{}/chat/completions", self.config.api_base);
        let raw = post_json(&self.client, &url, &self.config.api_key, &body)?;
        let parsed: ChatResponse = serde_json::from_value(raw)
            .map_err(|e| EngineError::LlmParse(format!("chat response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngineError::LlmParse("chat response had no choices".into()))
    }
}
