use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use tilecast_types::{History, ProviderInfo, ToolCallRequest, ToolDeclaration};

mod gemini;
mod local;
mod openai;
mod scripted;
mod session;
mod sse;

pub use gemini::GeminiProvider;
pub use local::LocalProvider;
pub use openai::OpenAiCompatibleProvider;
pub use scripted::{ScriptedChunk, ScriptedProvider};
pub use session::CompletionSession;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro-latest";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// One incremental unit of a model response.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Text(String),
    ToolCall(ToolCallRequest),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("provider request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed provider chunk: {0}")]
    MalformedChunk(String),

    #[error("provider misconfigured: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, ProviderError>> + Send>>;

/// Everything a stateless provider needs for one completion round.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system_prompt: Option<String>,
    pub declarations: Vec<ToolDeclaration>,
    pub history: History,
}

impl CompletionRequest {
    pub fn single(system_prompt: Option<String>, user_text: impl Into<String>) -> Self {
        Self {
            system_prompt,
            declarations: Vec::new(),
            history: History::starting_with(user_text),
        }
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn info(&self) -> ProviderInfo;

    /// Open one streaming completion. The returned stream is finite and
    /// consumes the underlying connection once.
    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError>;

    /// Single non-streamed result: the concatenated text of one stream.
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let mut stream = self.stream(request, CancellationToken::new()).await?;
        let mut completion = String::new();
        while let Some(chunk) = stream.next().await {
            if let Chunk::Text(text) = chunk? {
                completion.push_str(&text);
            }
        }
        Ok(completion)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Gemini,
    Openai,
    Local,
}

impl ProviderKind {
    pub const SUPPORTED: [&'static str; 3] = ["gemini", "openai", "local"];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "gemini" => Some(ProviderKind::Gemini),
            "openai" => Some(ProviderKind::Openai),
            "local" => Some(ProviderKind::Local),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Openai => "openai",
            ProviderKind::Local => "local",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

pub fn build_provider(config: &ModelConfig) -> anyhow::Result<Arc<dyn CompletionProvider>> {
    let api_key = config
        .api_key
        .as_deref()
        .filter(|key| !is_placeholder_api_key(key))
        .map(str::to_string);
    let model = config
        .model
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty());
    let provider: Arc<dyn CompletionProvider> = match config.provider {
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(
            config.base_url.as_deref().unwrap_or(DEFAULT_GEMINI_BASE_URL),
            model.unwrap_or(DEFAULT_GEMINI_MODEL),
            api_key,
        )?),
        ProviderKind::Openai => Arc::new(OpenAiCompatibleProvider::new(
            config.base_url.as_deref().unwrap_or(DEFAULT_OPENAI_BASE_URL),
            model.unwrap_or(DEFAULT_OPENAI_MODEL),
            api_key,
        )?),
        ProviderKind::Local => Arc::new(LocalProvider),
    };
    Ok(provider)
}

pub fn is_placeholder_api_key(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("x")
        || trimmed.eq_ignore_ascii_case("placeholder")
}

pub(crate) fn truncate_for_error(input: &str, max_len: usize) -> String {
    if input.len() <= max_len {
        return input.to_string();
    }
    let mut end = max_len;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &input[..end])
}

pub(crate) fn extract_error_message(value: &serde_json::Value) -> Option<String> {
    value
        .get("error")
        .and_then(|v| v.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parse_is_case_insensitive() {
        assert_eq!(ProviderKind::parse(" Gemini "), Some(ProviderKind::Gemini));
        assert_eq!(ProviderKind::parse("OPENAI"), Some(ProviderKind::Openai));
        assert_eq!(ProviderKind::parse("anthropic"), None);
    }

    #[test]
    fn placeholder_keys_are_ignored() {
        assert!(is_placeholder_api_key(""));
        assert!(is_placeholder_api_key(" X "));
        assert!(is_placeholder_api_key("placeholder"));
        assert!(!is_placeholder_api_key("sk-test"));
    }

    #[test]
    fn truncate_for_error_respects_char_boundaries() {
        let text = "é".repeat(10);
        let truncated = truncate_for_error(&text, 5);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 8);
    }

    #[tokio::test]
    async fn build_provider_uses_local_provider_offline() {
        let provider = build_provider(&ModelConfig {
            provider: ProviderKind::Local,
            ..ModelConfig::default()
        })
        .expect("provider");
        assert_eq!(provider.info().id, "local");
    }

    #[tokio::test]
    async fn default_complete_concatenates_text_chunks() {
        let provider = ScriptedProvider::new(vec![vec![
            ScriptedChunk::text("Sunny "),
            ScriptedChunk::text("skies."),
        ]]);
        let text = provider
            .complete(CompletionRequest::single(None, "weather?"))
            .await
            .expect("completion");
        assert_eq!(text, "Sunny skies.");
    }
}
