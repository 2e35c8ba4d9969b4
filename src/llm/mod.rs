//! LLM backends for the teaching assistant.
//!
//! The assistant sees only [`LlmChat`]; [`LlmClient`] routes it to the
//! backend chosen in [`config::LlmConfig`], and tests swap in a mock.

pub mod anthropic;
pub mod config;
pub mod openai;
pub mod types;

use config::{LlmBackend, LlmConfig};
pub use types::LlmChat;
use types::{ChatResponse, LlmError, Message};

/// Configured assistant backend.
pub enum LlmClient {
    Anthropic(anthropic::AnthropicClient),
    OpenAi(openai::OpenAiClient),
}

impl LlmClient {
    /// # Errors
    ///
    /// Missing key, unknown provider, or an HTTP client that fails to build.
    pub fn from_env() -> Result<Self, LlmError> {
        Self::from_config(&LlmConfig::from_env()?)
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        Ok(match &config.backend {
            LlmBackend::Anthropic => Self::Anthropic(anthropic::AnthropicClient::new(config)?),
            LlmBackend::OpenAi { api, base_url } => {
                Self::OpenAi(openai::OpenAiClient::new(config, *api, base_url.clone())?)
            }
        })
    }

    #[must_use]
    pub fn model(&self) -> &str {
        match self {
            Self::Anthropic(c) => c.model(),
            Self::OpenAi(c) => c.model(),
        }
    }
}

#[async_trait::async_trait]
impl LlmChat for LlmClient {
    async fn chat(&self, max_tokens: u32, system: &str, messages: &[Message]) -> Result<ChatResponse, LlmError> {
        match self {
            Self::Anthropic(c) => c.chat(max_tokens, system, messages).await,
            Self::OpenAi(c) => c.chat(max_tokens, system, messages).await,
        }
    }
}
