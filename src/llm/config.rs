//! Assistant backend selection.
//!
//! `LLM_PROVIDER` picks the API; the key comes from `LLM_API_KEY` or the
//! provider's conventional variable. Request deadlines are owned by the
//! assistant (`AI_TIMEOUT_SECS`), so only the connect timeout lives here.

use std::time::Duration;

use super::types::LlmError;

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_TEMPERATURE: f32 = 0.7;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which HTTP API answers assistant questions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    /// `OpenAI`, or any gateway speaking its protocol at `base_url`.
    OpenAi { api: OpenAiApi, base_url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAiApi {
    ChatCompletions,
    Responses,
}

impl LlmBackend {
    fn key_var(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi { .. } => "OPENAI_API_KEY",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => DEFAULT_ANTHROPIC_MODEL,
            Self::OpenAi { .. } => DEFAULT_OPENAI_MODEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
}

impl LlmConfig {
    /// Read the backend from the environment.
    ///
    /// - `LLM_PROVIDER`: `anthropic` (default) or `openai`
    /// - `LLM_API_KEY`, else `ANTHROPIC_API_KEY` / `OPENAI_API_KEY`
    /// - `LLM_MODEL`: per-provider default
    /// - `LLM_TEMPERATURE`: default 0.7, clamped to `0.0..=2.0`
    /// - `LLM_OPENAI_API`: `chat_completions` (default) or `responses`
    /// - `LLM_OPENAI_BASE_URL`: trailing `/` is dropped
    ///
    /// # Errors
    ///
    /// Unknown provider or API name, or no non-empty key.
    pub fn from_env() -> Result<Self, LlmError> {
        let backend = match std::env::var("LLM_PROVIDER").ok().as_deref().unwrap_or("anthropic") {
            "anthropic" => LlmBackend::Anthropic,
            "openai" => LlmBackend::OpenAi {
                api: parse_openai_api(std::env::var("LLM_OPENAI_API").ok().as_deref())?,
                base_url: std::env::var("LLM_OPENAI_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
            },
            other => return Err(LlmError::ConfigParse(format!("unknown LLM_PROVIDER '{other}'"))),
        };

        let key_var = backend.key_var();
        let api_key = std::env::var("LLM_API_KEY")
            .or_else(|_| std::env::var(key_var))
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| LlmError::MissingApiKey { var: key_var.to_string() })?;

        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| backend.default_model().to_string());
        let temperature = crate::config::env_parse("LLM_TEMPERATURE", DEFAULT_LLM_TEMPERATURE).clamp(0.0, 2.0);

        Ok(Self { backend, api_key, model, temperature })
    }

    /// HTTP client shared by both backends.
    pub(crate) fn http_client(&self) -> Result<reqwest::Client, LlmError> {
        reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LlmError::HttpClientBuild(e.to_string()))
    }
}

fn parse_openai_api(raw: Option<&str>) -> Result<OpenAiApi, LlmError> {
    match raw.unwrap_or("chat_completions") {
        "chat_completions" => Ok(OpenAiApi::ChatCompletions),
        "responses" => Ok(OpenAiApi::Responses),
        other => Err(LlmError::ConfigParse(format!(
            "unknown LLM_OPENAI_API '{other}' (expected chat_completions or responses)"
        ))),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
