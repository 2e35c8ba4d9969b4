//! Anthropic Messages API backend.

use serde::{Deserialize, Serialize};

use super::config::LlmConfig;
use super::types::{ChatResponse, ContentBlock, LlmError, Message};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl AnthropicClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self {
            http: config.http_client()?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// One non-streaming turn: the tutor prompt as `system`, history plus the
    /// question as `messages`.
    ///
    /// # Errors
    ///
    /// Transport failure, non-200 status, or a body that is not a Messages reply.
    pub async fn chat(&self, max_tokens: u32, system: &str, messages: &[Message]) -> Result<ChatResponse, LlmError> {
        let request = MessagesRequest { model: &self.model, max_tokens, temperature: self.temperature, system, messages };

        let response = self
            .http
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ApiRequest(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| LlmError::ApiRequest(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::ApiResponse { status: status.as_u16(), body });
        }
        parse_reply(&body)
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct MessagesReply {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: ReplyUsage,
}

#[derive(Deserialize)]
struct ReplyUsage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Keep text blocks only; a null `stop_reason` reads as `end_turn`.
pub(crate) fn parse_reply(body: &str) -> Result<ChatResponse, LlmError> {
    let reply: MessagesReply = serde_json::from_str(body).map_err(|e| LlmError::ApiParse(e.to_string()))?;
    Ok(ChatResponse {
        content: reply
            .content
            .into_iter()
            .filter(|block| matches!(block, ContentBlock::Text { .. }))
            .collect(),
        model: reply.model,
        stop_reason: reply.stop_reason.unwrap_or_else(|| "end_turn".to_string()),
        input_tokens: reply.usage.input_tokens,
        output_tokens: reply.usage.output_tokens,
    })
}

#[cfg(test)]
#[path = "anthropic_test.rs"]
mod tests;
