//! Server configuration parsed from environment variables.
//!
//! Every knob has a default so a bare `cargo run` starts an in-memory server.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_MAX_CONTENT_CHARS: usize = 4000;
const DEFAULT_AI_HISTORY_TURNS: usize = 10;
const DEFAULT_AI_MAX_TOKENS: u32 = 2000;
const DEFAULT_AI_REPLY_MAX_CHARS: usize = 8000;
const DEFAULT_AI_TIMEOUT_SECS: u64 = 60;
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_UPLOAD_MAX_BYTES: usize = 10 * 1024 * 1024;

/// Tuning knobs for the assistant exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssistantLimits {
    /// Prior turns handed to the model.
    pub history_turns: usize,
    /// Output token ceiling per call.
    pub max_tokens: u32,
    /// Replies longer than this are truncated before persistence.
    pub reply_max_chars: usize,
    /// Wall-clock bound on a single assistant call.
    pub timeout: Duration,
}

impl Default for AssistantLimits {
    fn default() -> Self {
        Self {
            history_turns: DEFAULT_AI_HISTORY_TURNS,
            max_tokens: DEFAULT_AI_MAX_TOKENS,
            reply_max_chars: DEFAULT_AI_REPLY_MAX_CHARS,
            timeout: Duration::from_secs(DEFAULT_AI_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Outbound queue depth per connection.
    pub client_channel_capacity: usize,
    /// Upper bound on message content length, in characters.
    pub max_content_chars: usize,
    pub assistant: AssistantLimits,
    /// Typing entries older than this are swept. `None` disables expiry.
    pub typing_expiry: Option<Duration>,
    /// Validate `user:online` identities against the user directory.
    pub require_known_users: bool,
    /// Where attachment uploads are written; served under `/uploads`.
    pub upload_dir: PathBuf,
    pub upload_max_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            assistant: AssistantLimits::default(),
            typing_expiry: None,
            require_known_users: false,
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            upload_max_bytes: DEFAULT_UPLOAD_MAX_BYTES,
        }
    }
}

impl ServerConfig {
    /// Build typed server config from environment variables.
    ///
    /// - `PORT` (3000), `DATABASE_URL` (unset: memory store)
    /// - `CLIENT_CHANNEL_CAPACITY` (256), `MAX_CONTENT_CHARS` (4000)
    /// - `AI_HISTORY_TURNS` (10), `AI_MAX_TOKENS` (2000),
    ///   `AI_REPLY_MAX_CHARS` (8000), `AI_TIMEOUT_SECS` (60)
    /// - `TYPING_EXPIRY_SECS` (unset: no expiry)
    /// - `REQUIRE_KNOWN_USERS` (`false`)
    /// - `UPLOAD_DIR` (`uploads`), `UPLOAD_MAX_BYTES` (10 MiB)
    #[must_use]
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let typing_expiry = std::env::var("TYPING_EXPIRY_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        let upload_dir = std::env::var("UPLOAD_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR), PathBuf::from);

        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url,
            client_channel_capacity: env_parse("CLIENT_CHANNEL_CAPACITY", DEFAULT_CLIENT_CHANNEL_CAPACITY).max(1),
            max_content_chars: env_parse("MAX_CONTENT_CHARS", DEFAULT_MAX_CONTENT_CHARS),
            assistant: AssistantLimits {
                history_turns: env_parse("AI_HISTORY_TURNS", DEFAULT_AI_HISTORY_TURNS),
                max_tokens: env_parse("AI_MAX_TOKENS", DEFAULT_AI_MAX_TOKENS),
                reply_max_chars: env_parse("AI_REPLY_MAX_CHARS", DEFAULT_AI_REPLY_MAX_CHARS),
                timeout: Duration::from_secs(env_parse("AI_TIMEOUT_SECS", DEFAULT_AI_TIMEOUT_SECS)),
            },
            typing_expiry,
            require_known_users: env_parse("REQUIRE_KNOWN_USERS", false),
            upload_dir,
            upload_max_bytes: env_parse("UPLOAD_MAX_BYTES", DEFAULT_UPLOAD_MAX_BYTES).max(1),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
