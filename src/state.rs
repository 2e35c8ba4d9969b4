//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! cloned into every connection task. Each registry owns its own lock; the
//! stores sit behind trait objects so the same handlers run on Postgres or
//! in memory.
//!
//! `fanout_gate` serializes "append, then deliver" so no connection ever
//! sees a later-accepted message before an earlier one.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::llm::LlmChat;
use crate::services::hub::Hub;
use crate::services::presence::PresenceRegistry;
use crate::services::typing::TypingAggregator;
use crate::store::{MessageStore, RoomDirectory, UserDirectory};

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub messages: Arc<dyn MessageStore>,
    pub rooms: Arc<dyn RoomDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub presence: PresenceRegistry,
    pub typing: TypingAggregator,
    pub hub: Hub,
    /// Optional LLM client. `None` if LLM env vars are not configured.
    pub llm: Option<Arc<dyn LlmChat>>,
    pub fanout_gate: Arc<Mutex<()>>,
}

impl AppState {
    /// Build state over one backend that implements every store trait.
    #[must_use]
    pub fn new<S>(config: ServerConfig, store: Arc<S>, llm: Option<Arc<dyn LlmChat>>) -> Self
    where
        S: MessageStore + RoomDirectory + UserDirectory + 'static,
    {
        Self {
            config: Arc::new(config),
            messages: store.clone(),
            rooms: store.clone(),
            users: store,
            presence: PresenceRegistry::new(),
            typing: TypingAggregator::new(),
            hub: Hub::new(),
            llm,
            fanout_gate: Arc::new(Mutex::new(())),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
