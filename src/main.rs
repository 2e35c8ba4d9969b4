mod config;
mod db;
mod frame;
mod llm;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::llm::LlmChat;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    let port = config.port;
    let typing_expiry = config.typing_expiry;

    // Initialize LLM client (non-fatal: AI features disabled if config missing).
    let llm: Option<Arc<dyn LlmChat>> = match llm::LlmClient::from_env() {
        Ok(client) => {
            tracing::info!(model = client.model(), "LLM client initialized");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::warn!(error = %e, "LLM client not configured; AI assistant disabled");
            None
        }
    };

    let state = match config.database_url.clone() {
        Some(database_url) => {
            let pool = db::init_pool(&database_url)
                .await
                .expect("database init failed");
            let store = store::PgStore::new(pool)
                .await
                .expect("message store init failed");
            AppState::new(config, Arc::new(store), llm)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; messages are kept in memory only");
            AppState::new(config, Arc::new(store::MemoryStore::new()), llm)
        }
    };

    if let Some(ttl) = typing_expiry {
        let _sweeper = services::typing::spawn_typing_sweeper(state.clone(), ttl);
    }

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "neurochat listening");
    axum::serve(listener, app).await.expect("server failed");
}
