//! HTTP server for saged.

use crate::orchestrator::{ChatEngine, HttpModelClient, ToolGateway};
use crate::prompts;
use crate::routes;
use crate::wiki::WikiGateway;
use anyhow::{Context, Result};
use axum::Router;
use sage_common::SageConfig;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers.
pub struct AppState {
    pub engine: Arc<ChatEngine>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire up the live engine from configuration.
    pub fn new(config: &SageConfig) -> Result<Self> {
        let api_key = config
            .api_key()
            .with_context(|| format!("API key not set (export {})", config.model.api_key_env))?;

        let model = Arc::new(HttpModelClient::new(
            config.model.clone(),
            api_key,
            prompts::SYSTEM_PROMPT.to_string(),
            vec![prompts::wikipedia_tool()],
        ));
        let wiki: Arc<dyn ToolGateway> = Arc::new(WikiGateway::new(&config.wiki));

        Ok(Self {
            engine: Arc::new(ChatEngine::new(model, wiki)),
            start_time: Instant::now(),
        })
    }

    /// State with a custom engine, for tests.
    pub fn with_engine(engine: Arc<ChatEngine>) -> Self {
        Self {
            engine,
            start_time: Instant::now(),
        }
    }
}

/// Build the router for the given state.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::chat_routes())
        .merge(routes::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until shutdown.
pub async fn run(config: &SageConfig) -> Result<()> {
    let state = Arc::new(AppState::new(config)?);
    let router = app(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("cannot bind {}", config.server.bind))?;
    info!("listening on http://{}", config.server.bind);

    axum::serve(listener, router).await?;
    Ok(())
}
