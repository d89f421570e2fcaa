//! HTTP server setup and configuration.

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, Method},
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{self, COMBINATION_HEADER, REQUEST_ID_HEADER};
use crate::config::Config;
use crate::router::Registry;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub http_client: Client,
    /// Request body cap for the chat endpoint
    pub max_body_bytes: usize,
}

impl AppState {
    /// Build state from a validated configuration.
    ///
    /// The HTTP client only carries a connect timeout; every backend call
    /// sets its own request timeout.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let registry = Registry::from_config(config)?;
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            registry: Arc::new(registry),
            http_client,
            max_body_bytes: config.server.max_body_bytes(),
        })
    }
}

/// Browser clients may call the gateway from any origin.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderName::from_static(COMBINATION_HEADER),
        ])
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let max_body_bytes = state.max_body_bytes;

    Router::new()
        // OpenAI-compatible endpoints
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/models", get(handlers::list_models))
        .route("/health", get(handlers::health))
        // State and middleware
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();
    let state = AppState::from_config(&config)?;

    tracing::info!(
        combinations = state.registry.combinations().len(),
        default = %state.registry.default_combination().name,
        "Loaded combinations"
    );

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting synthgate server");

    axum::serve(listener, app).await?;

    Ok(())
}
