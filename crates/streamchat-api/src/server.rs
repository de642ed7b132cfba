use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    middleware,
    routing::{get, post},
    Extension, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

use streamchat_core::{GenerationDefaults, LanguageModel};

use crate::{
    defaults::DefaultsStore,
    middleware::request_id_middleware,
    routes::{
        chat::create_chat_completion,
        defaults::{get_defaults, put_defaults},
        legacy::{chat, root, stream_chat},
        models::{health, list_models},
    },
    sessions::SessionLimiter,
};

/// Identity of the served model as reported by `/v1/models`.
///
/// Kept as its own type so the Extension lookup cannot collide with other
/// `Arc<String>` extensions.
#[derive(Debug, Clone)]
pub struct ModelCard {
    pub id: Arc<String>,
    pub owned_by: Arc<String>,
}

impl ModelCard {
    pub fn new(id: impl Into<String>, owned_by: impl Into<String>) -> Self {
        Self { id: Arc::new(id.into()), owned_by: Arc::new(owned_by.into()) }
    }
}

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub max_concurrent_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout_secs: 300,
            max_concurrent_sessions: 1,
        }
    }
}

/// Build the router with the legacy, OpenAI-compatible and admin routes.
pub fn build_router(
    model: Arc<dyn LanguageModel>,
    card: ModelCard,
    defaults: GenerationDefaults,
    config: &ServerConfig,
) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let limiter = SessionLimiter::new(config.max_concurrent_sessions);
    let defaults = Arc::new(DefaultsStore::new(defaults));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/chat/", post(chat))
        .route("/stream_chat", get(stream_chat).post(stream_chat))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(create_chat_completion))
        .route("/v1/generation/defaults", get(get_defaults).put(put_defaults))
        .layer(Extension(model))
        .layer(Extension(card))
        .layer(Extension(limiter))
        .layer(Extension(defaults))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(cors)
        .layer(trace_layer)
}

/// Start the HTTP server and block until a shutdown signal is received.
pub async fn serve(
    model: Arc<dyn LanguageModel>,
    card: ModelCard,
    defaults: GenerationDefaults,
    config: ServerConfig,
) -> anyhow::Result<()> {
    defaults.validate()?;
    let router = build_router(model, card.clone(), defaults, &config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(
        address = %addr,
        model = %card.id,
        max_concurrent_sessions = config.max_concurrent_sessions,
        "Starting streamchat gateway"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Resolves on SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
