//! lectern — real-time lecture-assistance gateway.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use lectern_analysis::{Analyzer, LlmAnalyzer};
use lectern_domain::config::Config;
use lectern_gateway::api;
use lectern_gateway::state::AppState;
use lectern_sessions::SessionRegistry;
use lectern_store::ArtifactStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(Config::from_env());
    tracing::info!("lectern starting");

    if config.stt.api_key.is_empty() {
        tracing::warn!("LECTERN_STT_API_KEY is not set — STT connections will fail");
    }
    if config.llm.api_key.is_empty() {
        tracing::warn!("LECTERN_LLM_API_KEY is not set — analysis calls will fail");
    }

    // ── Artifact store ───────────────────────────────────────────────
    let store = Arc::new(
        ArtifactStore::open(&config.database.path).context("opening artifact store")?,
    );

    // ── Analysis adapter ─────────────────────────────────────────────
    let analyzer: Arc<dyn Analyzer> = Arc::new(
        LlmAnalyzer::from_config(&config.llm).context("initializing analysis adapter")?,
    );
    tracing::info!(
        base_url = %config.llm.base_url,
        model = %config.llm.model,
        "analysis adapter ready"
    );

    // ── Session registry ─────────────────────────────────────────────
    let registry = Arc::new(SessionRegistry::new());

    let state = AppState {
        config: config.clone(),
        store,
        analyzer,
        registry,
    };

    // ── Router ───────────────────────────────────────────────────────
    let app = api::router()
        .layer(build_cors_layer(&config.server.cors_allowed_origins))
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_concurrent_requests,
        ))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "lectern listening");

    axum::serve(listener, app)
        .await
        .context("axum server error")?;

    Ok(())
}

/// Structured JSON logging with an env-filter override.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lectern_gateway=debug")),
        )
        .json()
        .init();
}

/// Build a CORS layer from the configured origins. The default `["*"]`
/// allows any origin; explicit origins are matched exactly.
fn build_cors_layer(allowed: &[String]) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];

    if allowed.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let origins: Vec<HeaderValue> = allowed
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(methods)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
