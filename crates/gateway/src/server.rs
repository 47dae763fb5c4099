use std::sync::Arc;

use {
    axum::{
        Router,
        extract::State,
        http::{HeaderName, HeaderValue},
        response::{IntoResponse, Json},
        routing::{get, post},
    },
    tokio_util::sync::CancellationToken,
    tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer},
    tracing::{info, warn},
    trawl_browser::{ResourceType, SessionProvider},
    trawl_config::TrawlConfig,
    trawl_jobs::{JobService, SyncScraper},
};

use crate::{routes, state::GatewayState};

/// Response header naming the service that answered.
pub const SERVICE_HEADER: &str = "x-service";

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let service = HeaderValue::from_str(&state.service_name).unwrap_or_else(|_| {
        warn!(service_name = %state.service_name, "service name is not a valid header value");
        HeaderValue::from_static("trawl")
    });

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/jobs", post(routes::submit_job))
        .route("/api/jobs/{job_id}", get(routes::job_result))
        .route("/api/scrape", post(routes::scrape_now))
        .route("/api/scrape/screenshot", post(routes::screenshot_now))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(SERVICE_HEADER),
            service,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { gateway: state })
}

/// Start workers and serve HTTP until `shutdown` fires, then drain.
pub async fn start_gateway(
    config: &TrawlConfig,
    provider: Arc<dyn SessionProvider>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let jobs = JobService::start(config, Arc::clone(&provider), shutdown.clone());
    let sync = config
        .sync
        .enabled
        .then(|| Arc::new(SyncScraper::new(config, provider)));

    let state = GatewayState::new(
        config.server.service_name.clone(),
        Arc::clone(&jobs),
        sync,
        shutdown.clone(),
    );
    let app = build_gateway_app(state);

    let listener =
        tokio::net::TcpListener::bind((config.server.bind.as_str(), config.server.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        sync_enabled = config.sync.enabled,
        version = env!("CARGO_PKG_VERSION"),
        "trawl listening"
    );

    let token = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await;

    shutdown.cancel();
    jobs.join().await;
    served?;
    info!("trawl stopped");
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let jobs = &state.gateway.jobs;
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "queues": {
            "page_source": jobs.queue_depth(ResourceType::PageSource),
            "screenshot": jobs.queue_depth(ResourceType::Screenshot),
        },
        "cached_results": jobs.cached_results(),
    }))
}
