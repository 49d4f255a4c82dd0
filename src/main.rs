use anyhow::Result;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;

use gatecrab::config::{Config, StoreBackend, StoreConfig};
use gatecrab::core::{LimiterRegistry, RateLimitDecision, RequestContext, Scope};
use gatecrab::middleware::RateLimitLayer;
use gatecrab::store::{CounterStore, MemoryStore, RedisStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from environment variables and CLI arguments
    let config = Config::from_env_and_args()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("gatecrab={}", config.log_level).parse()?),
        )
        .init();

    let store = create_counter_store(&config.store).await?;
    let registry = Arc::new(build_registry(&config, store.clone())?);

    tracing::info!(
        "Gatecrab started with store backend: {:?}, fail policy: {}",
        config.store.backend,
        config.fail_policy
    );

    let state = Arc::new(AppState {
        registry: registry.clone(),
        store,
    });

    // The check endpoint itself is guarded by the api-scope limiter
    let api_limiter = registry
        .get(Scope::Api)
        .ok_or_else(|| anyhow::anyhow!("api scope missing from registry"))?;

    let app = Router::new()
        .route("/check", post(handle_check).layer(RateLimitLayer::new(api_limiter)))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("HTTP server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Create the counter store selected by configuration
///
/// The memory backend is valid for single-process deployments only; the
/// redis backend provides shared counters across instances.
async fn create_counter_store(config: &StoreConfig) -> Result<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Memory => {
            let store = MemoryStore::builder()
                .capacity(config.capacity)
                .cleanup_interval(config.cleanup_interval)
                .build();
            Ok(Arc::new(store))
        }
        StoreBackend::Redis => {
            // validate() guarantees the URL is present for this backend
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("redis backend requires a connection URL"))?;
            let store = RedisStore::connect(url, config.op_timeout).await?;
            tracing::info!("Connected to Redis counter store");
            Ok(Arc::new(store))
        }
    }
}

/// Build one limiter per scope from the configured limits
fn build_registry(config: &Config, store: Arc<dyn CounterStore>) -> Result<LimiterRegistry> {
    let mut builder = LimiterRegistry::builder(store, config.fail_policy);
    for scope in Scope::ALL {
        let limit = config.scopes.get(scope);
        builder = builder.scope(scope, limit.max_requests, limit.window);
    }
    Ok(builder.build()?)
}

struct AppState {
    registry: Arc<LimiterRegistry>,
    store: Arc<dyn CounterStore>,
}

/// Rate limit check request
///
/// The service-mode interface: callers that cannot run the middleware
/// in-process submit the caller identity here and enforce the decision
/// themselves.
#[derive(Debug, Deserialize)]
struct CheckRequest {
    /// Scope to check against
    scope: Scope,
    /// Caller IP, if known
    source_ip: Option<IpAddr>,
    /// Authenticated user id, if known
    user_id: Option<String>,
    /// Request path (used by path-keyed strategies)
    #[serde(default)]
    path: String,
    /// Request method
    #[serde(default)]
    method: String,
}

#[derive(Debug, serde::Serialize)]
struct HttpErrorResponse {
    error: String,
}

async fn handle_check(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<RateLimitDecision>, (StatusCode, Json<HttpErrorResponse>)> {
    let limiter = state.registry.get(req.scope).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(HttpErrorResponse {
                error: format!("unknown scope: {}", req.scope),
            }),
        )
    })?;

    let ctx = RequestContext {
        source_ip: req.source_ip,
        user_id: req.user_id,
        path: req.path,
        method: req.method,
    };

    Ok(Json(limiter.check(&ctx).await))
}

async fn handle_health(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "store unreachable")
        }
    }
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> String {
    state.registry.metrics().render_prometheus()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}
