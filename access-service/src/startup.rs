//! Application startup and lifecycle management.
//!
//! Access aggregation is a library surface; the HTTP listener only serves
//! health, readiness and metrics.

use crate::catalog::AccessCatalog;
use crate::config::AccessConfig;
use crate::services::{
    AccessAggregator, AccessCache, HttpLegacySource, HttpModernSource, HttpPolicySubjectSource,
    KeyValueCache, RedisCache, ResourceRegistry, get_metrics,
};
use axum::{
    Json, Router, extract::State, http::StatusCode, middleware, response::IntoResponse,
    routing::get,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// State for health check endpoints.
#[derive(Clone)]
pub struct HealthState {
    cache: Arc<dyn KeyValueCache>,
    registry: Arc<ResourceRegistry>,
}

impl HealthState {
    pub fn new(cache: Arc<dyn KeyValueCache>, registry: Arc<ResourceRegistry>) -> Self {
        Self { cache, registry }
    }
}

/// Liveness: the process is up and the cache answers.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.cache.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "access-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - cache unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "access-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness: the resource registry has completed a full load.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    if state.registry.is_ready() {
        StatusCode::OK
    } else {
        tracing::debug!("Readiness check failed - resource registry still loading");
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

pub fn build_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .route_layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    health_state: HealthState,
    aggregator: AccessAggregator,
    registry: Arc<ResourceRegistry>,
    registry_task: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl Application {
    /// Wire the cache, upstream clients and registry, start the registry
    /// refresh loop and bind the HTTP listener.
    pub async fn build(config: AccessConfig) -> Result<Self, AppError> {
        let cache: Arc<dyn KeyValueCache> = Arc::new(
            RedisCache::connect(&config.redis.url)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to Redis");
                    AppError::InternalError(anyhow::anyhow!("Redis connection error: {}", e))
                })?,
        );

        let catalog = Arc::new(AccessCatalog::builtin());

        let policy_source = HttpPolicySubjectSource::new(&config.registry).map_err(upstream_error)?;
        let registry = Arc::new(ResourceRegistry::new(
            catalog.clone(),
            Arc::new(policy_source),
            cache.clone(),
        ));

        let legacy = HttpLegacySource::new(config.legacy.clone(), catalog.legacy_services().to_vec())
            .map_err(upstream_error)?;
        let modern = HttpModernSource::new(config.modern.clone()).map_err(upstream_error)?;

        let aggregator = AccessAggregator::new(
            Arc::new(legacy),
            Arc::new(modern),
            registry.clone(),
            AccessCache::new(cache.clone()),
        );

        let shutdown = CancellationToken::new();
        let registry_task = registry.spawn(shutdown.clone());

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(
            http_port = http_port,
            tracked_resources = catalog.resource_ids().count(),
            legacy_services = catalog.legacy_services().len(),
            "Access service listener bound"
        );

        Ok(Self {
            http_port,
            http_listener,
            health_state: HealthState::new(cache, registry.clone()),
            aggregator,
            registry,
            registry_task,
            shutdown,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn aggregator(&self) -> &AccessAggregator {
        &self.aggregator
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Cancelling this token stops the HTTP server and the registry loop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until the shutdown token is cancelled, then wait for the
    /// registry loop to exit.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.health_state);
        let shutdown = self.shutdown.clone();

        tracing::info!(
            service = "access-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        let served = axum::serve(self.http_listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        self.shutdown.cancel();
        if let Err(e) = self.registry_task.await {
            tracing::warn!(error = %e, "Resource registry task ended abnormally");
        }

        served.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

fn upstream_error(e: crate::services::SourceError) -> AppError {
    tracing::error!(error = %e, "Failed to build upstream client");
    AppError::InternalError(anyhow::anyhow!("Upstream client error: {}", e))
}
