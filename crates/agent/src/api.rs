//! HTTP API for health checks, Prometheus metrics and engine control

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use perf_lib::{
    collector::{AggregationType, ExportDocument},
    health::{ComponentStatus, HealthRegistry},
    manager::PerformanceManager,
    observability::EngineMetrics,
    optimizer::OptimizerStatistics,
    OptimizationResult, OptimizationStrategy, PerfError, PerformanceMetrics, PerformanceModule,
    PerformanceReport,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_AGGREGATE_WINDOW_SECS: i64 = 3600;
const DEFAULT_EXPORT_WINDOW_SECS: i64 = 86_400;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub module: Arc<PerformanceModule>,
    pub health_registry: HealthRegistry,
    pub metrics: EngineMetrics,
}

impl AppState {
    pub fn new(module: Arc<PerformanceModule>, health_registry: HealthRegistry) -> Self {
        Self {
            module,
            health_registry,
            metrics: EngineMetrics::new(),
        }
    }

    fn manager(&self) -> Result<Arc<PerformanceManager>, ApiError> {
        self.module.manager().ok_or_else(|| {
            ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "engine not initialized")
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<PerfError> for ApiError {
    fn from(e: PerfError) -> Self {
        let status = match &e {
            PerfError::NotFound(_) => StatusCode::NOT_FOUND,
            PerfError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            PerfError::InvalidState { .. } | PerfError::DuplicateName(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.module.update_health(&state.health_registry).await;
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.module.update_health(&state.health_registry).await;
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string().into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

async fn report(State(state): State<Arc<AppState>>) -> Result<Json<PerformanceReport>, ApiError> {
    Ok(Json(state.manager()?.generate_performance_report()))
}

async fn latest_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PerformanceMetrics>, ApiError> {
    state
        .manager()?
        .current_metrics()
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "no metrics collected yet"))
}

#[derive(Debug, Deserialize)]
pub struct AggregateQuery {
    pub window_secs: Option<i64>,
    pub aggregation: Option<String>,
}

async fn aggregate_metrics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AggregateQuery>,
) -> Result<Json<PerformanceMetrics>, ApiError> {
    let kind = match query.aggregation.as_deref() {
        Some(name) => name
            .parse::<AggregationType>()
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e))?,
        None => AggregationType::Average,
    };
    let window = window(query.window_secs, DEFAULT_AGGREGATE_WINDOW_SECS)?;

    let to = Utc::now();
    state
        .manager()?
        .collector()
        .get_aggregated_metrics(to - window, to, kind)
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "no metrics in window"))
}

async fn list_optimizers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<OptimizerStatistics>>, ApiError> {
    let optimizers = state
        .manager()?
        .optimizers()
        .iter()
        .map(|o| o.statistics())
        .collect();
    Ok(Json(optimizers))
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct OptimizeRequest {
    #[serde(default)]
    pub strategy: OptimizationStrategy,
}

async fn optimize(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<OptimizeRequest>,
) -> Result<Json<OptimizationResult>, ApiError> {
    info!(optimizer = %name, strategy = %request.strategy, "Optimization requested via API");
    let result = state
        .manager()?
        .optimize_now(&name, request.strategy)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub window_secs: Option<i64>,
}

async fn export(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<ExportDocument>, ApiError> {
    let window = window(query.window_secs, DEFAULT_EXPORT_WINDOW_SECS)?;
    let to = Utc::now();
    Ok(Json(
        state.manager()?.collector().export_document(to - window, to),
    ))
}

fn window(secs: Option<i64>, default: i64) -> Result<ChronoDuration, ApiError> {
    let secs = secs.unwrap_or(default);
    if secs <= 0 {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("window_secs must be positive, got {}", secs),
        ));
    }
    Ok(ChronoDuration::seconds(secs))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/report", get(report))
        .route("/api/v1/metrics/latest", get(latest_metrics))
        .route("/api/v1/metrics/aggregate", get(aggregate_metrics))
        .route("/api/v1/optimizers", get(list_optimizers))
        .route("/api/v1/optimizers/:name/optimize", post(optimize))
        .route("/api/v1/export", get(export))
        .with_state(state)
}

/// Start the API server, stopping when `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
