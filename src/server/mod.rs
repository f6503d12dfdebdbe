//! HTTP server for the aggregation engine
//!
//! # Routes
//!
//! - `POST /aggregate` - Run an aggregation (body: AggregationRequest).
//!   With `?ttl=<seconds>` or `?cached=true` the cached path is used.
//! - `POST /select` - Pick the best single view (body: `{"result": ..., "preferredModule": ...}`)
//! - `GET /modules` - List registered modules, priorities and addresses
//! - `GET /health` - Liveness probe
//! - `GET /metrics` - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use ctxmesh::aggregator::AggregationEngine;
//! use ctxmesh::server::MeshServer;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = AggregationEngine::builder().build().expect("Failed to build engine");
//!     MeshServer::new(Arc::new(engine))
//!         .run("127.0.0.1:8090")
//!         .await
//!         .expect("Server failed");
//! }
//! ```

use crate::aggregator::AggregationEngine;
use crate::context::{AggregatedResult, AggregationRequest};
use crate::selector::{select_by_priority, Selection};
use crate::{metrics, MeshError};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ctxmesh_registry::{ModuleId, ModulePriority};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Error body returned by the API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// API error wrapper mapping engine errors to status codes
#[derive(Debug)]
pub struct ApiError(MeshError);

impl From<MeshError> for ApiError {
    fn from(e: MeshError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_rejected_request() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Query parameters of `POST /aggregate`
#[derive(Debug, Default, Deserialize)]
pub struct AggregateParams {
    /// Serve through the cache with this TTL
    pub ttl: Option<u64>,
    /// Serve through the cache with the engine's default TTL
    #[serde(default)]
    pub cached: bool,
}

/// Body of `POST /select`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectRequest {
    pub result: AggregatedResult,
    #[serde(default)]
    pub preferred_module: Option<ModuleId>,
}

/// One row of `GET /modules`
#[derive(Debug, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub priority: ModulePriority,
    pub url: String,
}

/// HTTP front end for an [`AggregationEngine`]
#[derive(Clone)]
pub struct MeshServer {
    engine: Arc<AggregationEngine>,
}

impl MeshServer {
    pub fn new(engine: Arc<AggregationEngine>) -> Self {
        Self { engine }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/aggregate", post(aggregate))
            .route("/select", post(select))
            .route("/modules", get(modules))
            .route("/health", get(health))
            .route("/metrics", get(prometheus_metrics))
            .with_state(Arc::clone(&self.engine))
    }

    /// Bind and serve until the process is stopped
    pub async fn run(self, addr: &str) -> crate::Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MeshError::Server(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!(addr = %addr, "ctxmesh server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| MeshError::Server(e.to_string()))
    }
}

async fn aggregate(
    State(engine): State<Arc<AggregationEngine>>,
    Query(params): Query<AggregateParams>,
    Json(body): Json<Value>,
) -> Result<Json<AggregatedResult>, ApiError> {
    // Parsed here so unknown modules come back as 400 with a message
    let request: AggregationRequest = serde_json::from_value(body)
        .map_err(|e| MeshError::InvalidRequest(e.to_string()))?;

    let result = match (params.ttl, params.cached) {
        (Some(ttl), _) => {
            engine
                .aggregate_cached(&request, Duration::from_secs(ttl))
                .await?
        }
        (None, true) => {
            engine
                .aggregate_cached(&request, engine.default_ttl())
                .await?
        }
        (None, false) => engine.aggregate(&request).await?,
    };

    Ok(Json(result))
}

async fn select(Json(body): Json<Value>) -> Result<Json<Selection>, ApiError> {
    let request: SelectRequest = serde_json::from_value(body)
        .map_err(|e| MeshError::InvalidRequest(e.to_string()))?;

    Ok(Json(select_by_priority(
        &request.result,
        request.preferred_module,
    )))
}

async fn modules(State(engine): State<Arc<AggregationEngine>>) -> Json<Vec<ModuleInfo>> {
    let modules = engine
        .registry()
        .endpoints()
        .iter()
        .map(|endpoint| ModuleInfo {
            id: endpoint.id,
            priority: endpoint.priority(),
            url: endpoint.url.clone(),
        })
        .collect();

    Json(modules)
}

async fn health() -> &'static str {
    "ok"
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::encode_metrics(),
    )
}
