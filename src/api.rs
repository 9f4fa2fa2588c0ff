//! Health & Status API endpoints
//!
//! - GET /health - Relay status, cursor and attempt counts (JSON)
//! - GET /healthz - Liveness probe
//! - GET /metrics - Prometheus metrics
//! - GET /attempts - Recent relay attempts, optionally filtered by status

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::eyre;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::AttemptStore;
use crate::metrics;
use crate::types::{AttemptStatus, RelayAttempt};

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 500;

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AttemptStore>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn AttemptStore>) -> Self {
        Self {
            store,
            started_at: Instant::now(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub last_processed_block: Option<u64>,
    pub attempts: BTreeMap<String, u64>,
}

/// Relay attempt as exposed over HTTP; amounts are decimal strings
#[derive(Debug, Serialize, Deserialize)]
pub struct AttemptInfo {
    pub transfer_nonce: u64,
    pub source_block_height: u64,
    pub source_block_hash: String,
    pub recipient: String,
    pub source_amount: String,
    pub dest_amount: Option<String>,
    pub status: String,
    pub dest_tx_hash: Option<String>,
    pub custody_nonce: Option<u64>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub updated_at: String,
}

impl From<RelayAttempt> for AttemptInfo {
    fn from(attempt: RelayAttempt) -> Self {
        Self {
            transfer_nonce: attempt.transfer_nonce,
            source_block_height: attempt.source_block_height,
            source_block_hash: attempt.source_block_hash,
            recipient: attempt.recipient,
            source_amount: attempt.source_amount.to_string(),
            dest_amount: attempt.dest_amount.map(|a| a.to_string()),
            status: attempt.status.to_string(),
            dest_tx_hash: attempt.dest_tx_hash,
            custody_nonce: attempt.custody_nonce,
            attempt_count: attempt.attempt_count,
            last_error: attempt.last_error,
            updated_at: attempt.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AttemptsQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// Health check endpoint handler. Reports "degraded" when the store is unreachable.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = state.started_at.elapsed().as_secs();
    let counts = state.store.count_by_status().await;
    let cursor = state.store.last_processed_block().await;

    match (counts, cursor) {
        (Ok(counts), Ok(cursor)) => {
            let mut attempts: BTreeMap<String, u64> = AttemptStatus::ALL
                .iter()
                .map(|s| (s.to_string(), 0))
                .collect();
            for (status, count) in counts {
                attempts.insert(status.to_string(), count);
            }
            Json(HealthResponse {
                status: "healthy".to_string(),
                uptime_seconds,
                last_processed_block: cursor,
                attempts,
            })
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Health check could not read the attempt store");
            Json(HealthResponse {
                status: "degraded".to_string(),
                uptime_seconds,
                last_processed_block: None,
                attempts: BTreeMap::new(),
            })
        }
    }
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    match metrics::gather_text() {
        Ok((content_type, body)) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

/// Recent attempts, newest first
async fn list_attempts(
    State(state): State<AppState>,
    Query(query): Query<AttemptsQuery>,
) -> Response {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => match raw.parse::<AttemptStatus>() {
            Ok(status) => Some(status),
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
        },
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    match state.store.list(status, limit).await {
        Ok(attempts) => {
            let attempts: Vec<AttemptInfo> = attempts.into_iter().map(AttemptInfo::from).collect();
            Json(attempts).into_response()
        }
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/metrics", get(prometheus_metrics))
        .route("/attempts", get(list_attempts))
        .with_state(state)
}

/// Start the HTTP server for health, metrics and attempt status
pub async fn start_server(
    bind_address: &str,
    state: AppState,
    shutdown: CancellationToken,
) -> eyre::Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}: {}", bind_address, e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);
    info!("  /health   - Relay status (JSON)");
    info!("  /metrics  - Prometheus metrics");
    info!("  /attempts - Recent relay attempts");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
