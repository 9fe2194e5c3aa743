//! Health check handler for service monitoring.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Store connectivity
    pub database: ComponentStatus,
    /// Error reported by the store check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Whether the dispatch loop is running
    pub scheduler_running: bool,
    /// Service version information
    pub version: &'static str,
}

/// Overall health status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Store reachable
    Healthy,
    /// Store unreachable
    Unhealthy,
}

/// Component-level health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy
    Up,
    /// Component is experiencing issues
    Down,
}

/// Health check endpoint handler.
///
/// Runs the store's lightweight check and reports the scheduler flag. A
/// stopped scheduler is not a health failure.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let check = state.store.health_check().await;
    let scheduler_running = state.scheduler.is_running();

    let (status, database, message) = match check {
        Ok(()) => (HealthStatus::Healthy, ComponentStatus::Up, None),
        Err(e) => {
            error!(error = %e, "Database health check failed");
            (
                HealthStatus::Unhealthy,
                ComponentStatus::Down,
                Some(format!("Database connection failed: {e}")),
            )
        },
    };

    debug!(status = ?status, scheduler_running, "Health check completed");

    let code = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    let body = HealthResponse {
        status,
        timestamp: Utc::now(),
        database,
        message,
        scheduler_running,
        version: env!("CARGO_PKG_VERSION"),
    };

    (code, Json(body)).into_response()
}
