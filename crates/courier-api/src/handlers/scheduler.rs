//! Scheduler lifecycle handlers.
//!
//! Start and stop answer 409 when the scheduler is already in the requested
//! state. Misuse is logged at debug level only.

use axum::{extract::State, http::StatusCode, response::Response};
use courier_delivery::SchedulerStats;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::{
    response::{self, Acknowledgement},
    AppState,
};

/// Current scheduler state and counters.
#[derive(Debug, Serialize)]
pub struct SchedulerStatus {
    /// Whether a dispatch loop is running
    pub running: bool,
    /// Identifier of the active run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<u64>,
    /// Counters accumulated since process start
    pub stats: SchedulerStats,
}

/// `POST /api/v1/scheduler/start`
#[instrument(name = "start_scheduler", skip(state))]
pub async fn start_scheduler(State(state): State<AppState>) -> Response {
    match state.scheduler.start() {
        Ok(()) => {
            info!(run_id = ?state.scheduler.current_run_id(), "Scheduler started");
            response::ok(StatusCode::OK, Acknowledgement { message: "scheduler started" })
        },
        Err(e) => {
            debug!(error = %e, "Scheduler start rejected");
            response::from_dispatch_error(&e)
        },
    }
}

/// `POST /api/v1/scheduler/stop`
///
/// Returns once the loop is signalled; an in-flight pass finishes in the
/// background.
#[instrument(name = "stop_scheduler", skip(state))]
pub async fn stop_scheduler(State(state): State<AppState>) -> Response {
    match state.scheduler.stop() {
        Ok(()) => {
            info!("Scheduler stopped");
            response::ok(StatusCode::OK, Acknowledgement { message: "scheduler stopped" })
        },
        Err(e) => {
            debug!(error = %e, "Scheduler stop rejected");
            response::from_dispatch_error(&e)
        },
    }
}

/// `GET /api/v1/scheduler/status`
#[instrument(name = "scheduler_status", skip(state))]
pub async fn scheduler_status(State(state): State<AppState>) -> Response {
    let status = SchedulerStatus {
        running: state.scheduler.is_running(),
        run_id: state.scheduler.current_run_id(),
        stats: state.scheduler.stats().await,
    };

    response::ok(StatusCode::OK, status)
}
