//! JSON response envelope shared by every API endpoint.
//!
//! Successful responses carry `{"status": "ok", "data": ...}` and failures
//! carry `{"status": "error", "error": "..."}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use courier_core::CoreError;
use courier_delivery::{DispatchError, ErrorCategory};
use serde::Serialize;

/// Outcome marker of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    /// Request succeeded
    Ok,
    /// Request failed
    Error,
}

/// Response body wrapper.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    /// Whether the request succeeded
    pub status: EnvelopeStatus,
    /// Payload of a successful response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Description of a failed request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Message-only payload for lifecycle acknowledgements.
#[derive(Debug, Serialize)]
pub struct Acknowledgement {
    /// Human-readable outcome
    pub message: &'static str,
}

/// Builds a success response with `data`.
pub fn ok<T: Serialize>(status: StatusCode, data: T) -> Response {
    let body = Envelope { status: EnvelopeStatus::Ok, data: Some(data), error: None };
    (status, Json(body)).into_response()
}

/// Builds an error response with `message`.
pub fn error(status: StatusCode, message: impl Into<String>) -> Response {
    let body: Envelope<()> =
        Envelope { status: EnvelopeStatus::Error, data: None, error: Some(message.into()) };
    (status, Json(body)).into_response()
}

/// Maps a dispatch error to its HTTP status.
///
/// Lifecycle misuse is a conflict with the current scheduler state; every
/// other failure is reported as an internal error.
pub fn dispatch_status(err: &DispatchError) -> StatusCode {
    match ErrorCategory::from(err) {
        ErrorCategory::Lifecycle if !matches!(err, DispatchError::ShutdownTimeout { .. }) => {
            StatusCode::CONFLICT
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Builds the error response for a dispatch error.
pub fn from_dispatch_error(err: &DispatchError) -> Response {
    error(dispatch_status(err), err.to_string())
}

/// Builds the error response for a storage error.
pub fn from_core_error(err: &CoreError) -> Response {
    let status = match err {
        CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error(status, err.to_string())
}
