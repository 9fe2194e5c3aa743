//! Message creation and sent-message listing.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use courier_core::{Message, MessageId};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::{response, AppState};

/// Page size used when `limit` is absent or unusable.
pub const DEFAULT_LIMIT: usize = 50;

/// Largest page the listing returns.
pub const MAX_LIMIT: usize = 500;

/// Request body for enqueueing a message.
#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    /// Destination address
    #[serde(default)]
    pub to: String,
    /// Message body
    #[serde(default)]
    pub content: String,
}

/// Raw pagination parameters.
///
/// Kept as strings so malformed values fall back to defaults instead of
/// rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct SentQuery {
    /// Requested page size
    pub limit: Option<String>,
    /// Rows to skip
    pub offset: Option<String>,
}

impl SentQuery {
    /// Page size: positive values capped at [`MAX_LIMIT`], otherwise
    /// [`DEFAULT_LIMIT`].
    pub fn limit(&self) -> usize {
        self.limit
            .as_deref()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .map_or(DEFAULT_LIMIT, |n| n.min(MAX_LIMIT))
    }

    /// Rows to skip: non-negative values, otherwise zero.
    pub fn offset(&self) -> usize {
        self.offset.as_deref().and_then(|v| v.trim().parse::<usize>().ok()).unwrap_or(0)
    }
}

/// One sent message in the listing.
#[derive(Debug, Serialize)]
pub struct SentItem {
    /// Message identifier
    pub id: MessageId,
    /// Destination address
    pub to_phone: String,
    /// Message body
    pub content: String,
    /// Identifier assigned by the provider
    pub provider_message_id: Option<String>,
    /// When the provider accepted the message
    pub sent_at: Option<DateTime<Utc>>,
}

impl From<Message> for SentItem {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            to_phone: message.to_phone,
            content: message.content,
            provider_message_id: message.provider_message_id,
            sent_at: message.sent_at,
        }
    }
}

/// Page of sent messages.
#[derive(Debug, Serialize)]
pub struct SentPage {
    /// Messages on this page, most recently sent first
    pub items: Vec<SentItem>,
    /// Number of items on this page
    pub count: usize,
}

/// `POST /api/v1/messages`
///
/// # Errors
///
/// - 400: malformed body, blank `to` or `content`, or `content` longer than
///   the configured character limit
/// - 500: store failure
#[instrument(name = "create_message", skip(state, body))]
pub async fn create_message(
    State(state): State<AppState>,
    body: Result<Json<CreateMessageRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(request) => request,
        Err(rejection) => {
            debug!(error = %rejection, "Rejected malformed message body");
            return response::error(StatusCode::BAD_REQUEST, rejection.body_text());
        },
    };

    if let Err(reason) = validate(&request, state.max_message_chars) {
        debug!(reason = %reason, "Rejected message");
        return response::error(StatusCode::BAD_REQUEST, reason);
    }

    match state.store.create(request.to.trim().to_string(), request.content).await {
        Ok(message) => {
            info!(message_id = %message.id, "Message queued");
            response::ok(StatusCode::CREATED, message)
        },
        Err(e) => {
            error!(error = %e, "Failed to create message");
            response::from_core_error(&e)
        },
    }
}

/// `GET /api/v1/messages/sent?limit&offset`
#[instrument(name = "list_sent", skip(state, query))]
pub async fn list_sent(
    State(state): State<AppState>,
    query: Result<Query<SentQuery>, QueryRejection>,
) -> Response {
    let query = query.map(|Query(q)| q).unwrap_or_default();
    let (limit, offset) = (query.limit(), query.offset());

    match state.store.list_sent(limit, offset).await {
        Ok(messages) => {
            let items: Vec<SentItem> = messages.into_iter().map(SentItem::from).collect();
            debug!(limit, offset, count = items.len(), "Listed sent messages");
            response::ok(StatusCode::OK, SentPage { count: items.len(), items })
        },
        Err(e) => {
            error!(error = %e, limit, offset, "Failed to list sent messages");
            response::from_core_error(&e)
        },
    }
}

fn validate(request: &CreateMessageRequest, max_chars: usize) -> Result<(), String> {
    if request.to.trim().is_empty() {
        return Err("to must not be empty".to_string());
    }
    if request.content.trim().is_empty() {
        return Err("content must not be empty".to_string());
    }
    let chars = request.content.chars().count();
    if chars > max_chars {
        return Err(format!("content is {chars} characters, limit is {max_chars}"));
    }
    Ok(())
}
