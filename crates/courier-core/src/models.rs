//! Message model, strongly-typed identifier, and status state machine.
//!
//! A message moves through a small lifecycle:
//!
//! ```text
//! queued -> processing -> sent
//!    ^          |
//!    └──────────┤        (failure, retries remain)
//!               └-> failed (failure, retries exhausted)
//! ```
//!
//! Only the claim operation moves `queued -> processing`, and only the
//! post-attempt update moves a `processing` message anywhere else.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed message identifier.
///
/// Assigned once at creation and never reused.
///
/// # Example
///
/// ```
/// use courier_core::models::MessageId;
/// let id = MessageId::new();
/// println!("dispatching message {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for MessageId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for MessageId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for MessageId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Message lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting to be claimed by a scheduler pass.
    Queued,

    /// Claimed by a pass and currently being delivered.
    ///
    /// A processing message is invisible to other claims.
    Processing,

    /// Delivered; the provider returned an identifier. Terminal.
    Sent,

    /// Every allowed attempt failed. Terminal.
    Failed,
}

impl MessageStatus {
    /// Database and wire representation of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Returns true for statuses with no further automatic transition.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    /// Returns whether moving from `self` to `next` is a legal transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Processing, Self::Sent)
                | (Self::Processing, Self::Queued)
                | (Self::Processing, Self::Failed)
        )
    }

    /// Status a processing message takes after a failed delivery attempt.
    ///
    /// `retry_count` is the count before this attempt is recorded. The
    /// message fails permanently once the incremented count reaches
    /// `max_retries`.
    pub fn after_failed_attempt(retry_count: i32, max_retries: u32) -> Self {
        if i64::from(retry_count) + 1 >= i64::from(max_retries) {
            Self::Failed
        } else {
            Self::Queued
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid message status: {s}")),
        }
    }
}

impl sqlx::Type<PgDb> for MessageStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for MessageStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

impl sqlx::Encode<'_, PgDb> for MessageStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Outbound message awaiting or having completed delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: MessageId,

    /// Destination address handed to the provider.
    pub to_phone: String,

    /// Message body handed to the provider.
    pub content: String,

    /// Current lifecycle status.
    pub status: MessageStatus,

    /// Number of failed delivery attempts so far.
    ///
    /// Never decreases. Incremented by exactly one per failed attempt.
    pub retry_count: i32,

    /// Identifier assigned by the provider. Present iff status is `sent`.
    pub provider_message_id: Option<String>,

    /// Description of the most recent failed attempt.
    pub last_error: Option<String>,

    /// When the message was enqueued.
    pub created_at: DateTime<Utc>,

    /// When the row last changed.
    pub updated_at: DateTime<Utc>,

    /// When the provider accepted the message. Present iff status is `sent`.
    pub sent_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Builds a freshly queued message.
    pub fn queued(
        to_phone: impl Into<String>,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            to_phone: to_phone.into(),
            content: content.into(),
            status: MessageStatus::Queued,
            retry_count: 0,
            provider_message_id: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }

    /// Checks the sent-iff-identified invariant.
    ///
    /// A message has a provider id and a sent timestamp exactly when it is
    /// `sent`, and the provider id is never empty.
    pub fn is_consistent(&self) -> bool {
        let identified = self.provider_message_id.as_deref().is_some_and(|id| !id.is_empty())
            && self.sent_at.is_some();
        let unidentified = self.provider_message_id.is_none() && self.sent_at.is_none();

        match self.status {
            MessageStatus::Sent => identified,
            _ => unidentified && self.retry_count >= 0,
        }
    }
}
