//! Message builders for test setup.

use chrono::{DateTime, Duration, TimeZone, Utc};
use courier_core::{Message, MessageId, MessageStatus};
use sqlx::PgPool;

/// Fixed instant used as the default creation time.
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default()
}

/// Builder for test messages.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    to_phone: String,
    content: String,
    status: MessageStatus,
    retry_count: i32,
    created_at: DateTime<Utc>,
}

impl MessageBuilder {
    /// Creates a queued message builder with sensible defaults.
    pub fn new() -> Self {
        Self {
            to_phone: "+15550001111".to_string(),
            content: "Your verification code is 123456".to_string(),
            status: MessageStatus::Queued,
            retry_count: 0,
            created_at: epoch(),
        }
    }

    /// Sets the destination address.
    #[must_use]
    pub fn to(mut self, to_phone: impl Into<String>) -> Self {
        self.to_phone = to_phone.into();
        self
    }

    /// Sets the message body.
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Sets the status. Only `queued`, `processing`, and `failed` are
    /// meaningful without a provider id.
    #[must_use]
    pub fn status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the number of failed attempts already made.
    #[must_use]
    pub fn retry_count(mut self, retry_count: i32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Places creation `seconds` after the fixture epoch.
    #[must_use]
    pub fn created_offset(mut self, seconds: i64) -> Self {
        self.created_at = epoch() + Duration::seconds(seconds);
        self
    }

    /// Builds the message in memory.
    pub fn build(self) -> Message {
        let mut message = Message::queued(self.to_phone, self.content, self.created_at);
        message.status = self.status;
        message.retry_count = self.retry_count;
        message
    }

    /// Inserts the message into the database and returns the stored row.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn insert(self, pool: &PgPool) -> anyhow::Result<Message> {
        let message = self.build();

        sqlx::query(
            r"
            INSERT INTO messages
                (id, to_phone, content, status, retry_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ",
        )
        .bind(message.id)
        .bind(&message.to_phone)
        .bind(&message.content)
        .bind(message.status)
        .bind(message.retry_count)
        .bind(message.created_at)
        .execute(pool)
        .await?;

        Ok(message)
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds `count` queued messages created one second apart, oldest first.
pub fn queued_messages(count: usize) -> Vec<Message> {
    (0..count)
        .map(|index| {
            MessageBuilder::new()
                .content(format!("message {index}"))
                .created_offset(i64::try_from(index).unwrap_or(i64::MAX))
                .build()
        })
        .collect()
}

/// Collects message ids preserving order.
pub fn ids(messages: &[Message]) -> Vec<MessageId> {
    messages.iter().map(|m| m.id).collect()
}
