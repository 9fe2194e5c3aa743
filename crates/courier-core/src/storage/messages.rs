//! Repository for message database operations.
//!
//! Implements lock-skipping batch claims and the guarded post-attempt status
//! updates that make up the message state machine's persistent half.

use std::sync::Arc;

use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{CoreError, Result},
    models::{Message, MessageId, MessageStatus},
};

const MESSAGE_COLUMNS: &str = "id, to_phone, content, status, retry_count, provider_message_id, \
                               last_error, created_at, updated_at, sent_at";

/// Repository for message database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Claims up to `limit` queued messages for delivery.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent callers never block on,
    /// or return, the same rows. Selection and the status update run in one
    /// transaction; any failure rolls the whole claim back. The returned
    /// batch is ordered oldest-first.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the transaction fails.
    pub async fn claim_next_batch(&self, limit: usize) -> Result<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r"
            SELECT id FROM messages
            WHERE status = 'queued'
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let mut messages = claim_rows(&mut tx, &ids).await?;
        tx.commit().await?;

        // RETURNING carries no ordering guarantee.
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        debug!(claimed = messages.len(), limit, "claimed message batch");
        Ok(messages)
    }

    /// Marks a processing message as sent.
    ///
    /// Records the provider identifier and the send time. Only a message in
    /// `processing` can move to `sent`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` for an empty provider id,
    /// `CoreError::InvalidTransition`/`NotFound` when the row is not
    /// processing, or `CoreError::Database` when the update fails.
    pub async fn mark_sent(&self, id: MessageId, provider_message_id: &str) -> Result<()> {
        if provider_message_id.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "empty provider message id for message {id}"
            )));
        }

        let result = sqlx::query(
            r"
            UPDATE messages
            SET status = 'sent',
                provider_message_id = $2,
                sent_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            ",
        )
        .bind(id)
        .bind(provider_message_id)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, MessageStatus::Sent).await);
        }

        Ok(())
    }

    /// Records a failed attempt against a processing message.
    ///
    /// Increments the retry count and stores `cause` as the last error. The
    /// message returns to `queued` while `retry_count + 1 < max_retries` and
    /// becomes `failed` otherwise. Returns the status the message moved to.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition`/`NotFound` when the row is not
    /// processing, or `CoreError::Database` when the update fails.
    pub async fn mark_failed(
        &self,
        id: MessageId,
        cause: &str,
        max_retries: u32,
    ) -> Result<MessageStatus> {
        let status: Option<MessageStatus> = sqlx::query_scalar(
            r"
            UPDATE messages
            SET status = CASE WHEN retry_count + 1 >= $2 THEN 'failed' ELSE 'queued' END,
                retry_count = retry_count + 1,
                last_error = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING status
            ",
        )
        .bind(id)
        .bind(i64::from(max_retries))
        .bind(cause)
        .fetch_optional(&*self.pool)
        .await?;

        match status {
            Some(status) => Ok(status),
            None => Err(self.transition_error(id, MessageStatus::Failed).await),
        }
    }

    /// Inserts a new queued message.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn create(&self, to_phone: &str, content: &str) -> Result<Message> {
        let message = sqlx::query_as::<_, Message>(&format!(
            "INSERT INTO messages (to_phone, content) VALUES ($1, $2) RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(to_phone)
        .bind(content)
        .fetch_one(&*self.pool)
        .await?;

        Ok(message)
    }

    /// Lists sent messages, most recently sent first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list_sent(&self, limit: usize, offset: usize) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE status = 'sent' \
             ORDER BY sent_at DESC, id ASC LIMIT $1 OFFSET $2"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await?;

        Ok(messages)
    }

    /// Finds a message by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(message)
    }

    async fn transition_error(&self, id: MessageId, target: MessageStatus) -> CoreError {
        match self.find_by_id(id).await {
            Ok(Some(message)) => CoreError::InvalidTransition(format!(
                "message {id} is {} and cannot become {target}",
                message.status
            )),
            Ok(None) => CoreError::NotFound(format!("message {id} not found")),
            Err(error) => error,
        }
    }
}

async fn claim_rows(tx: &mut Transaction<'_, Postgres>, ids: &[Uuid]) -> Result<Vec<Message>> {
    let messages = sqlx::query_as::<_, Message>(&format!(
        "UPDATE messages SET status = 'processing', updated_at = NOW() \
         WHERE id = ANY($1) RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(ids)
    .fetch_all(&mut **tx)
    .await?;

    Ok(messages)
}
