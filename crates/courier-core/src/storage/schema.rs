//! Idempotent schema bootstrap for the messages table.

use sqlx::PgPool;

use crate::error::Result;

const STATEMENTS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS messages (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        to_phone TEXT NOT NULL,
        content TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'queued'
            CHECK (status IN ('queued', 'processing', 'sent', 'failed')),
        retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
        provider_message_id TEXT,
        last_error TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        sent_at TIMESTAMPTZ,
        CONSTRAINT messages_sent_identified CHECK (
            (status = 'sent') = (provider_message_id IS NOT NULL AND sent_at IS NOT NULL)
        )
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_messages_claim
    ON messages(created_at, id)
    WHERE status = 'queued'
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_messages_sent
    ON messages(sent_at DESC)
    WHERE status = 'sent'
    ",
];

/// Creates the messages table and its indexes when missing.
///
/// # Errors
///
/// Returns `CoreError::Database` if a statement fails.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
