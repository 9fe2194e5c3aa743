//! Database access layer for message persistence.
//!
//! All SQL lives in this module. The delivery engine reaches it through the
//! `MessageStore` trait in `courier-delivery`, never directly.

use std::sync::Arc;

use sqlx::PgPool;

pub mod messages;
pub mod schema;

use crate::error::Result;

/// Container for repository instances sharing one connection pool.
#[derive(Clone)]
pub struct Storage {
    /// Repository for message operations.
    pub messages: Arc<messages::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self { messages: Arc::new(messages::Repository::new(pool)) }
    }

    /// Creates the schema if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if any DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        schema::ensure_schema(&self.messages.pool()).await
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.messages.pool()).await?;

        Ok(())
    }
}
