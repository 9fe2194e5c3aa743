//! Isolated PostgreSQL databases for integration tests.
//!
//! Each [`TestDatabase`] creates its own database next to the one named by
//! `DATABASE_URL`, bootstraps the schema, and drops it on cleanup. Tests
//! skip themselves when `DATABASE_URL` is unset.

use std::time::Duration;

use anyhow::{Context, Result};
use courier_core::storage::Storage;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Environment variable naming the server used for integration tests.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Test database owning a freshly created PostgreSQL database.
#[derive(Debug)]
pub struct TestDatabase {
    pool: PgPool,
    admin_pool: PgPool,
    database_name: String,
}

impl TestDatabase {
    /// Creates an isolated database, or returns `None` when
    /// `DATABASE_URL` is not set.
    ///
    /// # Errors
    ///
    /// Returns error if the server is unreachable or the database cannot be
    /// created.
    pub async fn from_env() -> Result<Option<Self>> {
        let Ok(database_url) = std::env::var(DATABASE_URL_ENV) else {
            eprintln!("{DATABASE_URL_ENV} not set, skipping database test");
            return Ok(None);
        };

        Self::create(&database_url).await.map(Some)
    }

    async fn create(database_url: &str) -> Result<Self> {
        let base = database_url
            .parse::<PgConnectOptions>()
            .with_context(|| format!("failed to parse {DATABASE_URL_ENV}"))?;

        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(base.clone())
            .await
            .context("failed to connect to admin database")?;

        let database_name = format!("courier_test_{}", Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE DATABASE \"{database_name}\""))
            .execute(&admin_pool)
            .await
            .with_context(|| format!("failed to create database {database_name}"))?;

        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(base.database(&database_name))
            .await
            .with_context(|| format!("failed to connect to database {database_name}"))?;

        courier_core::storage::schema::ensure_schema(&pool)
            .await
            .context("failed to create schema")?;

        debug!(database = %database_name, "created test database");
        Ok(Self { pool, admin_pool, database_name })
    }

    /// Access to the database pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Builds a storage layer on this database.
    pub fn storage(&self) -> Storage {
        Storage::new(self.pool.clone())
    }

    /// Name of the created database.
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Closes connections and drops the database.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be dropped.
    pub async fn cleanup(self) -> Result<()> {
        self.pool.close().await;

        if sqlx::query(&format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", self.database_name))
            .execute(&self.admin_pool)
            .await
            .is_err()
        {
            warn!(database = %self.database_name, "forced drop failed, retrying plain drop");
            sqlx::query(&format!("DROP DATABASE IF EXISTS \"{}\"", self.database_name))
                .execute(&self.admin_pool)
                .await
                .with_context(|| format!("failed to drop database {}", self.database_name))?;
        }

        self.admin_pool.close().await;
        Ok(())
    }
}
