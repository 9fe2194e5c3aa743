//! Scheduled message dispatch with at-least-once delivery.
//!
//! This crate drives queued messages to an external delivery provider on a
//! fixed cadence and tracks every attempt through the message state machine.
//!
//! # Architecture
//!
//! A single [`Scheduler`] loop claims batches from the [`MessageStore`]
//! using `FOR UPDATE SKIP LOCKED`, then hands each message to the
//! [`Dispatcher`]:
//!
//! 1. **Claim** - queued messages move to `processing`
//! 2. **Send** - one provider attempt, no internal retry
//! 3. **Record** - `sent`, or back to `queued`, or `failed` at the retry
//!    ceiling
//! 4. **Cache** - best-effort `{messageId, sent_at}` write after a send
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use courier_delivery::{
//!     ClientConfig, Dispatcher, DispatcherConfig, DispatchError, PostgresMessageStore,
//!     Scheduler, SchedulerConfig, WebhookClient,
//! };
//!
//! # async fn example(storage: Arc<courier_core::storage::Storage>) -> Result<(), DispatchError> {
//! let store = Arc::new(PostgresMessageStore::new(storage));
//! let provider = Arc::new(WebhookClient::new(ClientConfig {
//!     url: "https://provider.example/send".to_string(),
//!     ..ClientConfig::default()
//! })?);
//! let dispatcher =
//!     Arc::new(Dispatcher::new(store.clone(), provider, DispatcherConfig::default()));
//! let scheduler = Scheduler::new(store, dispatcher, SchedulerConfig::default())?;
//!
//! scheduler.start()?;
//! // ...
//! scheduler.shutdown(Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod client;
pub mod error;
pub mod scheduler;
pub mod sender;
pub mod storage;

pub use cache::{CacheConfig, MetadataCache, RedisMetadataCache, SentMeta};
pub use client::{ClientConfig, DeliveryProvider, WebhookClient};
pub use error::{DispatchError, ErrorCategory, Result};
pub use scheduler::{PassSummary, Scheduler, SchedulerConfig, SchedulerStats};
pub use sender::{Dispatcher, DispatcherConfig};
pub use storage::{MessageStore, PostgresMessageStore};

/// Default number of messages claimed per pass.
pub const DEFAULT_BATCH_SIZE: usize = 2;

/// Default seconds between passes.
pub const DEFAULT_TICK_INTERVAL_SECONDS: u64 = 120;

/// Default attempts per message before it is marked failed.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default provider request timeout in seconds.
pub const DEFAULT_WEBHOOK_TIMEOUT_SECONDS: u64 = 5;

/// Default lifetime of cached post-send metadata (seven days).
pub const DEFAULT_SENT_META_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
