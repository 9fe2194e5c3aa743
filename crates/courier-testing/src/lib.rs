//! Test infrastructure for the courier workspace.
//!
//! Provides message fixtures, in-process provider and cache doubles, a
//! wiremock-backed webhook provider, and isolated PostgreSQL databases for
//! integration tests that opt in through `DATABASE_URL`.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::sync::Arc;

pub mod database;
pub mod fixtures;
pub mod http;
pub mod provider;

pub use database::TestDatabase;
pub use fixtures::{epoch, ids, queued_messages, MessageBuilder};
pub use http::ProviderServer;
pub use provider::{ProviderOutcome, RecordingCache, ScriptedProvider};

use courier_delivery::{
    storage::mock::MockMessageStore, Dispatcher, DispatcherConfig, Scheduler, SchedulerConfig,
};

/// In-memory dispatch stack wired from test doubles.
pub struct TestStack {
    /// Message store.
    pub store: Arc<MockMessageStore>,
    /// Scripted provider.
    pub provider: Arc<ScriptedProvider>,
    /// Recording cache.
    pub cache: Arc<RecordingCache>,
    /// Dispatcher over the doubles.
    pub dispatcher: Arc<Dispatcher>,
    /// Scheduler over the doubles.
    pub scheduler: Arc<Scheduler>,
}

impl TestStack {
    /// Builds a stack with the given batch size and retry ceiling.
    ///
    /// The tick interval is long enough that only the immediate first pass
    /// of a run fires during a test.
    ///
    /// # Errors
    ///
    /// Returns error if the scheduler configuration is invalid.
    pub fn new(batch_size: usize, max_retries: u32) -> anyhow::Result<Self> {
        let store = Arc::new(MockMessageStore::new());
        let provider = Arc::new(ScriptedProvider::new());
        let cache = Arc::new(RecordingCache::new());

        let dispatcher = Arc::new(
            Dispatcher::new(store.clone(), provider.clone(), DispatcherConfig { max_retries })
                .with_cache(cache.clone()),
        );
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            dispatcher.clone(),
            SchedulerConfig {
                batch_size,
                tick_interval: std::time::Duration::from_secs(3_600),
            },
        )?);

        Ok(Self { store, provider, cache, dispatcher, scheduler })
    }

    /// Adds messages to the store.
    pub async fn enqueue(&self, messages: &[courier_core::Message]) {
        for message in messages {
            self.store.add_message(message.clone()).await;
        }
    }
}
