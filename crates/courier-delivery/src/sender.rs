//! Single-message delivery attempt.
//!
//! The dispatcher makes exactly one provider call per message, writes the
//! outcome back to the store exactly once, and on success records post-send
//! metadata in the cache when one is configured.

use std::sync::Arc;

use courier_core::{
    time::{Clock, RealClock},
    Message, MessageStatus,
};
use tracing::{debug, error, info, warn};

use crate::{
    cache::{MetadataCache, SentMeta},
    client::DeliveryProvider,
    error::{DispatchError, Result},
    storage::MessageStore,
};

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Attempts allowed per message before it is marked failed.
    pub max_retries: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { max_retries: crate::DEFAULT_MAX_RETRIES }
    }
}

/// Delivers one claimed message and records the result.
pub struct Dispatcher {
    store: Arc<dyn MessageStore>,
    provider: Arc<dyn DeliveryProvider>,
    cache: Option<Arc<dyn MetadataCache>>,
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Creates a dispatcher without a metadata cache.
    pub fn new(
        store: Arc<dyn MessageStore>,
        provider: Arc<dyn DeliveryProvider>,
        config: DispatcherConfig,
    ) -> Self {
        Self { store, provider, cache: None, config, clock: Arc::new(RealClock::new()) }
    }

    /// Adds a best-effort metadata cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn MetadataCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replaces the clock used to stamp cache metadata.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the configured retry ceiling.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Attempts delivery of a processing message.
    ///
    /// Returns the provider message id when the provider accepted the message
    /// and the store recorded it.
    ///
    /// # Errors
    ///
    /// - `DeliveryRejected`/`DeliveryUnreachable` when the provider failed and
    ///   the failure was recorded
    /// - `FailureNotRecorded` when the provider failed and recording failed too
    /// - `SendReconciliation` when the provider accepted the message but the
    ///   store did not record it
    pub async fn send(&self, message: &Message) -> Result<String> {
        debug!(message_id = %message.id, retry_count = message.retry_count, "dispatching message");

        let provider_message_id = match self.provider.send(message).await {
            Ok(id) => id,
            Err(delivery_error) => return Err(self.record_failure(message, delivery_error).await),
        };

        if let Err(store_error) =
            self.store.mark_sent(message.id, provider_message_id.clone()).await
        {
            let error = DispatchError::reconciliation(
                message.id,
                provider_message_id,
                store_error.to_string(),
            );
            error!(message_id = %message.id, error = %error, "sent message could not be recorded");
            return Err(error);
        }

        info!(
            message_id = %message.id,
            provider_message_id = %provider_message_id,
            "message sent"
        );

        self.write_metadata(message, &provider_message_id).await;

        Ok(provider_message_id)
    }

    async fn record_failure(
        &self,
        message: &Message,
        delivery_error: DispatchError,
    ) -> DispatchError {
        let cause = delivery_error.to_string();

        match self.store.mark_failed(message.id, cause, self.config.max_retries).await {
            Ok(MessageStatus::Failed) => {
                error!(
                    message_id = %message.id,
                    attempts = message.retry_count.saturating_add(1),
                    error = %delivery_error,
                    "delivery retries exhausted, message failed"
                );
                delivery_error
            },
            Ok(status) => {
                warn!(
                    message_id = %message.id,
                    retry_count = message.retry_count.saturating_add(1),
                    next_status = %status,
                    error = %delivery_error,
                    "delivery attempt failed"
                );
                delivery_error
            },
            Err(store_error) => {
                let error =
                    DispatchError::failure_not_recorded(delivery_error, store_error.to_string());
                error!(
                    message_id = %message.id,
                    error = %error,
                    "failed delivery could not be recorded"
                );
                error
            },
        }
    }

    async fn write_metadata(&self, message: &Message, provider_message_id: &str) {
        let Some(cache) = &self.cache else {
            return;
        };

        let meta = SentMeta::new(provider_message_id, self.clock.now_utc());
        if let Err(e) = cache.set_sent_meta(message.id, &meta).await {
            warn!(message_id = %message.id, error = %e, "failed to cache sent metadata");
        }
    }
}
