//! Storage abstraction layer for the dispatch engine.
//!
//! Provides trait-based abstractions over message store operations so the
//! scheduler and dispatcher can be tested without a database. Production
//! uses the concrete `courier_core::storage::Storage`; tests use the
//! in-memory [`mock::MockMessageStore`].

use std::{future::Future, pin::Pin, sync::Arc};

use courier_core::{
    error::Result,
    models::{Message, MessageId, MessageStatus},
};

/// Storage operations required by the dispatch engine.
///
/// Implementations must make `claim_next_batch` atomic: concurrent callers
/// never receive the same message, and a message handed out is `processing`
/// before the call returns.
pub trait MessageStore: Send + Sync + 'static {
    /// Claims up to `limit` queued messages, oldest first.
    ///
    /// Claimed messages move to `processing`. An empty queue yields an empty
    /// batch, not an error.
    fn claim_next_batch(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + '_>>;

    /// Marks a processing message as sent with the provider's identifier.
    fn mark_sent(
        &self,
        id: MessageId,
        provider_message_id: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Records a failed attempt and returns the status the message moved to.
    ///
    /// The message goes back to `queued` while `retry_count + 1 <
    /// max_retries`, and to `failed` otherwise.
    fn mark_failed(
        &self,
        id: MessageId,
        cause: String,
        max_retries: u32,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStatus>> + Send + '_>>;

    /// Inserts a new queued message.
    fn create(
        &self,
        to_phone: String,
        content: String,
    ) -> Pin<Box<dyn Future<Output = Result<Message>> + Send + '_>>;

    /// Lists sent messages, most recently sent first.
    fn list_sent(
        &self,
        limit: usize,
        offset: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + '_>>;

    /// Finds a message by ID.
    fn find_message(
        &self,
        id: MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Message>>> + Send + '_>>;

    /// Checks that the store is reachable.
    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production store implementation using PostgreSQL.
///
/// Wraps `courier_core::storage::Storage` and delegates every operation to
/// the messages repository.
pub struct PostgresMessageStore {
    storage: Arc<courier_core::storage::Storage>,
}

impl PostgresMessageStore {
    /// Creates a new PostgreSQL store adapter.
    pub fn new(storage: Arc<courier_core::storage::Storage>) -> Self {
        Self { storage }
    }
}

impl MessageStore for PostgresMessageStore {
    fn claim_next_batch(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.messages.claim_next_batch(limit).await })
    }

    fn mark_sent(
        &self,
        id: MessageId,
        provider_message_id: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.messages.mark_sent(id, &provider_message_id).await })
    }

    fn mark_failed(
        &self,
        id: MessageId,
        cause: String,
        max_retries: u32,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStatus>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.messages.mark_failed(id, &cause, max_retries).await })
    }

    fn create(
        &self,
        to_phone: String,
        content: String,
    ) -> Pin<Box<dyn Future<Output = Result<Message>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.messages.create(&to_phone, &content).await })
    }

    fn list_sent(
        &self,
        limit: usize,
        offset: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.messages.list_sent(limit, offset).await })
    }

    fn find_message(
        &self,
        id: MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Message>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.messages.find_by_id(id).await })
    }

    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.health_check().await })
    }
}

pub mod mock {
    //! In-memory message store for testing.
    //!
    //! Keeps every message behind one lock so claims are atomic, and
    //! supports one-shot failure injection for each mutating operation.

    use std::{future::Future, pin::Pin, sync::Arc};

    use courier_core::{
        error::{CoreError, Result},
        time::{Clock, RealClock},
    };
    use tokio::sync::Mutex;

    use super::{Message, MessageId, MessageStatus, MessageStore};

    #[derive(Default)]
    struct MockState {
        messages: Vec<Message>,
        claim_error: Option<String>,
        mark_sent_error: Option<String>,
        mark_failed_error: Option<String>,
        unhealthy: bool,
        claim_calls: usize,
    }

    /// Mock store for testing dispatch logic without a database.
    ///
    /// Messages are kept in insertion order; claims pick queued messages by
    /// `created_at`, falling back to insertion order on ties.
    pub struct MockMessageStore {
        state: Arc<Mutex<MockState>>,
        clock: Arc<dyn Clock>,
    }

    impl MockMessageStore {
        /// Creates an empty mock store using the system clock.
        pub fn new() -> Self {
            Self::with_clock(Arc::new(RealClock::new()))
        }

        /// Creates an empty mock store stamping times from `clock`.
        pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
            Self { state: Arc::new(Mutex::new(MockState::default())), clock }
        }

        /// Adds a message exactly as given.
        pub async fn add_message(&self, message: Message) {
            self.state.lock().await.messages.push(message);
        }

        /// Returns a snapshot of a stored message.
        pub async fn message(&self, id: MessageId) -> Option<Message> {
            self.state.lock().await.messages.iter().find(|m| m.id == id).cloned()
        }

        /// Returns snapshots of every stored message in insertion order.
        pub async fn messages(&self) -> Vec<Message> {
            self.state.lock().await.messages.clone()
        }

        /// Returns the number of stored messages in `status`.
        pub async fn count_with_status(&self, status: MessageStatus) -> usize {
            self.state.lock().await.messages.iter().filter(|m| m.status == status).count()
        }

        /// Returns how many times `claim_next_batch` has been called.
        pub async fn claim_calls(&self) -> usize {
            self.state.lock().await.claim_calls
        }

        /// Injects an error for the next claim operation.
        pub async fn inject_claim_error(&self, error: impl Into<String>) {
            self.state.lock().await.claim_error = Some(error.into());
        }

        /// Injects an error for the next `mark_sent` operation.
        pub async fn inject_mark_sent_error(&self, error: impl Into<String>) {
            self.state.lock().await.mark_sent_error = Some(error.into());
        }

        /// Injects an error for the next `mark_failed` operation.
        pub async fn inject_mark_failed_error(&self, error: impl Into<String>) {
            self.state.lock().await.mark_failed_error = Some(error.into());
        }

        /// Makes health checks and sent listings fail until reset.
        pub async fn set_unhealthy(&self, unhealthy: bool) {
            self.state.lock().await.unhealthy = unhealthy;
        }
    }

    impl Default for MockMessageStore {
        fn default() -> Self {
            Self::new()
        }
    }

    fn processing_mut<'a>(
        messages: &'a mut [Message],
        id: MessageId,
        target: MessageStatus,
    ) -> Result<&'a mut Message> {
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("message {id} not found")))?;

        if message.status != MessageStatus::Processing {
            return Err(CoreError::InvalidTransition(format!(
                "message {id} is {} and cannot become {target}",
                message.status
            )));
        }

        Ok(message)
    }

    impl MessageStore for MockMessageStore {
        fn claim_next_batch(
            &self,
            limit: usize,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + '_>> {
            let state = self.state.clone();
            let now = self.clock.now_utc();

            Box::pin(async move {
                let mut state = state.lock().await;
                state.claim_calls += 1;

                if let Some(error) = state.claim_error.take() {
                    return Err(CoreError::Database(error));
                }

                let mut queued: Vec<usize> = state
                    .messages
                    .iter()
                    .enumerate()
                    .filter(|(_, m)| m.status == MessageStatus::Queued)
                    .map(|(index, _)| index)
                    .collect();
                queued.sort_by_key(|&index| state.messages[index].created_at);
                queued.truncate(limit);

                let mut claimed = Vec::with_capacity(queued.len());
                for index in queued {
                    let message = &mut state.messages[index];
                    message.status = MessageStatus::Processing;
                    message.updated_at = now;
                    claimed.push(message.clone());
                }

                Ok(claimed)
            })
        }

        fn mark_sent(
            &self,
            id: MessageId,
            provider_message_id: String,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let state = self.state.clone();
            let now = self.clock.now_utc();

            Box::pin(async move {
                let mut state = state.lock().await;
                if let Some(error) = state.mark_sent_error.take() {
                    return Err(CoreError::Database(error));
                }
                if provider_message_id.is_empty() {
                    return Err(CoreError::InvalidInput(format!(
                        "empty provider message id for message {id}"
                    )));
                }

                let message = processing_mut(&mut state.messages, id, MessageStatus::Sent)?;
                message.status = MessageStatus::Sent;
                message.provider_message_id = Some(provider_message_id);
                message.sent_at = Some(now);
                message.updated_at = now;
                Ok(())
            })
        }

        fn mark_failed(
            &self,
            id: MessageId,
            cause: String,
            max_retries: u32,
        ) -> Pin<Box<dyn Future<Output = Result<MessageStatus>> + Send + '_>> {
            let state = self.state.clone();
            let now = self.clock.now_utc();

            Box::pin(async move {
                let mut state = state.lock().await;
                if let Some(error) = state.mark_failed_error.take() {
                    return Err(CoreError::Database(error));
                }

                let message = processing_mut(&mut state.messages, id, MessageStatus::Failed)?;
                let next = MessageStatus::after_failed_attempt(message.retry_count, max_retries);
                message.status = next;
                message.retry_count = message.retry_count.saturating_add(1);
                message.last_error = Some(cause);
                message.updated_at = now;
                Ok(next)
            })
        }

        fn create(
            &self,
            to_phone: String,
            content: String,
        ) -> Pin<Box<dyn Future<Output = Result<Message>> + Send + '_>> {
            let state = self.state.clone();
            let now = self.clock.now_utc();

            Box::pin(async move {
                let message = Message::queued(to_phone, content, now);
                state.lock().await.messages.push(message.clone());
                Ok(message)
            })
        }

        fn list_sent(
            &self,
            limit: usize,
            offset: usize,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + '_>> {
            let state = self.state.clone();

            Box::pin(async move {
                let state = state.lock().await;
                if state.unhealthy {
                    return Err(CoreError::Database("mock store marked unhealthy".to_string()));
                }

                let mut sent: Vec<Message> = state
                    .messages
                    .iter()
                    .filter(|m| m.status == MessageStatus::Sent)
                    .cloned()
                    .collect();
                sent.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));

                Ok(sent.into_iter().skip(offset).take(limit).collect())
            })
        }

        fn find_message(
            &self,
            id: MessageId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Message>>> + Send + '_>> {
            let state = self.state.clone();
            Box::pin(async move {
                Ok(state.lock().await.messages.iter().find(|m| m.id == id).cloned())
            })
        }

        fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let state = self.state.clone();
            Box::pin(async move {
                if state.lock().await.unhealthy {
                    return Err(CoreError::Database("mock store marked unhealthy".to_string()));
                }
                Ok(())
            })
        }
    }

}
