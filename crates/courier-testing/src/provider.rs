//! In-process delivery provider and metadata cache doubles.
//!
//! [`ScriptedProvider`] answers from a queue of outcomes, falling back to
//! accepting every message; [`RecordingCache`] remembers every write. Both
//! record calls so tests can assert on exactly-once behavior.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::{Mutex, MutexGuard, PoisonError},
};

use courier_core::{Message, MessageId};
use courier_delivery::{
    cache::{MetadataCache, SentMeta},
    client::DeliveryProvider,
    error::{DispatchError, Result},
};

/// Outcome of one scripted provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    /// Accept with the given provider id (may be empty to exercise the
    /// empty-id path).
    Accept(String),
    /// Explicit rejection.
    Reject(String),
    /// Transport failure.
    Unreachable(String),
}

impl ProviderOutcome {
    fn into_result(self) -> Result<String> {
        match self {
            Self::Accept(id) if id.is_empty() => {
                Err(DispatchError::rejected("provider returned an empty messageId"))
            },
            Self::Accept(id) => Ok(id),
            Self::Reject(reason) => Err(DispatchError::rejected(reason)),
            Self::Unreachable(message) => Err(DispatchError::unreachable(message)),
        }
    }
}

#[derive(Debug, Default)]
struct ProviderState {
    script: VecDeque<ProviderOutcome>,
    per_message: HashMap<MessageId, VecDeque<ProviderOutcome>>,
    calls: Vec<MessageId>,
}

/// Provider double answering from a script.
///
/// Per-message scripts take precedence over the shared script. When both
/// are exhausted the message is accepted as `prov-{id}`.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    state: Mutex<ProviderState>,
}

impl ScriptedProvider {
    /// Creates a provider that accepts every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an outcome for the next call on any message.
    pub fn push(&self, outcome: ProviderOutcome) -> &Self {
        self.lock().script.push_back(outcome);
        self
    }

    /// Queues an outcome for the next call on `id`.
    pub fn push_for(&self, id: MessageId, outcome: ProviderOutcome) -> &Self {
        self.lock().per_message.entry(id).or_default().push_back(outcome);
        self
    }

    /// Makes the next `times` calls on `id` fail with a rejection.
    pub fn reject_times(&self, id: MessageId, times: usize) -> &Self {
        for attempt in 1..=times {
            self.push_for(id, ProviderOutcome::Reject(format!("HTTP 500: attempt {attempt}")));
        }
        self
    }

    /// Returns the ids of every message sent, in call order.
    pub fn calls(&self) -> Vec<MessageId> {
        self.lock().calls.clone()
    }

    /// Returns how many times `id` was sent.
    pub fn calls_for(&self, id: MessageId) -> usize {
        self.lock().calls.iter().filter(|call| **call == id).count()
    }

    fn next_outcome(&self, id: MessageId) -> ProviderOutcome {
        let mut state = self.lock();
        state.calls.push(id);

        if let Some(outcome) = state.per_message.get_mut(&id).and_then(VecDeque::pop_front) {
            return outcome;
        }

        state
            .script
            .pop_front()
            .unwrap_or_else(|| ProviderOutcome::Accept(format!("prov-{id}")))
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeliveryProvider for ScriptedProvider {
    fn send<'a>(
        &'a self,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        let outcome = self.next_outcome(message.id);
        Box::pin(async move { outcome.into_result() })
    }
}

/// Metadata cache double recording every write.
#[derive(Debug, Default)]
pub struct RecordingCache {
    writes: Mutex<Vec<(MessageId, SentMeta)>>,
    failing: Mutex<bool>,
}

impl RecordingCache {
    /// Creates an empty, healthy cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail.
    pub fn fail_writes(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }

    /// Returns every successful write in order.
    pub fn writes(&self) -> Vec<(MessageId, SentMeta)> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl MetadataCache for RecordingCache {
    fn set_sent_meta<'a>(
        &'a self,
        id: MessageId,
        meta: &'a SentMeta,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        let result = if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            Err(DispatchError::cache("connection refused"))
        } else {
            self.writes.lock().unwrap_or_else(PoisonError::into_inner).push((id, meta.clone()));
            Ok(())
        };

        Box::pin(async move { result })
    }
}
