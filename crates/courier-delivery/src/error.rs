//! Error types for dispatch operations.
//!
//! Covers the failures a scheduler pass can meet: an unreachable store, a
//! provider that rejects or cannot be reached, lifecycle misuse of the
//! scheduler, and the two compound outcomes where the provider and the store
//! disagree about what happened.

use std::fmt;

use courier_core::{CoreError, MessageId};
use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Error conditions raised by the dispatch engine.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The message store could not complete an operation.
    #[error("message store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the store failure
        message: String,
    },

    /// The provider answered but refused the message.
    #[error("delivery rejected: {reason}")]
    DeliveryRejected {
        /// Status and body summary, or the reason the response was refused
        reason: String,
    },

    /// The provider could not be reached or answered unintelligibly.
    #[error("delivery unreachable: {message}")]
    DeliveryUnreachable {
        /// Transport or decoding failure description
        message: String,
    },

    /// `start` was called while the scheduler is running.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// `stop` was called while the scheduler is stopped.
    #[error("scheduler is not running")]
    NotRunning,

    /// Retired scheduler loops did not finish within the shutdown timeout.
    #[error("scheduler shutdown timed out after {timeout_ms}ms")]
    ShutdownTimeout {
        /// Time waited before giving up
        timeout_ms: u64,
    },

    /// The provider accepted the message but the store did not record it.
    ///
    /// The message stays `processing` and needs operator attention.
    #[error(
        "provider accepted message {message_id} as {provider_message_id} but the store failed: \
         {message}"
    )]
    SendReconciliation {
        /// Message the provider accepted
        message_id: MessageId,
        /// Identifier the provider returned
        provider_message_id: String,
        /// Store failure description
        message: String,
    },

    /// Delivery failed and the failure itself could not be recorded.
    #[error("{delivery}; recording the failure also failed: {store}")]
    FailureNotRecorded {
        /// The delivery failure
        delivery: Box<DispatchError>,
        /// Store failure description
        store: String,
    },

    /// The post-send metadata cache write failed.
    #[error("metadata cache write failed: {message}")]
    CacheWrite {
        /// Cache failure description
        message: String,
    },

    /// Invalid component configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },
}

impl DispatchError {
    /// Creates a store-unavailable error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreUnavailable { message: message.into() }
    }

    /// Creates a delivery-rejected error.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::DeliveryRejected { reason: reason.into() }
    }

    /// Creates a delivery-unreachable error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::DeliveryUnreachable { message: message.into() }
    }

    /// Creates a reconciliation error for a send the store failed to record.
    pub fn reconciliation(
        message_id: MessageId,
        provider_message_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::SendReconciliation {
            message_id,
            provider_message_id: provider_message_id.into(),
            message: message.into(),
        }
    }

    /// Combines a delivery failure with the store failure that prevented
    /// recording it.
    pub fn failure_not_recorded(delivery: Self, store: impl Into<String>) -> Self {
        Self::FailureNotRecorded { delivery: Box::new(delivery), store: store.into() }
    }

    /// Creates a cache write error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::CacheWrite { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Returns true when the provider attempt itself failed.
    ///
    /// Rejected and unreachable deliveries take the same retry path.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, Self::DeliveryRejected { .. } | Self::DeliveryUnreachable { .. })
    }

    /// Returns true for scheduler lifecycle misuse.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::AlreadyRunning | Self::NotRunning)
    }
}

impl From<CoreError> for DispatchError {
    fn from(error: CoreError) -> Self {
        Self::store(error.to_string())
    }
}

/// Category of dispatch error for logging and API mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Store connectivity or transaction problems.
    Store,
    /// Provider refused or could not be reached.
    Delivery,
    /// Scheduler start/stop misuse.
    Lifecycle,
    /// Provider and store disagree.
    Reconciliation,
    /// Metadata cache problems.
    Cache,
    /// Configuration problems.
    Configuration,
}

impl From<&DispatchError> for ErrorCategory {
    fn from(error: &DispatchError) -> Self {
        match error {
            DispatchError::StoreUnavailable { .. } => Self::Store,
            DispatchError::DeliveryRejected { .. } | DispatchError::DeliveryUnreachable { .. } => {
                Self::Delivery
            },
            DispatchError::AlreadyRunning
            | DispatchError::NotRunning
            | DispatchError::ShutdownTimeout { .. } => Self::Lifecycle,
            DispatchError::SendReconciliation { .. } | DispatchError::FailureNotRecorded { .. } => {
                Self::Reconciliation
            },
            DispatchError::CacheWrite { .. } => Self::Cache,
            DispatchError::Configuration { .. } => Self::Configuration,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store => write!(f, "store"),
            Self::Delivery => write!(f, "delivery"),
            Self::Lifecycle => write!(f, "lifecycle"),
            Self::Reconciliation => write!(f, "reconciliation"),
            Self::Cache => write!(f, "cache"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}
