//! Core domain models and storage for the courier dispatcher.
//!
//! Provides the message model and its status state machine, the error type
//! shared by storage operations, a clock abstraction for deterministic
//! testing, and the PostgreSQL repository that implements atomic batch
//! claiming. All other crates depend on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{Message, MessageId, MessageStatus};
pub use time::{Clock, RealClock, TestClock};
