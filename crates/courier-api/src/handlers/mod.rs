//! HTTP request handlers for the courier API.
//!
//! Handlers are grouped by functionality:
//! - `health` - Store connectivity check
//! - `messages` - Message creation and the sent-message listing
//! - `scheduler` - Dispatch loop start, stop, and status
//!
//! Every API handler answers with the envelope from [`crate::response`].

pub mod health;
pub mod messages;
pub mod scheduler;

pub use health::health_check;
pub use messages::{create_message, list_sent};
pub use scheduler::{scheduler_status, start_scheduler, stop_scheduler};
