//! Courier HTTP API.
//!
//! Exposes scheduler control, message creation, the sent-message listing,
//! and a health check over a shared [`AppState`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use courier_delivery::{MessageStore, Scheduler};

pub mod config;
pub mod handlers;
pub mod response;
pub mod server;

pub use config::Config;
pub use server::{bind, create_router, serve, shutdown_signal, start_server};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Message persistence
    pub store: Arc<dyn MessageStore>,
    /// Dispatch loop controlled through the API
    pub scheduler: Arc<Scheduler>,
    /// Longest accepted message body, in characters
    pub max_message_chars: usize,
}
