//! HTTP API for the workflow relay
//!
//! Each `(user, conversation)` pair in the path is one chat.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::bot::Bot;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub bot: Arc<Bot>,
}

impl AppState {
    pub fn new(bot: Arc<Bot>) -> Self {
        Self { bot }
    }
}
