//! Execution backend abstraction
//!
//! The backend owns all agent-execution semantics. The relay hands it a
//! workflow, the replayable history and the new user turn, and gets reply
//! text back.

mod error;
mod http;
mod types;

pub use error::{BackendError, BackendErrorKind};
pub use http::HttpBackend;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::db::Workflow;
use crate::session::Turn;
use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for execution backends
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Run one turn of `workflow`
    async fn execute(
        &self,
        workflow: &Workflow,
        history: &[Turn],
        new_turn: &str,
    ) -> Result<String, BackendError>;

    /// Identifier used in logs
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: ExecutionBackend + ?Sized> ExecutionBackend for Arc<T> {
    async fn execute(
        &self,
        workflow: &Workflow,
        history: &[Turn],
        new_turn: &str,
    ) -> Result<String, BackendError> {
        (**self).execute(workflow, history, new_turn).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Logging wrapper for execution backends
pub struct LoggingBackend {
    inner: Arc<dyn ExecutionBackend>,
    name: String,
}

impl LoggingBackend {
    pub fn new(inner: Arc<dyn ExecutionBackend>) -> Self {
        let name = inner.name().to_string();
        Self { inner, name }
    }
}

#[async_trait]
impl ExecutionBackend for LoggingBackend {
    async fn execute(
        &self,
        workflow: &Workflow,
        history: &[Turn],
        new_turn: &str,
    ) -> Result<String, BackendError> {
        let start = std::time::Instant::now();
        let result = self.inner.execute(workflow, history, new_turn).await;
        let duration = start.elapsed();

        match &result {
            Ok(reply) => {
                tracing::info!(
                    backend = %self.name,
                    user = %workflow.owner,
                    workflow = %workflow.name,
                    version = workflow.version,
                    history_turns = history.len(),
                    reply_chars = reply.chars().count(),
                    duration_ms = %duration.as_millis(),
                    "Workflow execution completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    backend = %self.name,
                    user = %workflow.owner,
                    workflow = %workflow.name,
                    duration_ms = %duration.as_millis(),
                    kind = e.kind.as_str(),
                    error = %e.message,
                    "Workflow execution failed"
                );
            }
        }

        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}
