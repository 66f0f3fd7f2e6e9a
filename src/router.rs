//! Message routing
//!
//! Resolves a conversation's active workflow, forwards the turn to the
//! execution backend and records the exchange in history.

#[cfg(test)]
pub mod testing;

use crate::backend::{BackendError, BackendErrorKind, ExecutionBackend};
use crate::db::{Database, DbError, UserId};
use crate::session::{Session, SessionKey, SessionTracker, Turn};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of routing one chat turn
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The backend answered
    Answer { workflow: String, text: String },
    /// No workflow is active in this conversation
    NoActiveWorkflow,
    /// The active workflow was removed since it was activated
    NotFound { name: String },
    /// The backend failed or timed out; history is unchanged
    BackendError { workflow: String, error: BackendErrorInfo },
    /// The workflow store could not be read
    StorageError { message: String },
}

/// Comparable summary of a [`BackendError`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendErrorInfo {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl From<&BackendError> for BackendErrorInfo {
    fn from(e: &BackendError) -> Self {
        Self {
            kind: e.kind,
            message: e.message.clone(),
        }
    }
}

pub struct MessageRouter {
    db: Database,
    sessions: Arc<SessionTracker>,
    backend: Arc<dyn ExecutionBackend>,
    timeout: Duration,
    max_history_turns: usize,
}

impl MessageRouter {
    pub fn new(
        db: Database,
        sessions: Arc<SessionTracker>,
        backend: Arc<dyn ExecutionBackend>,
        timeout: Duration,
        max_history_turns: usize,
    ) -> Self {
        Self {
            db,
            sessions,
            backend,
            timeout,
            max_history_turns,
        }
    }

    /// Route one chat turn for (user, conversation)
    #[allow(dead_code)] // Used in tests
    pub async fn handle_message(&self, user: &UserId, conversation: &str, text: &str) -> Reply {
        let handle = self
            .sessions
            .session(&SessionKey::new(user.clone(), conversation))
            .await;
        let mut session = handle.lock().await;
        self.route(&mut session, text).await
    }

    /// [`MessageRouter::handle_message`] for a session the caller already
    /// holds. The lock stays held across the backend call, so turns within
    /// one conversation never interleave.
    pub async fn route(&self, session: &mut Session, text: &str) -> Reply {
        let Some(active) = session.active().cloned() else {
            return Reply::NoActiveWorkflow;
        };

        // Re-read on every turn so updates apply immediately
        let workflow = match self.db.get_workflow(session.user(), &active.name) {
            Ok(wf) if wf.id == active.id => wf,
            // A workflow registered again under the same name is a different one
            Ok(_) | Err(DbError::WorkflowNotFound { .. }) => {
                tracing::info!(session = %session.key(), workflow = %active.name, "Active workflow was removed");
                session.clear_active();
                return Reply::NotFound { name: active.name };
            }
            Err(e) => {
                tracing::error!(session = %session.key(), error = %e, "Failed to load active workflow");
                return Reply::StorageError {
                    message: e.to_string(),
                };
            }
        };
        let workflow_ref = workflow.to_ref();
        session.refresh_active(workflow_ref.clone());

        let history = session.replay_window(self.max_history_turns);

        tracing::debug!(
            session = %session.key(),
            workflow = %workflow.name,
            version = workflow.version,
            history_turns = history.len(),
            "Forwarding turn to backend"
        );

        let result =
            match tokio::time::timeout(self.timeout, self.backend.execute(&workflow, &history, text))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::timeout(self.timeout)),
            };

        match result {
            Ok(reply) => {
                session.append_turn(Turn::user(text, &workflow_ref));
                session.append_turn(Turn::assistant(&reply, &workflow_ref));
                Reply::Answer {
                    workflow: workflow.name,
                    text: reply,
                }
            }
            Err(e) => {
                tracing::warn!(
                    session = %session.key(),
                    workflow = %workflow.name,
                    kind = e.kind.as_str(),
                    error = %e.message,
                    "Turn failed, history left unchanged"
                );
                Reply::BackendError {
                    workflow: workflow.name,
                    error: BackendErrorInfo::from(&e),
                }
            }
        }
    }
}
