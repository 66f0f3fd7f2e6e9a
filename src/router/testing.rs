//! Mock backends for testing
//!
//! These mocks let the router and bot be exercised without network I/O.

use crate::backend::{BackendError, ExecutionBackend};
use crate::db::Workflow;
use crate::session::Turn;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What the backend was asked to do
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub workflow: String,
    pub version: i64,
    pub file_name: String,
    pub history: Vec<Turn>,
    pub new_turn: String,
}

impl RecordedCall {
    fn new(workflow: &Workflow, history: &[Turn], new_turn: &str) -> Self {
        Self {
            workflow: workflow.name.clone(),
            version: workflow.version,
            file_name: workflow.file_name.clone(),
            history: history.to_vec(),
            new_turn: new_turn.to_string(),
        }
    }
}

// ============================================================================
// Mock Backend
// ============================================================================

/// Backend that returns queued results
pub struct MockBackend {
    results: Mutex<VecDeque<Result<String, BackendError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

#[allow(dead_code)]
impl MockBackend {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_reply(&self, text: impl Into<String>) {
        self.results.lock().unwrap().push_back(Ok(text.into()));
    }

    pub fn queue_error(&self, error: BackendError) {
        self.results.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next(&self, workflow: &Workflow, history: &[Turn], new_turn: &str) -> Result<String, BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push(RecordedCall::new(workflow, history, new_turn));
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::network("No mock response queued")))
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionBackend for MockBackend {
    async fn execute(
        &self,
        workflow: &Workflow,
        history: &[Turn],
        new_turn: &str,
    ) -> Result<String, BackendError> {
        self.next(workflow, history, new_turn)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Delayed Mock Backend (timeouts and serialization)
// ============================================================================

/// Mock backend that sleeps before answering and tracks overlap
pub struct DelayedMockBackend {
    inner: MockBackend,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl DelayedMockBackend {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MockBackend::new(),
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn queue_reply(&self, text: impl Into<String>) {
        self.inner.queue_reply(text);
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.inner.recorded_calls()
    }

    /// Highest number of calls observed running at once
    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionBackend for DelayedMockBackend {
    async fn execute(
        &self,
        workflow: &Workflow,
        history: &[Turn],
        new_turn: &str,
    ) -> Result<String, BackendError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        let result = self.inner.next(workflow, history, new_turn);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &str {
        "delayed-mock"
    }
}
