//! Session tracking
//!
//! One `Session` per (user, conversation). The tracker is an explicit registry
//! passed to whoever needs it; each session sits behind its own async mutex so
//! work on one conversation is serialized while other conversations proceed.

use crate::db::{Database, DbError, UserId, WorkflowRef};
use crate::error::{RelayError, RelayResult};
use crate::workflow::ValidatedUpload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Composite key for session state
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user: UserId,
    pub conversation: String,
}

impl SessionKey {
    pub fn new(user: UserId, conversation: impl Into<String>) -> Self {
        Self {
            user,
            conversation: conversation.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user, self.conversation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// Turns kept per conversation; older ones are dropped
pub const MAX_STORED_TURNS: usize = 200;

/// One entry of conversation history, tagged with the workflow it was
/// exchanged with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub role: TurnRole,
    pub text: String,
    /// Workflow name, for display
    pub workflow: String,
    /// Registration id of the workflow; replay matches on this
    pub workflow_id: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: TurnRole, text: impl Into<String>, workflow: &WorkflowRef) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            workflow: workflow.name.clone(),
            workflow_id: workflow.id.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>, workflow: &WorkflowRef) -> Self {
        Self::new(TurnRole::User, text, workflow)
    }

    pub fn assistant(text: impl Into<String>, workflow: &WorkflowRef) -> Self {
        Self::new(TurnRole::Assistant, text, workflow)
    }
}

/// What happens to history when the active workflow changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryPolicy {
    /// Switching to a different workflow clears history
    #[default]
    Reset,
    /// History is kept; only turns of the active workflow are replayed
    Preserve,
}

impl FromStr for HistoryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reset" => Ok(Self::Reset),
            "preserve" => Ok(Self::Preserve),
            other => Err(format!("unknown history policy '{other}' (expected reset or preserve)")),
        }
    }
}

/// Multi-message upload flow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UploadState {
    #[default]
    Idle,
    /// `/upload` seen, next document is a new workflow
    AwaitingFile,
    /// `/update <name>` seen, next document replaces `name`
    AwaitingUpdateFile { name: String },
    /// Document received, next text is its name
    AwaitingName { upload: ValidatedUpload },
}

#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    active: Option<WorkflowRef>,
    history: Vec<Turn>,
    pub upload: UploadState,
    created_at: DateTime<Utc>,
}

impl Session {
    fn new(key: SessionKey) -> Self {
        Self {
            key,
            active: None,
            history: Vec::new(),
            upload: UploadState::Idle,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn user(&self) -> &UserId {
        &self.key.user
    }

    pub fn active(&self) -> Option<&WorkflowRef> {
        self.active.as_ref()
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    #[allow(dead_code)] // Exposed for diagnostics
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn append_turn(&mut self, turn: Turn) {
        self.history.push(turn);
        let excess = self.history.len().saturating_sub(MAX_STORED_TURNS);
        if excess > 0 {
            self.history.drain(..excess);
        }
    }

    /// The most recent `max_turns` turns exchanged with the active workflow,
    /// oldest first
    pub fn replay_window(&self, max_turns: usize) -> Vec<Turn> {
        let Some(active) = &self.active else {
            return Vec::new();
        };
        let scoped: Vec<&Turn> = self
            .history
            .iter()
            .filter(|t| t.workflow_id == active.id)
            .collect();
        let skip = scoped.len().saturating_sub(max_turns);
        scoped.into_iter().skip(skip).cloned().collect()
    }

    fn set_active(&mut self, workflow: WorkflowRef, policy: HistoryPolicy) {
        debug_assert_eq!(workflow.owner, self.key.user, "cross-user workflow reference");
        // Compared against the history rather than the pointer, which may
        // have been cleared by a removal in the meantime
        let switching = self.history.iter().any(|t| t.workflow_id != workflow.id);
        if switching && policy == HistoryPolicy::Reset {
            self.history.clear();
        }
        self.active = Some(workflow);
    }

    /// Record a newer version of the active workflow
    pub fn refresh_active(&mut self, workflow: WorkflowRef) {
        if self.active.as_ref().is_some_and(|current| current.id == workflow.id) {
            self.active = Some(workflow);
        }
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }
}

/// Registry of all sessions
pub struct SessionTracker {
    db: Database,
    policy: HistoryPolicy,
    sessions: RwLock<HashMap<SessionKey, Arc<Mutex<Session>>>>,
}

impl SessionTracker {
    pub fn new(db: Database, policy: HistoryPolicy) -> Self {
        Self {
            db,
            policy,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    #[allow(dead_code)] // Used in tests
    pub fn policy(&self) -> HistoryPolicy {
        self.policy
    }

    /// Get or lazily create the session for `key`
    pub async fn session(&self, key: &SessionKey) -> Arc<Mutex<Session>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(key) {
                return session.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(session = %key, "Creating session");
                Arc::new(Mutex::new(Session::new(key.clone())))
            })
            .clone()
    }

    /// Look up an existing session without creating one
    pub async fn get(&self, key: &SessionKey) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(key).cloned()
    }

    /// Make `workflow_name` the active workflow of the conversation.
    ///
    /// The lookup is scoped to the session's own user, so another user's
    /// workflow of the same name is never found. On failure the session is
    /// left untouched.
    #[allow(dead_code)] // Used in tests
    pub async fn activate(
        &self,
        user: &UserId,
        conversation: &str,
        workflow_name: &str,
    ) -> RelayResult<WorkflowRef> {
        let handle = self.session(&SessionKey::new(user.clone(), conversation)).await;
        let mut session = handle.lock().await;
        self.activate_in(&mut session, workflow_name)
    }

    /// [`SessionTracker::activate`] for a session the caller already holds
    pub fn activate_in(&self, session: &mut Session, workflow_name: &str) -> RelayResult<WorkflowRef> {
        let workflow = self.db.get_workflow(session.user(), workflow_name)?;
        let workflow_ref = workflow.to_ref();
        session.set_active(workflow_ref.clone(), self.policy);

        tracing::info!(
            session = %session.key(),
            workflow = %workflow_ref.name,
            version = workflow_ref.version,
            "Workflow activated"
        );
        Ok(workflow_ref)
    }

    /// The conversation's active workflow, if any
    pub async fn current(&self, user: &UserId, conversation: &str) -> RelayResult<Option<WorkflowRef>> {
        let Some(handle) = self.get(&SessionKey::new(user.clone(), conversation)).await else {
            return Ok(None);
        };
        let mut session = handle.lock().await;
        self.current_in(&mut session)
    }

    /// [`SessionTracker::current`] for a held session. Clears the pointer if
    /// the workflow has since been removed.
    pub fn current_in(&self, session: &mut Session) -> RelayResult<Option<WorkflowRef>> {
        let Some(active) = session.active().cloned() else {
            return Ok(None);
        };
        match self.db.get_workflow(session.user(), &active.name) {
            Ok(workflow) if workflow.id == active.id => {
                session.refresh_active(workflow.to_ref());
                Ok(session.active().cloned())
            }
            // Removed, possibly re-registered under the same name
            Ok(_) | Err(DbError::WorkflowNotFound { .. }) => {
                tracing::info!(
                    session = %session.key(),
                    workflow = %active.name,
                    "Active workflow no longer exists, clearing"
                );
                session.clear_active();
                Ok(None)
            }
            Err(e) => Err(RelayError::from(e)),
        }
    }

    #[allow(dead_code)] // Used in tests
    pub async fn append_turn(&self, user: &UserId, conversation: &str, turn: Turn) {
        let handle = self.session(&SessionKey::new(user.clone(), conversation)).await;
        handle.lock().await.append_turn(turn);
    }

    /// Snapshot of the conversation history
    pub async fn history(&self, user: &UserId, conversation: &str) -> Vec<Turn> {
        let Some(handle) = self.get(&SessionKey::new(user.clone(), conversation)).await else {
            return Vec::new();
        };
        let session = handle.lock().await;
        session.history().to_vec()
    }

    /// Number of sessions held in memory
    #[allow(dead_code)] // Used in tests
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &[u8] = b"async def run_workflow(workflow_input):\n    pass\n";

    fn setup(policy: HistoryPolicy) -> (Database, SessionTracker) {
        let db = Database::open_in_memory().unwrap();
        let tracker = SessionTracker::new(db.clone(), policy);
        (db, tracker)
    }

    fn alice() -> UserId {
        UserId::new("alice")
    }

    fn bob() -> UserId {
        UserId::new("bob")
    }

    #[tokio::test]
    async fn test_session_is_created_lazily_and_reused() {
        let (_db, tracker) = setup(HistoryPolicy::Reset);
        let key = SessionKey::new(alice(), "chat-1");

        let a = tracker.session(&key).await;
        let b = tracker.session(&key).await;
        assert!(Arc::ptr_eq(&a, &b));

        let other = tracker.session(&SessionKey::new(alice(), "chat-2")).await;
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn test_activate_sets_current() {
        let (db, tracker) = setup(HistoryPolicy::Reset);
        db.put_workflow(&alice(), "triage", "t.py", SOURCE).unwrap();

        assert_eq!(tracker.current(&alice(), "c").await.unwrap(), None);
        let activated = tracker.activate(&alice(), "c", "triage").await.unwrap();
        assert_eq!(activated.name, "triage");

        let current = tracker.current(&alice(), "c").await.unwrap().unwrap();
        assert_eq!(current.owner, alice());
        assert_eq!(current.name, "triage");

        // Scoped per conversation
        assert_eq!(tracker.current(&alice(), "other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_other_users_workflow_is_invisible() {
        let (db, tracker) = setup(HistoryPolicy::Reset);
        db.put_workflow(&alice(), "x", "x.py", SOURCE).unwrap();

        let err = tracker.activate(&bob(), "c", "x").await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound { ref name } if name == "x"));
        assert_eq!(tracker.current(&bob(), "c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_activate_missing_keeps_previous() {
        let (db, tracker) = setup(HistoryPolicy::Reset);
        let triage = db.put_workflow(&alice(), "triage", "t.py", SOURCE).unwrap();
        tracker.activate(&alice(), "c", "triage").await.unwrap();
        tracker
            .append_turn(&alice(), "c", Turn::user("hello", &triage))
            .await;

        let err = tracker.activate(&alice(), "c", "nope").await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound { .. }));

        let current = tracker.current(&alice(), "c").await.unwrap().unwrap();
        assert_eq!(current.name, "triage");
        assert_eq!(tracker.history(&alice(), "c").await.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_policy_clears_history_on_switch() {
        let (db, tracker) = setup(HistoryPolicy::Reset);
        let a = db.put_workflow(&alice(), "a", "a.py", SOURCE).unwrap();
        db.put_workflow(&alice(), "b", "b.py", SOURCE).unwrap();

        tracker.activate(&alice(), "c", "a").await.unwrap();
        tracker.append_turn(&alice(), "c", Turn::user("q", &a)).await;
        tracker.append_turn(&alice(), "c", Turn::assistant("r", &a)).await;

        // Re-activating the same workflow keeps history
        tracker.activate(&alice(), "c", "a").await.unwrap();
        assert_eq!(tracker.history(&alice(), "c").await.len(), 2);

        tracker.activate(&alice(), "c", "b").await.unwrap();
        assert!(tracker.history(&alice(), "c").await.is_empty());
    }

    #[tokio::test]
    async fn test_preserve_policy_scopes_replay_to_active_workflow() {
        let (db, tracker) = setup(HistoryPolicy::Preserve);
        let a = db.put_workflow(&alice(), "a", "a.py", SOURCE).unwrap();
        let b = db.put_workflow(&alice(), "b", "b.py", SOURCE).unwrap();

        tracker.activate(&alice(), "c", "a").await.unwrap();
        tracker.append_turn(&alice(), "c", Turn::user("qa", &a)).await;
        tracker.append_turn(&alice(), "c", Turn::assistant("ra", &a)).await;
        tracker.activate(&alice(), "c", "b").await.unwrap();
        tracker.append_turn(&alice(), "c", Turn::user("qb", &b)).await;

        assert_eq!(tracker.history(&alice(), "c").await.len(), 3);

        let handle = tracker.session(&SessionKey::new(alice(), "c")).await;
        let session = handle.lock().await;
        let replay: Vec<_> = session.replay_window(10).into_iter().map(|t| t.text).collect();
        assert_eq!(replay, vec!["qb"]);
    }

    #[tokio::test]
    async fn test_replay_window_keeps_most_recent_turns() {
        let (db, tracker) = setup(HistoryPolicy::Reset);
        let a = db.put_workflow(&alice(), "a", "a.py", SOURCE).unwrap();
        tracker.activate(&alice(), "c", "a").await.unwrap();
        for i in 0..5 {
            tracker
                .append_turn(&alice(), "c", Turn::user(format!("m{i}"), &a))
                .await;
        }

        let handle = tracker.session(&SessionKey::new(alice(), "c")).await;
        let session = handle.lock().await;
        let replay: Vec<_> = session.replay_window(2).into_iter().map(|t| t.text).collect();
        assert_eq!(replay, vec!["m3", "m4"]);
        assert!(session.replay_window(0).is_empty());
    }

    #[tokio::test]
    async fn test_current_clears_removed_workflow() {
        let (db, tracker) = setup(HistoryPolicy::Reset);
        db.put_workflow(&alice(), "a", "a.py", SOURCE).unwrap();
        tracker.activate(&alice(), "c1", "a").await.unwrap();
        tracker.activate(&alice(), "c2", "a").await.unwrap();

        db.remove_workflow(&alice(), "a").unwrap();

        assert_eq!(tracker.current(&alice(), "c1").await.unwrap(), None);
        assert_eq!(tracker.current(&alice(), "c2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_current_tracks_updated_version() {
        let (db, tracker) = setup(HistoryPolicy::Reset);
        db.put_workflow(&alice(), "a", "a.py", SOURCE).unwrap();
        tracker.activate(&alice(), "c", "a").await.unwrap();
        db.update_workflow(&alice(), "a", "a.py", SOURCE).unwrap();

        let current = tracker.current(&alice(), "c").await.unwrap().unwrap();
        assert_eq!(current.version, 2);
    }

    #[tokio::test]
    async fn test_reset_clears_history_of_removed_workflow() {
        let (db, tracker) = setup(HistoryPolicy::Reset);
        let old = db.put_workflow(&alice(), "x", "x.py", SOURCE).unwrap();
        tracker.activate(&alice(), "c", "x").await.unwrap();
        tracker.append_turn(&alice(), "c", Turn::user("old", &old)).await;

        db.remove_workflow(&alice(), "x").unwrap();
        assert_eq!(tracker.current(&alice(), "c").await.unwrap(), None);

        // Same name, different workflow
        db.put_workflow(&alice(), "x", "x.py", SOURCE).unwrap();
        tracker.activate(&alice(), "c", "x").await.unwrap();
        assert!(tracker.history(&alice(), "c").await.is_empty());
    }

    #[tokio::test]
    async fn test_current_detects_reregistered_name() {
        let (db, tracker) = setup(HistoryPolicy::Reset);
        db.put_workflow(&alice(), "x", "x.py", SOURCE).unwrap();
        tracker.activate(&alice(), "c", "x").await.unwrap();

        db.remove_workflow(&alice(), "x").unwrap();
        db.put_workflow(&alice(), "x", "x.py", SOURCE).unwrap();

        assert_eq!(tracker.current(&alice(), "c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_preserve_does_not_replay_removed_registration() {
        let (db, tracker) = setup(HistoryPolicy::Preserve);
        let old = db.put_workflow(&alice(), "x", "x.py", SOURCE).unwrap();
        tracker.activate(&alice(), "c", "x").await.unwrap();
        tracker.append_turn(&alice(), "c", Turn::user("old", &old)).await;

        db.remove_workflow(&alice(), "x").unwrap();
        db.put_workflow(&alice(), "x", "x.py", SOURCE).unwrap();
        tracker.activate(&alice(), "c", "x").await.unwrap();

        assert_eq!(tracker.history(&alice(), "c").await.len(), 1);
        let handle = tracker.session(&SessionKey::new(alice(), "c")).await;
        assert!(handle.lock().await.replay_window(10).is_empty());
    }

    #[tokio::test]
    async fn test_stored_history_is_capped() {
        let (db, tracker) = setup(HistoryPolicy::Reset);
        let a = db.put_workflow(&alice(), "a", "a.py", SOURCE).unwrap();
        tracker.activate(&alice(), "c", "a").await.unwrap();
        for i in 0..MAX_STORED_TURNS + 10 {
            tracker
                .append_turn(&alice(), "c", Turn::user(format!("m{i}"), &a))
                .await;
        }

        let history = tracker.history(&alice(), "c").await;
        assert_eq!(history.len(), MAX_STORED_TURNS);
        assert_eq!(history[0].text, "m10");
    }

    #[tokio::test]
    async fn test_reads_do_not_create_sessions() {
        let (_db, tracker) = setup(HistoryPolicy::Reset);

        assert_eq!(tracker.current(&alice(), "nowhere").await.unwrap(), None);
        assert!(tracker.history(&alice(), "nowhere").await.is_empty());
        assert!(tracker.get(&SessionKey::new(alice(), "nowhere")).await.is_none());
        assert_eq!(tracker.session_count().await, 0);

        tracker.session(&SessionKey::new(alice(), "somewhere")).await;
        assert_eq!(tracker.session_count().await, 1);
    }

    #[test]
    fn test_history_policy_from_str() {
        assert_eq!("reset".parse::<HistoryPolicy>().unwrap(), HistoryPolicy::Reset);
        assert_eq!(" Preserve ".parse::<HistoryPolicy>().unwrap(), HistoryPolicy::Preserve);
        assert!("keep".parse::<HistoryPolicy>().is_err());
    }
}
