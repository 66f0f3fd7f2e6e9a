//! Chat command surface
//!
//! Turns incoming chat messages and documents into registry operations and
//! routed turns, and renders every outcome as a reply. One message is handled
//! entirely under its session's lock.

mod commands;

use commands::{help_message, Command};

use crate::backend::BackendErrorKind;
use crate::db::{Database, UserId};
use crate::error::{RelayError, RelayResult};
use crate::router::{MessageRouter, Reply};
use crate::session::{Session, SessionKey, SessionTracker, UploadState};
use crate::workflow::{normalize_name, validate_upload, ACCEPTED_EXTENSIONS};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Buffered events per conversation stream
const EVENT_CAPACITY: usize = 128;

const WELCOME: &str = "Welcome to the workflow relay!\n\n\
Connect your Agent Builder workflows and chat with them here.\n\n\
Getting Started:\n\
1. Copy your workflow code from Agent Builder and save it as a .py or .txt file\n\
2. Use /upload to send the file and register your workflow\n\
3. Give your workflow a name when prompted\n\
4. Start chatting!\n\n\
Use /help to see all available commands.";

/// Reply classification for clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    Text,
    WorkflowReply,
    NoActiveWorkflow,
    NotFound,
    DuplicateName,
    BackendError,
    InvalidUpload,
    InvalidName,
    StorageError,
}

/// What the bot says back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotReply {
    pub kind: ReplyKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
}

impl BotReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Text,
            text: text.into(),
            workflow: None,
        }
    }

    fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    pub fn from_error(error: &RelayError) -> Self {
        let (kind, text) = match error {
            RelayError::NotFound { name } => (
                ReplyKind::NotFound,
                format!("Workflow '{name}' not found.\nUse /workflows to see available workflows."),
            ),
            RelayError::DuplicateName { name } => (
                ReplyKind::DuplicateName,
                format!(
                    "Workflow '{name}' already exists.\nUse /update {name} to update it, or choose a different name."
                ),
            ),
            RelayError::NoActiveWorkflow => (
                ReplyKind::NoActiveWorkflow,
                "No active workflow. Please use /upload to register a workflow, or /activate one.".to_string(),
            ),
            RelayError::Backend(_) => (
                ReplyKind::BackendError,
                "An error occurred while processing your message. Please try again.".to_string(),
            ),
            RelayError::InvalidUpload(e) => (ReplyKind::InvalidUpload, e.to_string()),
            RelayError::InvalidName(e) => (
                ReplyKind::InvalidName,
                format!("{e}.\nPlease provide a valid name."),
            ),
            RelayError::Storage(_) => (
                ReplyKind::StorageError,
                "Something went wrong while accessing your workflows. Please try again.".to_string(),
            ),
        };
        Self {
            kind,
            text,
            workflow: None,
        }
    }

    fn from_routed(reply: Reply) -> Self {
        match reply {
            Reply::Answer { workflow, text } => Self {
                kind: ReplyKind::WorkflowReply,
                text,
                workflow: Some(workflow),
            },
            Reply::NoActiveWorkflow => Self::from_error(&RelayError::NoActiveWorkflow),
            Reply::NotFound { name } => Self::from_error(&RelayError::NotFound { name }),
            Reply::BackendError { workflow, error } => {
                let text = if error.kind == BackendErrorKind::Timeout {
                    "The workflow took too long to respond. Please try again."
                } else {
                    "An error occurred while processing your message. Please try again."
                };
                Self {
                    kind: ReplyKind::BackendError,
                    text: text.to_string(),
                    workflow: Some(workflow),
                }
            }
            Reply::StorageError { message } => Self::from_error(&RelayError::Storage(message)),
        }
    }
}

/// Progress published for streaming clients
#[derive(Debug, Clone)]
pub struct RelayEvent {
    pub key: SessionKey,
    pub kind: RelayEventKind,
}

#[derive(Debug, Clone)]
pub enum RelayEventKind {
    /// A turn was forwarded and is waiting on the backend
    Processing { workflow: String },
    Reply(BotReply),
}

pub struct Bot {
    db: Database,
    sessions: Arc<SessionTracker>,
    router: MessageRouter,
    max_upload_bytes: usize,
    /// One channel per conversation with live subscribers
    channels: RwLock<HashMap<SessionKey, broadcast::Sender<RelayEvent>>>,
}

impl Bot {
    pub fn new(
        db: Database,
        sessions: Arc<SessionTracker>,
        router: MessageRouter,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            db,
            sessions,
            router,
            max_upload_bytes,
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionTracker> {
        &self.sessions
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Subscribe to the events of one conversation
    pub async fn subscribe(&self, key: &SessionKey) -> broadcast::Receiver<RelayEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(EVENT_CAPACITY).0)
            .subscribe()
    }

    async fn publish(&self, key: &SessionKey, kind: RelayEventKind) {
        let delivered = {
            let channels = self.channels.read().await;
            let Some(tx) = channels.get(key) else {
                return;
            };
            tx.send(RelayEvent {
                key: key.clone(),
                kind,
            })
            .is_ok()
        };

        if !delivered {
            // Every subscriber is gone
            let mut channels = self.channels.write().await;
            if channels.get(key).is_some_and(|tx| tx.receiver_count() == 0) {
                channels.remove(key);
            }
        }
    }

    #[cfg(test)]
    async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Handle a text message: a command, a pending workflow name, or a chat turn
    pub async fn handle_text(&self, user: &UserId, conversation: &str, text: &str) -> BotReply {
        let key = SessionKey::new(user.clone(), conversation);
        let handle = self.sessions.session(&key).await;
        let mut session = handle.lock().await;

        let command = Command::parse(text);
        tracing::debug!(session = %key, command = command_label(&command), "Handling message");

        if !matches!(command, Command::Text(_)) && session.upload != UploadState::Idle {
            tracing::debug!(session = %key, "Pending upload cancelled by command");
            session.upload = UploadState::Idle;
        }

        let reply = match command {
            Command::Start => BotReply::text(WELCOME),
            Command::Help => BotReply::text(help_message()),
            Command::Upload => {
                session.upload = UploadState::AwaitingFile;
                BotReply::text(format!(
                    "Please upload your workflow file.\n\nCopy the code from Agent Builder, save it as a {} file, then send it here.",
                    ACCEPTED_EXTENSIONS.join(" or ")
                ))
            }
            Command::Update(name) => self.begin_update(&mut session, name.as_deref()),
            Command::Activate(None) => BotReply::text("Please provide a workflow name.\nUsage: /activate <workflow_name>"),
            Command::Activate(Some(name)) => match self.sessions.activate_in(&mut session, &name) {
                Ok(wf) => BotReply::text(format!("Workflow '{}' activated!", wf.name)).with_workflow(wf.name),
                Err(e) => BotReply::from_error(&e),
            },
            Command::Workflows => self.list(&mut session).unwrap_or_else(|e| BotReply::from_error(&e)),
            Command::Remove(name) => self
                .remove(&mut session, name.as_deref())
                .unwrap_or_else(|e| BotReply::from_error(&e)),
            Command::Info => self.info(&mut session).unwrap_or_else(|e| BotReply::from_error(&e)),
            Command::Unknown(name) => BotReply::text(format!("Unknown command /{name}. Use /help to see available commands.")),
            Command::Text(text) => {
                if let UploadState::AwaitingName { .. } = session.upload {
                    self.name_pending_upload(&mut session, &text)
                        .unwrap_or_else(|e| BotReply::from_error(&e))
                } else {
                    self.chat(&mut session, &text).await
                }
            }
        };

        self.publish(&key, RelayEventKind::Reply(reply.clone())).await;
        reply
    }

    /// Handle an uploaded document
    pub async fn handle_document(
        &self,
        user: &UserId,
        conversation: &str,
        file_name: &str,
        blob: Vec<u8>,
    ) -> BotReply {
        let key = SessionKey::new(user.clone(), conversation);
        let handle = self.sessions.session(&key).await;
        let mut session = handle.lock().await;

        let reply = match session.upload.clone() {
            UploadState::Idle | UploadState::AwaitingName { .. } => BotReply {
                kind: ReplyKind::InvalidUpload,
                text: "I wasn't expecting a file. Use /upload or /update first.".to_string(),
                workflow: None,
            },
            UploadState::AwaitingFile => match validate_upload(file_name, blob, self.max_upload_bytes) {
                Ok(upload) => {
                    tracing::info!(session = %key, file_name = %upload.file_name, bytes = upload.blob.len(), "Workflow file received");
                    session.upload = UploadState::AwaitingName { upload };
                    BotReply::text(
                        "File received!\n\nWhat would you like to name this workflow?\n(Use lowercase letters, numbers, and underscores only)",
                    )
                }
                Err(e) => BotReply::from_error(&RelayError::from(e)),
            },
            UploadState::AwaitingUpdateFile { name } => {
                match self.apply_update(&mut session, &name, file_name, blob) {
                    Ok(reply) => reply,
                    Err(e) => BotReply::from_error(&e),
                }
            }
        };

        self.publish(&key, RelayEventKind::Reply(reply.clone())).await;
        reply
    }

    fn begin_update(&self, session: &mut Session, name: Option<&str>) -> BotReply {
        let Some(name) = name else {
            return BotReply::text("Please provide a workflow name.\nUsage: /update <workflow_name>");
        };
        match self.db.workflow_exists(session.user(), name) {
            Ok(true) => {
                session.upload = UploadState::AwaitingUpdateFile {
                    name: name.to_string(),
                };
                BotReply::text(format!(
                    "Please upload the updated workflow file for '{name}'.\n\nSave the updated code as a {} file and send it here.",
                    ACCEPTED_EXTENSIONS.join(" or ")
                ))
                .with_workflow(name)
            }
            Ok(false) => BotReply::from_error(&RelayError::NotFound {
                name: name.to_string(),
            }),
            Err(e) => BotReply::from_error(&RelayError::from(e)),
        }
    }

    fn apply_update(
        &self,
        session: &mut Session,
        name: &str,
        file_name: &str,
        blob: Vec<u8>,
    ) -> RelayResult<BotReply> {
        let upload = validate_upload(file_name, blob, self.max_upload_bytes)?;
        // Whatever happens next, this update attempt is over
        session.upload = UploadState::Idle;
        let wf = self
            .db
            .update_workflow(session.user(), name, &upload.file_name, &upload.blob)?;
        session.refresh_active(wf.clone());
        Ok(BotReply::text(format!(
            "Workflow '{}' updated successfully! (version {})",
            wf.name, wf.version
        ))
        .with_workflow(wf.name))
    }

    /// On error the session stays in `AwaitingName` so the user can retry
    fn name_pending_upload(&self, session: &mut Session, raw_name: &str) -> RelayResult<BotReply> {
        let UploadState::AwaitingName { upload } = session.upload.clone() else {
            return Ok(BotReply::text("No pending upload. Use /upload first."));
        };

        let name = normalize_name(raw_name)?;
        let created = self
            .db
            .put_workflow(session.user(), &name, &upload.file_name, &upload.blob)?;
        session.upload = UploadState::Idle;

        let is_first = self.db.list_workflows(session.user())?.len() == 1;
        if !is_first {
            return Ok(BotReply::text(format!(
                "Workflow '{}' created!\nUse /activate {} to switch to it.",
                created.name, created.name
            ))
            .with_workflow(created.name));
        }

        self.sessions.activate_in(session, &created.name)?;
        Ok(BotReply::text(format!(
            "Workflow '{}' created and activated!\nReady to chat!",
            created.name
        ))
        .with_workflow(created.name))
    }

    fn list(&self, session: &mut Session) -> RelayResult<BotReply> {
        let workflows = self.db.list_workflows(session.user())?;
        if workflows.is_empty() {
            return Ok(BotReply::text(
                "You haven't registered any workflows yet.\nUse /upload to register your first workflow!",
            ));
        }

        let active = self.sessions.current_in(session)?.map(|wf| wf.name);
        let mut text = String::from("Your Workflows:\n\n");
        for wf in &workflows {
            let marker = if active.as_deref() == Some(wf.name.as_str()) { "* " } else { "  " };
            text.push_str(&format!("{marker}{} (v{})\n", wf.name, wf.version));
        }
        text.push_str(&format!("\nActive: {}", active.as_deref().unwrap_or("None")));
        Ok(BotReply::text(text))
    }

    fn remove(&self, session: &mut Session, name: Option<&str>) -> RelayResult<BotReply> {
        let Some(name) = name else {
            return Ok(BotReply::text("Please provide a workflow name.\nUsage: /remove <workflow_name>"));
        };
        self.db.remove_workflow(session.user(), name)?;
        // Other conversations notice on their next turn
        if session.active().is_some_and(|wf| wf.name == name) {
            session.clear_active();
        }
        Ok(BotReply::text(format!("Workflow '{name}' removed.")).with_workflow(name))
    }

    fn info(&self, session: &mut Session) -> RelayResult<BotReply> {
        let Some(active) = self.sessions.current_in(session)? else {
            return Err(RelayError::NoActiveWorkflow);
        };
        let wf = self.db.get_workflow(session.user(), &active.name)?;
        Ok(BotReply::text(format!(
            "Active Workflow: {}\n\nVersion: {}\nFile: {}\nSHA-256: {}\nCreated: {}\nUpdated: {}\nHistory: {} turns",
            wf.name,
            wf.version,
            wf.file_name,
            wf.sha256,
            wf.created_at.to_rfc3339(),
            wf.updated_at.to_rfc3339(),
            session.history().len(),
        ))
        .with_workflow(wf.name))
    }

    async fn chat(&self, session: &mut Session, text: &str) -> BotReply {
        if let Some(active) = session.active() {
            let workflow = active.name.clone();
            self.publish(session.key(), RelayEventKind::Processing { workflow })
                .await;
        }
        BotReply::from_routed(self.router.route(session, text).await)
    }
}

fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Start => "start",
        Command::Help => "help",
        Command::Upload => "upload",
        Command::Update(_) => "update",
        Command::Activate(_) => "activate",
        Command::Workflows => "workflows",
        Command::Remove(_) => "remove",
        Command::Info => "info",
        Command::Unknown(_) => "unknown",
        Command::Text(_) => "text",
    }
}
