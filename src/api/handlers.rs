//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    DocumentRequest, ErrorResponse, HistoryResponse, MessageRequest, ReplyResponse,
    WorkflowListResponse,
};
use super::AppState;
use crate::db::UserId;
use crate::error::RelayError;
use crate::session::SessionKey;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Commands and chat turns
        .route(
            "/api/users/:user/conversations/:conversation/messages",
            post(send_message),
        )
        // Workflow file uploads
        .route(
            "/api/users/:user/conversations/:conversation/documents",
            post(send_document),
        )
        .route(
            "/api/users/:user/conversations/:conversation/stream",
            get(stream_conversation),
        )
        .route(
            "/api/users/:user/conversations/:conversation/history",
            get(get_history),
        )
        .route("/api/users/:user/workflows", get(list_workflows))
        .route("/version", get(get_version))
        .with_state(state)
}

fn user_id(raw: &str) -> Result<UserId, AppError> {
    if raw.trim().is_empty() {
        return Err(AppError::BadRequest("user id cannot be empty".to_string()));
    }
    Ok(UserId::new(raw))
}

async fn send_message(
    State(state): State<AppState>,
    Path((user, conversation)): Path<(String, String)>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<ReplyResponse>, AppError> {
    let user = user_id(&user)?;
    let reply = state.bot.handle_text(&user, &conversation, &req.text).await;
    Ok(Json(ReplyResponse { reply }))
}

async fn send_document(
    State(state): State<AppState>,
    Path((user, conversation)): Path<(String, String)>,
    Json(req): Json<DocumentRequest>,
) -> Result<Json<ReplyResponse>, AppError> {
    let user = user_id(&user)?;
    let blob = BASE64
        .decode(req.content_base64.trim())
        .map_err(|e| AppError::BadRequest(format!("Invalid base64 content: {e}")))?;

    let reply = state
        .bot
        .handle_document(&user, &conversation, &req.file_name, blob)
        .await;
    Ok(Json(ReplyResponse { reply }))
}

async fn stream_conversation(
    State(state): State<AppState>,
    Path((user, conversation)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let key = SessionKey::new(user_id(&user)?, conversation);
    tracing::debug!(session = %key, "Stream opened");
    let events = state.bot.subscribe(&key).await;
    Ok(sse_stream(key, events))
}

async fn get_history(
    State(state): State<AppState>,
    Path((user, conversation)): Path<(String, String)>,
) -> Result<Json<HistoryResponse>, AppError> {
    let user = user_id(&user)?;
    let sessions = state.bot.sessions();
    let active = sessions.current(&user, &conversation).await?;
    let turns = sessions.history(&user, &conversation).await;
    Ok(Json(HistoryResponse { active, turns }))
}

async fn list_workflows(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<WorkflowListResponse>, AppError> {
    let user = user_id(&user)?;
    let workflows = state
        .bot
        .db()
        .list_workflows(&user)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(WorkflowListResponse { workflows }))
}

async fn get_version() -> &'static str {
    concat!("workflow-relay ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<RelayError> for AppError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::NotFound { .. } => AppError::NotFound(e.to_string()),
            RelayError::Storage(_) => AppError::Internal(e.to_string()),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{Bot, ReplyKind};
    use crate::db::Database;
    use crate::router::testing::MockBackend;
    use crate::router::MessageRouter;
    use crate::session::{HistoryPolicy, SessionTracker};
    use std::sync::Arc;
    use std::time::Duration;

    fn state_with(backend: Arc<MockBackend>) -> AppState {
        let db = Database::open_in_memory().unwrap();
        let sessions = Arc::new(SessionTracker::new(db.clone(), HistoryPolicy::Reset));
        let router = MessageRouter::new(
            db.clone(),
            sessions.clone(),
            backend,
            Duration::from_secs(5),
            20,
        );
        AppState::new(Arc::new(Bot::new(db, sessions, router, 1024)))
    }

    fn path(user: &str, conversation: &str) -> Path<(String, String)> {
        Path((user.to_string(), conversation.to_string()))
    }

    async fn message(state: &AppState, user: &str, text: &str) -> ReplyResponse {
        let Json(resp) = send_message(
            State(state.clone()),
            path(user, "chat-1"),
            Json(MessageRequest {
                text: text.to_string(),
            }),
        )
        .await
        .unwrap();
        resp
    }

    async fn document(state: &AppState, user: &str, file_name: &str, content: &[u8]) -> ReplyResponse {
        let Json(resp) = send_document(
            State(state.clone()),
            path(user, "chat-1"),
            Json(DocumentRequest {
                file_name: file_name.to_string(),
                content_base64: BASE64.encode(content),
            }),
        )
        .await
        .unwrap();
        resp
    }

    #[tokio::test]
    async fn test_upload_and_chat_over_http() {
        let backend = Arc::new(MockBackend::new());
        let state = state_with(backend.clone());

        message(&state, "u1", "/upload").await;
        let received = document(&state, "u1", "flow.py", b"def run_workflow(x):\n    pass\n").await;
        assert_eq!(received.reply.kind, ReplyKind::Text);
        let created = message(&state, "u1", "helper").await;
        assert_eq!(created.reply.workflow.as_deref(), Some("helper"));

        backend.queue_reply("pong");
        let answer = message(&state, "u1", "ping").await;
        assert_eq!(answer.reply.kind, ReplyKind::WorkflowReply);
        assert_eq!(answer.reply.text, "pong");

        let Json(history) = get_history(State(state.clone()), path("u1", "chat-1"))
            .await
            .unwrap();
        assert_eq!(history.turns.len(), 2);
        assert_eq!(history.active.unwrap().name, "helper");

        let Json(list) = list_workflows(State(state.clone()), Path("u1".to_string()))
            .await
            .unwrap();
        assert_eq!(list.workflows.len(), 1);

        let Json(other) = list_workflows(State(state), Path("u2".to_string()))
            .await
            .unwrap();
        assert!(other.workflows.is_empty());
    }

    #[tokio::test]
    async fn test_history_of_unknown_conversation_is_empty() {
        let state = state_with(Arc::new(MockBackend::new()));

        let Json(history) = get_history(State(state.clone()), path("u1", "never-seen"))
            .await
            .unwrap();
        assert!(history.turns.is_empty());
        assert!(history.active.is_none());
        assert_eq!(state.bot.sessions().session_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_base64_is_bad_request() {
        let state = state_with(Arc::new(MockBackend::new()));
        let result = send_document(
            State(state),
            path("u1", "chat-1"),
            Json(DocumentRequest {
                file_name: "flow.py".to_string(),
                content_base64: "not base64!!".to_string(),
            }),
        )
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_blank_user_is_bad_request() {
        let state = state_with(Arc::new(MockBackend::new()));
        let result = send_message(
            State(state),
            path(" ", "chat-1"),
            Json(MessageRequest {
                text: "hi".to_string(),
            }),
        )
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_error_status_codes() {
        let not_found = AppError::from(RelayError::NotFound { name: "x".into() }).into_response();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let storage = AppError::from(RelayError::Storage("disk".into())).into_response();
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let no_active = AppError::from(RelayError::NoActiveWorkflow).into_response();
        assert_eq!(no_active.status(), StatusCode::BAD_REQUEST);
    }
}
