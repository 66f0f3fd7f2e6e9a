//! Wire types for the execution backend

use super::BackendError;
use crate::db::Workflow;
use crate::session::{Turn, TurnRole};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reply used when a workflow finishes without producing text
pub const EMPTY_OUTPUT_REPLY: &str = "Workflow completed with no output.";

/// Body of an execute call
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRequest {
    pub workflow: WorkflowPayload,
    pub history: Vec<HistoryTurn>,
    pub input: WorkflowInput,
}

impl ExecutionRequest {
    pub fn new(workflow: &Workflow, history: &[Turn], new_turn: &str) -> Self {
        Self {
            workflow: WorkflowPayload::from(workflow),
            history: history.iter().map(HistoryTurn::from).collect(),
            input: WorkflowInput {
                input_as_text: new_turn.to_string(),
            },
        }
    }
}

/// Workflow identity and source sent with each call
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowPayload {
    pub owner: String,
    pub name: String,
    pub version: i64,
    pub file_name: String,
    pub sha256: String,
    pub source: String,
}

impl From<&Workflow> for WorkflowPayload {
    fn from(wf: &Workflow) -> Self {
        Self {
            owner: wf.owner.to_string(),
            name: wf.name.clone(),
            version: wf.version,
            file_name: wf.file_name.clone(),
            sha256: wf.sha256.clone(),
            source: wf.source_text(),
        }
    }
}

/// Mirrors the `WorkflowInput` model of exported workflows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowInput {
    pub input_as_text: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HistoryTurn {
    pub role: &'static str,
    pub text: String,
}

impl From<&Turn> for HistoryTurn {
    fn from(turn: &Turn) -> Self {
        Self {
            role: match turn.role {
                TurnRole::User => "user",
                TurnRole::Assistant => "assistant",
            },
            text: turn.text.clone(),
        }
    }
}

/// Interpret a backend result value as reply text.
///
/// Accepts `{"output_text": "..."}`, a bare JSON string, or `null`.
pub fn reply_from_value(value: Value) -> Result<String, BackendError> {
    match value {
        Value::Null => Ok(EMPTY_OUTPUT_REPLY.to_string()),
        Value::String(text) => Ok(text),
        Value::Object(mut map) => match map.remove("output_text") {
            Some(Value::String(text)) => Ok(text),
            Some(Value::Null) => Ok(EMPTY_OUTPUT_REPLY.to_string()),
            Some(other) => Err(BackendError::malformed(format!(
                "output_text is not a string: {other}"
            ))),
            None => Err(BackendError::malformed("Response has no output_text field")),
        },
        other => Err(BackendError::malformed(format!(
            "Unexpected response shape: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendErrorKind;
    use serde_json::json;

    #[test]
    fn test_reply_from_output_text() {
        let reply = reply_from_value(json!({"output_text": "hello", "extra": 1})).unwrap();
        assert_eq!(reply, "hello");
    }

    #[test]
    fn test_reply_from_string_and_null() {
        assert_eq!(reply_from_value(json!("plain")).unwrap(), "plain");
        assert_eq!(reply_from_value(Value::Null).unwrap(), EMPTY_OUTPUT_REPLY);
        assert_eq!(
            reply_from_value(json!({"output_text": null})).unwrap(),
            EMPTY_OUTPUT_REPLY
        );
    }

    #[test]
    fn test_unexpected_shapes_are_malformed() {
        for value in [json!(42), json!([1, 2]), json!({"text": "x"}), json!({"output_text": 3})] {
            let err = reply_from_value(value).unwrap_err();
            assert_eq!(err.kind, BackendErrorKind::Malformed);
        }
    }
}
