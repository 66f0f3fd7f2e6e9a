//! Database schema and types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS workflows (
    id TEXT NOT NULL UNIQUE,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    file_name TEXT NOT NULL,
    source_blob BLOB NOT NULL,
    sha256 TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    PRIMARY KEY (owner, name)
);
";

/// Opaque chat-platform user identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lightweight handle to a stored workflow.
///
/// Always carries its owner, so a session holding one can be checked against
/// the session's own user. `id` is fresh for every registration, so a workflow
/// removed and registered again under the same name gets a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRef {
    pub id: String,
    pub owner: UserId,
    pub name: String,
    pub version: i64,
}

/// Full workflow record including the uploaded source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub owner: UserId,
    pub name: String,
    pub file_name: String,
    #[serde(skip)]
    pub source_blob: Vec<u8>,
    pub sha256: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn to_ref(&self) -> WorkflowRef {
        WorkflowRef {
            id: self.id.clone(),
            owner: self.owner.clone(),
            name: self.name.clone(),
            version: self.version,
        }
    }

    /// Source as text. Uploads are validated as UTF-8 before storage.
    pub fn source_text(&self) -> String {
        String::from_utf8_lossy(&self.source_blob).into_owned()
    }
}
