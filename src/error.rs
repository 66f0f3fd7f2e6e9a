//! User-facing error kinds
//!
//! Every variant is recoverable and ends up as a chat reply.

use crate::backend::BackendError;
use crate::db::DbError;
use crate::workflow::{NameError, UploadError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Workflow '{name}' not found")]
    NotFound { name: String },
    #[error("Workflow '{name}' already exists")]
    DuplicateName { name: String },
    #[error("No active workflow")]
    NoActiveWorkflow,
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Invalid upload: {0}")]
    InvalidUpload(#[from] UploadError),
    #[error(transparent)]
    InvalidName(#[from] NameError),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<DbError> for RelayError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::WorkflowNotFound { name, .. } => RelayError::NotFound { name },
            DbError::DuplicateName { name, .. } => RelayError::DuplicateName { name },
            other => RelayError::Storage(other.to_string()),
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
