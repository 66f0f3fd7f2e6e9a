//! Workflow upload validation
//!
//! Uploaded files are exported agent workflows. The relay never runs them; it
//! only checks that the blob looks like an export the backend can execute and
//! turns the user's proposed name into a registry key.

use thiserror::Error;

/// File extensions accepted for workflow uploads
pub const ACCEPTED_EXTENSIONS: &[&str] = &[".py", ".txt"];

/// Why an upload was rejected
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Unsupported file type: {file_name} (accepted: {})", ACCEPTED_EXTENSIONS.join(", "))]
    UnsupportedFileType { file_name: String },
    #[error("The uploaded file is empty")]
    Empty,
    #[error("The uploaded file is too large ({size} bytes, limit {limit})")]
    TooLarge { size: usize, limit: usize },
    #[error("The uploaded file is not valid UTF-8 text")]
    NotText,
    #[error("No run_workflow() function found. Upload a workflow exported from Agent Builder.")]
    MissingEntrypoint,
}

/// Why a workflow name was rejected
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("Workflow name cannot be empty")]
    Empty,
    #[error("Workflow name can only contain letters, numbers, and underscores")]
    InvalidCharacters,
}

/// An upload that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    pub file_name: String,
    pub blob: Vec<u8>,
}

/// Validate an uploaded workflow file
pub fn validate_upload(
    file_name: &str,
    blob: Vec<u8>,
    max_bytes: usize,
) -> Result<ValidatedUpload, UploadError> {
    let lower = file_name.to_ascii_lowercase();
    if !ACCEPTED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return Err(UploadError::UnsupportedFileType {
            file_name: file_name.to_string(),
        });
    }
    if blob.is_empty() {
        return Err(UploadError::Empty);
    }
    if blob.len() > max_bytes {
        return Err(UploadError::TooLarge {
            size: blob.len(),
            limit: max_bytes,
        });
    }

    let source = std::str::from_utf8(&blob).map_err(|_| UploadError::NotText)?;
    if !defines_entrypoint(source) {
        return Err(UploadError::MissingEntrypoint);
    }

    Ok(ValidatedUpload {
        file_name: file_name.to_string(),
        blob,
    })
}

/// True if some line defines `run_workflow` at module level
fn defines_entrypoint(source: &str) -> bool {
    source.lines().any(|line| {
        let line = line.strip_prefix("async ").unwrap_or(line).trim_end();
        line.strip_prefix("def ")
            .map(str::trim_start)
            .and_then(|rest| rest.strip_prefix("run_workflow"))
            .is_some_and(|rest| rest.trim_start().starts_with('('))
    })
}

/// Turn user input into a registry name: trimmed, spaces to underscores,
/// lowercased, and restricted to `[a-z0-9_]`.
pub fn normalize_name(raw: &str) -> Result<String, NameError> {
    let name = raw.trim().replace(' ', "_").to_lowercase();
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(NameError::InvalidCharacters);
    }
    if !name.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(NameError::InvalidCharacters);
    }
    Ok(name)
}
