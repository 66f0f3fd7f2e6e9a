//! Database module for the workflow relay
//!
//! Durable workflow storage keyed by (owner, name).

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Workflow not found: {name}")]
    WorkflowNotFound { owner: UserId, name: String },
    #[error("Workflow already exists: {name}")]
    DuplicateName { owner: UserId, name: String },
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Poison the connection mutex, as a panic mid-query would
    #[cfg(test)]
    pub fn poison_lock(&self) {
        let conn = Arc::clone(&self.conn);
        let _ = std::thread::spawn(move || {
            let _guard = conn.lock();
            panic!("connection lock poisoned on purpose");
        })
        .join();
    }

    // ==================== Workflow Operations ====================

    /// Register a new workflow under (owner, name).
    ///
    /// Fails with `DuplicateName` if the pair is already taken; replacing a
    /// workflow goes through [`Database::update_workflow`].
    pub fn put_workflow(
        &self,
        owner: &UserId,
        name: &str,
        file_name: &str,
        blob: &[u8],
    ) -> DbResult<WorkflowRef> {
        let conn = self.conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO workflows (id, owner, name, file_name, source_blob, sha256, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
            params![id, owner.as_str(), name, file_name, blob, digest_hex(blob), now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                DbError::DuplicateName {
                    owner: owner.clone(),
                    name: name.to_string(),
                }
            }
            other => DbError::Sqlite(other),
        })?;

        tracing::info!(user = %owner, workflow = %name, bytes = blob.len(), "Workflow stored");

        Ok(WorkflowRef {
            id,
            owner: owner.clone(),
            name: name.to_string(),
            version: 1,
        })
    }

    /// Get a workflow, including its source blob
    pub fn get_workflow(&self, owner: &UserId, name: &str) -> DbResult<Workflow> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, owner, name, file_name, source_blob, sha256, version, created_at, updated_at
             FROM workflows WHERE owner = ?1 AND name = ?2",
        )?;

        stmt.query_row(params![owner.as_str(), name], parse_workflow_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DbError::WorkflowNotFound {
                    owner: owner.clone(),
                    name: name.to_string(),
                },
                other => DbError::Sqlite(other),
            })
    }

    /// Replace the source of an existing workflow, bumping its version
    pub fn update_workflow(
        &self,
        owner: &UserId,
        name: &str,
        file_name: &str,
        blob: &[u8],
    ) -> DbResult<WorkflowRef> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let updated = conn.execute(
            "UPDATE workflows
             SET file_name = ?1, source_blob = ?2, sha256 = ?3, version = version + 1, updated_at = ?4
             WHERE owner = ?5 AND name = ?6",
            params![file_name, blob, digest_hex(blob), now, owner.as_str(), name],
        )?;

        if updated == 0 {
            return Err(DbError::WorkflowNotFound {
                owner: owner.clone(),
                name: name.to_string(),
            });
        }

        let (id, version): (String, i64) = conn.query_row(
            "SELECT id, version FROM workflows WHERE owner = ?1 AND name = ?2",
            params![owner.as_str(), name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        tracing::info!(user = %owner, workflow = %name, version, "Workflow updated");

        Ok(WorkflowRef {
            id,
            owner: owner.clone(),
            name: name.to_string(),
            version,
        })
    }

    /// List an owner's workflows, ordered by name
    pub fn list_workflows(&self, owner: &UserId) -> DbResult<Vec<WorkflowRef>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, owner, name, version FROM workflows WHERE owner = ?1 ORDER BY name ASC",
        )?;

        let rows = stmt.query_map(params![owner.as_str()], |row| {
            Ok(WorkflowRef {
                id: row.get(0)?,
                owner: UserId::new(row.get::<_, String>(1)?),
                name: row.get(2)?,
                version: row.get(3)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Check whether (owner, name) is registered
    pub fn workflow_exists(&self, owner: &UserId, name: &str) -> DbResult<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM workflows WHERE owner = ?1 AND name = ?2",
                params![owner.as_str(), name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Delete a workflow
    pub fn remove_workflow(&self, owner: &UserId, name: &str) -> DbResult<()> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM workflows WHERE owner = ?1 AND name = ?2",
            params![owner.as_str(), name],
        )?;

        if deleted == 0 {
            return Err(DbError::WorkflowNotFound {
                owner: owner.clone(),
                name: name.to_string(),
            });
        }

        tracing::info!(user = %owner, workflow = %name, "Workflow removed");
        Ok(())
    }
}

/// Parse a workflow row from the database
fn parse_workflow_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workflow> {
    Ok(Workflow {
        id: row.get(0)?,
        owner: UserId::new(row.get::<_, String>(1)?),
        name: row.get(2)?,
        file_name: row.get(3)?,
        source_blob: row.get(4)?,
        sha256: row.get(5)?,
        version: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        updated_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

fn digest_hex(blob: &[u8]) -> String {
    format!("{:x}", Sha256::digest(blob))
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
