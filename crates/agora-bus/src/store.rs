//! SQLite-backed persistence collaborator.
//!
//! Implements [`EventHooks`] so a node can durably record registered
//! agents, task outcomes, and an audit trail of observed envelopes. The
//! core never reads any of this back; the store exposes its own query
//! surface for ops tooling and tests.

use agora_types::capability::Capability;
use agora_types::envelope::Envelope;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{error, info};

use crate::hooks::EventHooks;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A recorded task outcome.
#[derive(Debug, Clone)]
pub struct StoredTaskResult {
    pub task_id: String,
    pub status: String,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// One row of the message audit trail.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: String,
    pub sender: String,
    pub recipient: String,
    pub kind: String,
}

/// SQLite store guarding one connection behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        info!(path = %path.display(), "Store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (tests).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agents (
                agent_id     TEXT PRIMARY KEY,
                name         TEXT NOT NULL,
                capabilities TEXT,
                updated_at   TEXT
            );

            CREATE TABLE IF NOT EXISTS task_results (
                task_id       TEXT PRIMARY KEY,
                status        TEXT,
                result        TEXT,
                error_message TEXT,
                completed_at  TEXT
            );

            CREATE TABLE IF NOT EXISTS messages (
                message_id  TEXT PRIMARY KEY,
                sender      TEXT,
                recipient   TEXT,
                kind        TEXT,
                payload     TEXT,
                signature   TEXT,
                timestamp   TEXT,
                observed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_task_results_status ON task_results(status);
            CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender);
            CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient);",
        )
    }

    /// Look up a recorded task outcome.
    pub fn task_result(&self, task_id: &str) -> Result<Option<StoredTaskResult>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT task_id, status, result, error_message FROM task_results WHERE task_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![task_id], |row| {
            Ok(StoredTaskResult {
                task_id: row.get(0)?,
                status: row.get(1)?,
                result: row.get(2)?,
                error: row.get(3)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }

    /// Most recently observed envelopes, newest first.
    pub fn recent_messages(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT message_id, sender, recipient, kind FROM messages
             ORDER BY observed_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(StoredMessage {
                message_id: row.get(0)?,
                sender: row.get(1)?,
                recipient: row.get(2)?,
                kind: row.get(3)?,
            })
        })?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Names of all recorded agents.
    pub fn agent_names(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare("SELECT name FROM agents ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }
}

impl EventHooks for SqliteStore {
    fn on_agent_registered(&self, agent_id: &str, name: &str, capabilities: &[Capability]) {
        let caps = serde_json::to_string(capabilities).unwrap_or_else(|_| "[]".to_string());
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = conn.execute(
            "INSERT OR REPLACE INTO agents (agent_id, name, capabilities, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![agent_id, name, caps, Utc::now().to_rfc3339()],
        ) {
            error!(error = %e, agent_id, "Failed to record agent");
        }
    }

    fn on_task_result(
        &self,
        task_id: &str,
        status: &str,
        result: Option<&Value>,
        error_message: Option<&str>,
    ) {
        let result_json = result.map(|v| v.to_string());
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = conn.execute(
            "INSERT OR REPLACE INTO task_results (task_id, status, result, error_message, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![task_id, status, result_json, error_message, Utc::now().to_rfc3339()],
        ) {
            error!(error = %e, task_id, "Failed to record task result");
        }
    }

    fn on_message_observed(&self, envelope: &Envelope) {
        let payload = Value::Object(envelope.payload.clone()).to_string();
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = conn.execute(
            "INSERT OR REPLACE INTO messages
             (message_id, sender, recipient, kind, payload, signature, timestamp, observed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                envelope.id,
                envelope.sender,
                envelope.recipient,
                envelope.kind.to_string(),
                payload,
                envelope.signature,
                envelope.timestamp.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        ) {
            error!(error = %e, message_id = %envelope.id, "Failed to record message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_types::envelope::EnvelopeKind;

    #[test]
    fn test_record_and_query_task_result() {
        let store = SqliteStore::in_memory().unwrap();
        store.on_task_result("t-1", "completed", Some(&Value::from(5)), None);

        let record = store.task_result("t-1").unwrap().unwrap();
        assert_eq!(record.status, "completed");
        assert_eq!(record.result.as_deref(), Some("5"));
        assert!(record.error.is_none());

        assert!(store.task_result("t-404").unwrap().is_none());
    }

    #[test]
    fn test_record_agent_and_messages() {
        let store = SqliteStore::in_memory().unwrap();
        store.on_agent_registered("calc-1", "Calculator", &[Capability::new("add", "Add")]);
        assert_eq!(store.agent_names().unwrap(), vec!["Calculator".to_string()]);

        let env = Envelope::new(EnvelopeKind::TaskRequest, "a", "b");
        store.on_message_observed(&env);
        let messages = store.recent_messages(10).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "a");
        assert_eq!(messages[0].kind, "task_request");
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agora.db");
        let store = SqliteStore::open(&path).unwrap();
        store.on_task_result("t-1", "failed", None, Some("boom"));
        assert!(path.exists());
    }
}
