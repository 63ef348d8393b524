use async_trait::async_trait;
use foreman_core::{ConversationState, ForemanError, Result, Session};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::entity::EntityKind;
use crate::traits::*;

/// SQLite-backed store holding sessions, checkpoints and entities.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

fn store_err(e: rusqlite::Error) -> ForemanError {
    ForemanError::Store(e.to_string())
}

impl SqliteStore {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening store");

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(store_err)?;
        Self::init(conn)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(store_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(store_err)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                app_name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS checkpoints (
                session_id TEXT PRIMARY KEY,
                messages_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entities (
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                value_json TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (kind, key)
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_created ON sessions(created_at);
            ",
        )
        .map_err(store_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn load(&self, session_id: &str) -> Result<ConversationState> {
        let db = self.db.lock();
        let json: Option<String> = db
            .query_row(
                "SELECT messages_json FROM checkpoints WHERE session_id = ?1",
                rusqlite::params![session_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err)?;

        match json {
            Some(j) => Ok(ConversationState::new(serde_json::from_str(&j)?)),
            None => Ok(ConversationState::default()),
        }
    }

    async fn save(&self, session_id: &str, state: &ConversationState) -> Result<()> {
        let json = serde_json::to_string(&state.messages)?;
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock();
        db.execute(
            "INSERT INTO checkpoints (session_id, messages_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE SET
                messages_json = excluded.messages_json,
                updated_at = excluded.updated_at",
            rusqlite::params![session_id, json, now],
        )
        .map_err(store_err)?;
        debug!(session_id, messages = state.messages.len(), "checkpoint saved");
        Ok(())
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn find(&self, kind: EntityKind, key: &str) -> Result<Option<Value>> {
        let db = self.db.lock();
        let json: Option<String> = db
            .query_row(
                "SELECT value_json FROM entities WHERE kind = ?1 AND key = ?2",
                rusqlite::params![kind.name(), key],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err)?;

        json.map(|j| serde_json::from_str(&j).map_err(ForemanError::from))
            .transpose()
    }

    async fn store(&self, kind: EntityKind, key: &str, entity: &Value) -> Result<()> {
        let json = serde_json::to_string(entity)?;
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock();
        db.execute(
            "INSERT INTO entities (kind, key, value_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(kind, key) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at",
            rusqlite::params![kind.name(), key, json, now],
        )
        .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for SqliteStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO sessions (id, app_name, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                session.id,
                session.app_name,
                session.created_at.to_rfc3339()
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn find_session(&self, id: &str) -> Result<Option<Session>> {
        let db = self.db.lock();
        db.query_row(
            "SELECT id, app_name, created_at FROM sessions WHERE id = ?1",
            rusqlite::params![id],
            session_from_row,
        )
        .optional()
        .map_err(store_err)
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT id, app_name, created_at FROM sessions ORDER BY created_at, rowid")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], session_from_row)
            .map_err(store_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)?;
        Ok(rows)
    }
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let created_at: String = row.get(2)?;
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(Session {
        id: row.get(0)?,
        app_name: row.get(1)?,
        created_at,
    })
}
