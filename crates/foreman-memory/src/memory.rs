use async_trait::async_trait;
use foreman_core::{ConversationState, ForemanError, Result, Session};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

use crate::entity::EntityKind;
use crate::traits::*;

/// Process-local store for tests and throwaway sessions.
#[derive(Default)]
pub struct InMemoryStore {
    checkpoints: RwLock<HashMap<String, ConversationState>>,
    entities: RwLock<HashMap<(EntityKind, String), Value>>,
    sessions: RwLock<Vec<Session>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStore {
    async fn load(&self, session_id: &str) -> Result<ConversationState> {
        Ok(self
            .checkpoints
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, session_id: &str, state: &ConversationState) -> Result<()> {
        // Checkpoints never carry the transient supervisor instruction
        let committed = ConversationState::new(state.messages.clone());
        self.checkpoints
            .write()
            .insert(session_id.to_string(), committed);
        Ok(())
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn find(&self, kind: EntityKind, key: &str) -> Result<Option<Value>> {
        Ok(self.entities.read().get(&(kind, key.to_string())).cloned())
    }

    async fn store(&self, kind: EntityKind, key: &str, entity: &Value) -> Result<()> {
        self.entities
            .write()
            .insert((kind, key.to_string()), entity.clone());
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write();
        if sessions.iter().any(|s| s.id == session.id) {
            return Err(ForemanError::Store(format!(
                "session already exists: {}",
                session.id
            )));
        }
        sessions.push(session.clone());
        Ok(())
    }

    async fn find_session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().iter().find(|s| s.id == id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.sessions.read().clone())
    }
}
