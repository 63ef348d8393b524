use async_trait::async_trait;
use foreman_core::{ConversationState, Result, Session};
use serde_json::Value;

use crate::entity::EntityKind;

/// Conversation checkpoints, keyed by session id.
///
/// Implementations must make a `save` visible to every later `load` of the
/// same session.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The last committed state, or an empty state for an unknown session.
    async fn load(&self, session_id: &str) -> Result<ConversationState>;

    async fn save(&self, session_id: &str, state: &ConversationState) -> Result<()>;
}

/// Latest-value store for structured entities.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find(&self, kind: EntityKind, key: &str) -> Result<Option<Value>>;

    /// Replace the value for `(kind, key)`.
    async fn store(&self, kind: EntityKind, key: &str, entity: &Value) -> Result<()>;
}

/// Session registry.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<()>;

    async fn find_session(&self, id: &str) -> Result<Option<Session>>;

    /// All sessions, oldest first.
    async fn list_sessions(&self) -> Result<Vec<Session>>;
}
