//! The chat service: apps, sessions, and turns against them.

use chrono::Utc;
use foreman_config::ForemanConfig;
use foreman_core::{
    AppInfo, ConversationState, Context, ForemanError, Message, Result, Session, StreamEvent,
    diagnostic,
};
use foreman_llm::{MockModel, ModelCapability, ModelSettings, OpenAiModel, RetryingModel};
use foreman_memory::{
    CheckpointStore, EntityStore, InMemoryStore, SessionRepository, SqliteStore, UnitCounter,
    WindowSpec,
};
use futures::stream::BoxStream;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::apps::{App, AppDeps, builtin};
use crate::graph::Checkpointer;
use crate::node::Invocation;
use crate::session::SessionLocks;
use crate::stream::multiplex;

/// Name of the root element of every node path.
pub const ROOT_NODE: &str = "supervisor";

/// Fragments buffered between a running turn and its consumer.
const STREAM_BUFFER: usize = 256;

pub struct ChatService {
    apps: RwLock<BTreeMap<String, Arc<App>>>,
    sessions: Arc<dyn SessionRepository>,
    checkpoints: Arc<dyn CheckpointStore>,
    locks: SessionLocks,
}

impl ChatService {
    pub fn new(sessions: Arc<dyn SessionRepository>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            apps: RwLock::new(BTreeMap::new()),
            sessions,
            checkpoints,
            locks: SessionLocks::new(),
        }
    }

    /// Build a service with the built-in apps from configuration.
    pub fn from_config(config: &ForemanConfig) -> Result<Self> {
        let model = build_model(config)?;
        let counter = UnitCounter::parse(&config.agent.window_unit).ok_or_else(|| {
            ForemanError::ConfigValidation {
                field: "agent.window_unit".into(),
                reason: format!("unknown unit '{}'", config.agent.window_unit),
            }
        })?;
        let window = WindowSpec::new(config.agent.context_window, counter);

        let (sessions, checkpoints, entities) = match config.memory.backend.as_str() {
            "memory" => split(Arc::new(InMemoryStore::new())),
            _ => split(Arc::new(SqliteStore::open(&config.memory.db_path)?)),
        };

        let deps = AppDeps::new(model, entities)
            .with_window(window)
            .with_max_cycles(config.agent.max_cycles);
        let service = Self::new(sessions, checkpoints);
        for app in builtin(&deps) {
            service.add_app(app);
        }
        Ok(service)
    }

    /// Register an app. An app with the same id is replaced.
    pub fn add_app(&self, app: App) {
        info!(app = %app.id(), "App registered");
        self.apps.write().insert(app.id().to_string(), Arc::new(app));
    }

    pub fn list_apps(&self) -> Vec<AppInfo> {
        let apps: Vec<AppInfo> = self.apps.read().values().map(|a| a.info.clone()).collect();
        info!(count = apps.len(), "Apps listed");
        apps
    }

    pub fn find_app(&self, app_id: &str) -> Option<AppInfo> {
        self.apps.read().get(app_id).map(|a| a.info.clone())
    }

    pub async fn create_session(&self, app_id: &str) -> Result<Session> {
        if !self.apps.read().contains_key(app_id) {
            return Err(ForemanError::UnknownApp(app_id.to_string()));
        }
        let session = Session {
            id: Uuid::new_v4().to_string(),
            app_name: app_id.to_string(),
            created_at: Utc::now(),
        };
        self.sessions.create_session(&session).await?;
        info!(session_id = %session.id, app = %app_id, "Session created");
        Ok(session)
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let sessions = self.sessions.list_sessions().await?;
        info!(count = sessions.len(), "Sessions listed");
        Ok(sessions)
    }

    /// Messages of a session with non-empty content, in order.
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        self.require_session(session_id).await?;
        let state = self.checkpoints.load(session_id).await?;
        let messages: Vec<Message> = state.visible().cloned().collect();
        info!(session_id = %session_id, count = messages.len(), "Messages listed");
        Ok(messages)
    }

    /// Run one turn and return the content of the final message.
    ///
    /// Collaborator failures come back as diagnostic content; only
    /// precondition failures and the cycle limit are errors.
    pub async fn run_turn(&self, ctx: &Context, content: &str) -> Result<String> {
        let (session, app) = self.resolve(ctx).await?;
        let _guard = self.locks.acquire(&session.id).await;
        info!(session_id = %session.id, app = %app.id(), "Message sent");

        let inv = Invocation::new(ctx.clone(), ROOT_NODE);
        let checkpoint = Checkpointer::new(self.checkpoints.clone(), &session.id);
        let outcome = match begin_turn(&checkpoint, content).await {
            Ok(state) => app.graph.run(&inv, state, Some(&checkpoint)).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(state) => {
                info!(session_id = %session.id, messages = state.messages.len(), "Turn finished");
                Ok(state.last().map(|m| m.content.clone()).unwrap_or_default())
            }
            Err(e) if e.is_fatal() => {
                warn!(session_id = %session.id, error = %e, "Turn aborted");
                Err(e)
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Turn failed");
                Ok(diagnostic(e))
            }
        }
    }

    /// Run one turn in the background and stream its events.
    ///
    /// Precondition failures are returned before anything runs. Every other
    /// failure ends the stream with one diagnostic event.
    pub async fn stream_turn(
        &self,
        ctx: &Context,
        content: &str,
    ) -> Result<BoxStream<'static, StreamEvent>> {
        let (session, app) = self.resolve(ctx).await?;
        let locks = self.locks.clone();
        let checkpoints = self.checkpoints.clone();
        let ctx = ctx.clone();
        let content = content.to_string();

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let task = tokio::spawn(async move {
            let _guard = locks.acquire(&session.id).await;
            info!(session_id = %session.id, app = %app.id(), "Streaming started");
            let inv = Invocation::new(ctx, ROOT_NODE).streaming(tx);
            let checkpoint = Checkpointer::new(checkpoints, &session.id);
            let state = begin_turn(&checkpoint, &content).await?;
            app.graph.run(&inv, state, Some(&checkpoint)).await?;
            info!(session_id = %session.id, "Streaming complete");
            Ok::<_, ForemanError>(())
        });
        Ok(multiplex(rx, task))
    }

    async fn resolve(&self, ctx: &Context) -> Result<(Session, Arc<App>)> {
        let session_id = ctx
            .session_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(ForemanError::MissingSession)?;
        let session = self.require_session(session_id).await?;
        let app = self
            .apps
            .read()
            .get(&session.app_name)
            .cloned()
            .ok_or_else(|| ForemanError::UnknownApp(session.app_name.clone()))?;
        Ok((session, app))
    }

    async fn require_session(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .find_session(session_id)
            .await?
            .ok_or_else(|| ForemanError::SessionNotFound(session_id.to_string()))
    }
}

type Stores = (
    Arc<dyn SessionRepository>,
    Arc<dyn CheckpointStore>,
    Arc<dyn EntityStore>,
);

/// One backend serving sessions, checkpoints and entities.
fn split<S>(store: Arc<S>) -> Stores
where
    S: SessionRepository + CheckpointStore + EntityStore + 'static,
{
    (store.clone(), store.clone(), store)
}

/// Load the committed state and append the human message.
async fn begin_turn(checkpoint: &Checkpointer, content: &str) -> Result<ConversationState> {
    let mut state = checkpoint.load().await?;
    state.push(Message::human(content));
    checkpoint.commit(&state).await?;
    Ok(state)
}

/// The model adapter named by `model.provider`.
pub fn build_model(config: &ForemanConfig) -> Result<Arc<dyn ModelCapability>> {
    let settings = &config.model;
    match settings.provider.as_str() {
        "mock" => Ok(Arc::new(MockModel::new())),
        "openai" => {
            let api_key = settings
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .ok_or_else(|| ForemanError::Config("OPENAI_API_KEY not set".into()))?;
            let mut model = OpenAiModel::new(
                api_key,
                ModelSettings {
                    model: settings.model.clone(),
                    temperature: settings.temperature,
                    max_tokens: settings.max_tokens,
                },
            );
            if let Some(url) = &settings.base_url {
                model = model.with_base_url(url.clone());
            }
            Ok(Arc::new(RetryingModel::new(Arc::new(model))))
        }
        other => Err(ForemanError::ConfigValidation {
            field: "model.provider".into(),
            reason: format!("unknown provider '{other}'"),
        }),
    }
}
