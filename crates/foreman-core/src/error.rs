use thiserror::Error;

/// Unified error type for the Foreman orchestrator.
#[derive(Error, Debug)]
pub enum ForemanError {
    // ── Model errors ───────────────────────────────────────────
    #[error("model error: {0}")]
    Model(String),

    #[error("model rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // ── Store errors ───────────────────────────────────────────
    #[error("store error: {0}")]
    Store(String),

    // ── Reconciliation errors ──────────────────────────────────
    #[error("invalid {kind}: {reason}")]
    Validation { kind: String, reason: String },

    #[error("{kind} requires {field} in the request context")]
    MissingScope { kind: String, field: String },

    // ── Session errors (preconditions) ─────────────────────────
    #[error("context has no session id")]
    MissingSession,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("unknown app: {0}")]
    UnknownApp(String),

    // ── Orchestration errors ───────────────────────────────────
    #[error("cycle limit exceeded: more than {limit} supervisor turns")]
    CycleLimitExceeded { limit: usize },

    #[error("stream error: {0}")]
    Stream(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ForemanError {
    /// Errors raised before any graph execution because the session
    /// reference could not be resolved.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ForemanError::MissingSession
                | ForemanError::SessionNotFound(_)
                | ForemanError::UnknownApp(_)
        )
    }

    /// Errors that must end the turn instead of being turned into a
    /// diagnostic message.
    pub fn is_fatal(&self) -> bool {
        self.is_precondition() || matches!(self, ForemanError::CycleLimitExceeded { .. })
    }
}

pub type Result<T> = std::result::Result<T, ForemanError>;
