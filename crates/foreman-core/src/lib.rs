//! # foreman-core
//!
//! Core types for the Foreman agent orchestrator: conversation messages,
//! stream events, request context and the shared error taxonomy.
//! Every other crate in the workspace speaks this vocabulary.

pub mod context;
pub mod error;
pub mod event;
pub mod message;
pub mod state;

pub use context::{AppInfo, Context, Session};
pub use error::{ForemanError, Result};
pub use event::StreamEvent;
pub use message::{Message, Role, ToolCall, ToolCallDelta};
pub use state::ConversationState;

/// Prefix carried by every message or event that reports a contained failure.
pub const DIAGNOSTIC_PREFIX: &str = "error: ";

/// Format a failure as diagnostic content.
pub fn diagnostic(reason: impl std::fmt::Display) -> String {
    format!("{DIAGNOSTIC_PREFIX}{reason}")
}
