//! # foreman-llm
//!
//! The model capability the orchestrator consumes: a route decision over a
//! finite set of permissible routes, structured extraction of an entity
//! kind, and a streaming variant of the decision.

pub mod mock;
pub mod openai;
pub mod provider;
pub mod retry;

pub use mock::MockModel;
pub use openai::OpenAiModel;
pub use provider::{
    DecisionRequest, DecisionTool, ExtractionRequest, ExtractionTarget, ModelCapability,
    ModelChunk, ModelSettings,
};
pub use retry::RetryingModel;
