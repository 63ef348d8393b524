//! # foreman-config
//!
//! Configuration for Foreman. Reads `foreman.toml`, then applies environment
//! variable overrides on top.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    AgentConfig, ConfigWarning, ForemanConfig, LoggingConfig, MemoryConfig, ModelConfig,
    WarningSeverity,
};
