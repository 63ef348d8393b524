//! # foreman-cli
//!
//! Command-line interface for the Foreman orchestrator.
//!
//! ## Commands
//!
//! - `foreman apps`: List the registered apps
//! - `foreman sessions`: List sessions
//! - `foreman new <app>`: Create a session bound to an app
//! - `foreman chat --session <id>`: Interactive chat against a session
//! - `foreman messages <session>`: Print a session's history
//! - `foreman config`: Show the effective configuration

pub mod commands;

pub use commands::Cli;
