//! # foreman-memory
//!
//! Memory for the Foreman orchestrator:
//!
//! - **Short-term**: bounded context windows over a session's history.
//! - **Long-term**: persisted structured entities (customers, surveys,
//!   factories, user profiles, knowledge triples) scoped by request context.
//! - **Stores**: checkpoint, entity and session repositories, with
//!   in-memory and SQLite backends.

pub mod entity;
pub mod memory;
pub mod sqlite;
pub mod traits;
pub mod window;

pub use entity::EntityKind;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{CheckpointStore, EntityStore, SessionRepository};
pub use window::{UnitCounter, WindowSpec, merge_runs, select_window};
