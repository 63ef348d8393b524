//! # foreman-runtime
//!
//! Routers, workers and the graphs that cycle between them, entity
//! reconciliation, streaming, and the chat service that runs turns.
//!
//! ## Architecture
//!
//! ```text
//!   ChatService::run_turn / stream_turn
//!          │  session lock, load checkpoint, append human message
//!          ▼
//!   ┌────────────────┐  decision   ┌──────────────────┐
//!   │   supervisor   │ ──────────▶ │  worker          │
//!   │   (Router)     │ ◀────────── │  extraction      │ ──▶ Reconciler ──▶ EntityStore
//!   └───────┬────────┘ tool result │  or subgraph     │
//!           │ plain answer         └──────────────────┘
//!           ▼
//!   final message / StreamEvents (via the Multiplexer)
//! ```

pub mod apps;
pub mod graph;
pub mod node;
pub mod reconcile;
pub mod service;
pub mod session;
pub mod stream;
pub mod template;

pub use apps::{App, AppDeps};
pub use graph::{Checkpointer, OrchestrationGraph, Transition};
pub use node::{AgentNode, ExtractionWorker, Invocation, Router};
pub use reconcile::{Reconciler, Reconciliation};
pub use service::{ChatService, ROOT_NODE, build_model};
pub use session::{SessionGuard, SessionLocks};
pub use stream::{Fragment, FragmentKind, Multiplexer, multiplex};
