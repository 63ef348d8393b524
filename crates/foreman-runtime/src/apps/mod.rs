//! Built-in apps. Each app is a fixed graph: a supervisor over a finite set
//! of specialists.

pub mod assistant;
pub mod iiot;

use foreman_core::AppInfo;
use foreman_llm::{DecisionTool, ModelCapability};
use foreman_memory::{EntityKind, EntityStore, WindowSpec};
use std::sync::Arc;

use crate::graph::{DEFAULT_MAX_CYCLES, OrchestrationGraph};
use crate::node::{AgentNode, ExtractionWorker, Router};
use crate::reconcile::Reconciler;

/// A registered app: its public description and the graph that runs its
/// turns.
pub struct App {
    pub info: AppInfo,
    pub graph: Arc<OrchestrationGraph>,
}

impl App {
    pub fn id(&self) -> &str {
        &self.info.id
    }
}

/// What every app graph is built from.
#[derive(Clone)]
pub struct AppDeps {
    pub model: Arc<dyn ModelCapability>,
    pub entities: Arc<dyn EntityStore>,
    pub window: WindowSpec,
    pub max_cycles: usize,
    reconciler: Arc<Reconciler>,
}

impl AppDeps {
    pub fn new(model: Arc<dyn ModelCapability>, entities: Arc<dyn EntityStore>) -> Self {
        let reconciler = Arc::new(Reconciler::new(model.clone(), entities.clone()));
        Self {
            model,
            entities,
            window: WindowSpec::default(),
            max_cycles: DEFAULT_MAX_CYCLES,
            reconciler,
        }
    }

    pub fn with_window(mut self, window: WindowSpec) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_cycles(mut self, max_cycles: usize) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    pub(crate) fn router(&self, template: &str, decision: DecisionTool) -> Router {
        Router::new(self.model.clone(), self.reconciler.clone(), template, decision)
            .with_window(self.window)
    }

    pub(crate) fn graph(&self, name: &str, supervisor: Router) -> OrchestrationGraph {
        OrchestrationGraph::new(name, supervisor).with_max_cycles(self.max_cycles)
    }

    pub(crate) fn extraction(&self, kind: EntityKind, guidance: &str) -> AgentNode {
        AgentNode::ExtractionWorker(
            ExtractionWorker::new(kind, guidance, self.reconciler.clone()).with_window(self.window),
        )
    }
}

/// Every built-in app, wired to `deps`.
pub fn builtin(deps: &AppDeps) -> Vec<App> {
    vec![iiot::app(deps), assistant::app(deps)]
}

pub(crate) fn info(id: &str, name: &str, description: &str) -> AppInfo {
    AppInfo {
        id: id.into(),
        name: name.into(),
        description: description.into(),
        version: env!("CARGO_PKG_VERSION").into(),
    }
}
