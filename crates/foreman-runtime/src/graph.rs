//! The orchestration graph: a router cycling over its workers until it
//! answers without a route.

use foreman_core::{ConversationState, ForemanError, Message, Result, diagnostic};
use foreman_memory::CheckpointStore;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::node::{AgentNode, Invocation, Router};
use crate::stream::FragmentKind;

/// Default bound on router decisions per graph execution.
pub const DEFAULT_MAX_CYCLES: usize = 25;

/// Where control goes after a router decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Plain answer; the turn is over.
    Terminal,
    /// Run the worker at this index.
    Worker(usize),
    /// The decision named a route nobody handles.
    Error { route: String },
}

/// A registered route target.
pub struct Worker {
    pub route: String,
    pub node_name: String,
    pub node: AgentNode,
}

/// Commits the top-level state after every node transition.
pub struct Checkpointer {
    store: Arc<dyn CheckpointStore>,
    session_id: String,
}

impl Checkpointer {
    pub fn new(store: Arc<dyn CheckpointStore>, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
        }
    }

    pub async fn load(&self) -> Result<ConversationState> {
        self.store.load(&self.session_id).await
    }

    pub async fn commit(&self, state: &ConversationState) -> Result<()> {
        self.store.save(&self.session_id, state).await
    }
}

async fn commit(checkpoint: Option<&Checkpointer>, state: &ConversationState) -> Result<()> {
    match checkpoint {
        Some(c) => c.commit(state).await,
        None => Ok(()),
    }
}

pub struct OrchestrationGraph {
    name: String,
    supervisor: Router,
    workers: Vec<Worker>,
    max_cycles: usize,
}

impl OrchestrationGraph {
    pub fn new(name: impl Into<String>, supervisor: Router) -> Self {
        Self {
            name: name.into(),
            supervisor,
            workers: Vec::new(),
            max_cycles: DEFAULT_MAX_CYCLES,
        }
    }

    /// Route `route` to `node`, which runs under the path element
    /// `node_name`. The route is added to the supervisor's decision tool.
    pub fn with_worker(mut self, route: &str, node_name: &str, node: AgentNode) -> Self {
        let routes = &mut self.supervisor.decision.routes;
        if !routes.iter().any(|r| r == route) {
            routes.push(route.to_string());
        }
        self.workers.push(Worker {
            route: route.to_string(),
            node_name: node_name.to_string(),
            node,
        });
        self
    }

    pub fn with_max_cycles(mut self, max_cycles: usize) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn routes(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.route.as_str()).collect()
    }

    pub fn supervisor(&self) -> &Router {
        &self.supervisor
    }

    /// Pure transition policy. Only the first tool call counts; a call
    /// without a route argument is an unknown route.
    pub fn transition(&self, decision: &Message) -> Transition {
        let Some(call) = decision.first_tool_call() else {
            return Transition::Terminal;
        };
        let route = self
            .supervisor
            .decision
            .route_of(call)
            .unwrap_or("unknown");
        match self.workers.iter().position(|w| w.route == route) {
            Some(index) => Transition::Worker(index),
            None => Transition::Error {
                route: route.to_string(),
            },
        }
    }

    /// Run the graph from `state` until the supervisor answers.
    ///
    /// Worker failures become diagnostic tool messages and the cycle
    /// continues; supervisor failures and the cycle limit end the run.
    pub fn run<'a>(
        &'a self,
        inv: &'a Invocation,
        mut state: ConversationState,
        checkpoint: Option<&'a Checkpointer>,
    ) -> BoxFuture<'a, Result<ConversationState>> {
        async move {
            let mut cycles = 0;
            loop {
                if cycles == self.max_cycles {
                    warn!(graph = %self.name, limit = self.max_cycles, "Cycle limit reached");
                    return Err(ForemanError::CycleLimitExceeded {
                        limit: self.max_cycles,
                    });
                }

                cycles += 1;

                let decision = self.supervisor.decide(inv, &state, None).await?;
                let transition = self.transition(&decision);
                let call = decision.first_tool_call().cloned();
                state.push(decision);
                commit(checkpoint, &state).await?;

                let (call, content) = match (transition, call) {
                    (Transition::Terminal, _) | (_, None) => {
                        debug!(graph = %self.name, cycles, "Graph finished");
                        return Ok(state);
                    }
                    (Transition::Error { route }, Some(call)) => {
                        warn!(graph = %self.name, route = %route, "Unknown route");
                        (call, diagnostic(format!("unknown route {route}")))
                    }
                    (Transition::Worker(index), Some(call)) => {
                        let worker = &self.workers[index];
                        let instruction = self.supervisor.decision.instruction_of(&call);
                        info!(graph = %self.name, worker = %worker.node_name, "Routing to worker");
                        let child = inv.child(&worker.node_name);
                        let content = match worker.node.execute(&child, &state, instruction).await {
                            Ok(content) => content,
                            Err(e) if e.is_fatal() => return Err(e),
                            Err(e) => {
                                warn!(worker = %worker.node_name, error = %e, "Worker failed");
                                diagnostic(e)
                            }
                        };
                        (call, content)
                    }
                };

                inv.emit(FragmentKind::ToolResult {
                    content: content.clone(),
                    tool_call_id: call.id.clone(),
                })
                .await;
                state.push(Message::tool(call.id, content));
                commit(checkpoint, &state).await?;
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_core::{Context, ToolCall};
    use foreman_llm::{DecisionTool, MockModel};
    use crate::reconcile::Reconciler;
    use foreman_memory::InMemoryStore;
    use serde_json::json;

    fn graph(model: MockModel) -> OrchestrationGraph {
        let store = Arc::new(InMemoryStore::new());
        let model = Arc::new(model);
        let reconciler = Arc::new(Reconciler::new(model.clone(), store));
        let supervisor = Router::new(
            model.clone(),
            reconciler.clone(),
            "route",
            DecisionTool::route_intent(&[]),
        );
        let echo = Router::new(model, reconciler, "echo", DecisionTool::route_intent(&[]));
        OrchestrationGraph::new("supervisor", supervisor).with_worker(
            "echo",
            "echo_agent",
            AgentNode::Router(echo),
        )
    }

    #[test]
    fn test_transition_policy() {
        let g = graph(MockModel::new());
        assert_eq!(g.transition(&Message::ai("done")), Transition::Terminal);

        let routed = Message::ai("").with_tool_calls(vec![ToolCall::new(
            "RouteIntent",
            json!({"route": "echo"}),
        )]);
        assert_eq!(g.transition(&routed), Transition::Worker(0));

        let unknown = Message::ai("").with_tool_calls(vec![ToolCall::new(
            "RouteIntent",
            json!({"route": "nonexistent"}),
        )]);
        assert_eq!(
            g.transition(&unknown),
            Transition::Error {
                route: "nonexistent".into()
            }
        );

        let bare = Message::ai("").with_tool_calls(vec![ToolCall::new("RouteIntent", json!({}))]);
        assert_eq!(
            g.transition(&bare),
            Transition::Error {
                route: "unknown".into()
            }
        );
    }

    #[test]
    fn test_with_worker_extends_decision_routes() {
        let g = graph(MockModel::new());
        assert_eq!(g.supervisor().decision_tool().routes, vec!["echo".to_string()]);
        assert_eq!(g.routes(), vec!["echo"]);
    }

    #[tokio::test]
    async fn test_router_worker_answer_becomes_tool_result() {
        let g = graph(
            MockModel::new()
                .with_route("echo", "say hi")
                .with_response("hi")
                .with_response("all done"),
        );
        let inv = Invocation::new(Context::for_session("s"), "supervisor");
        let state = ConversationState::new(vec![Message::human("go")]);

        let out = g.run(&inv, state, None).await.unwrap();
        let roles: Vec<_> = out.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["human", "ai", "tool", "ai"]);
        assert_eq!(out.messages[2].content, "hi");
        assert_eq!(out.messages[2].tool_call_id, Some(out.messages[1].tool_calls[0].id.clone()));
        assert_eq!(out.messages[3].content, "all done");
    }

    #[tokio::test]
    async fn test_only_first_tool_call_is_routed() {
        let first = ToolCall::new("RouteIntent", json!({"route": "echo", "supervisor_message": "say hi"}));
        let second = ToolCall::new("RouteIntent", json!({"route": "nonexistent"}));
        let model = Arc::new(
            MockModel::new()
                .with_tool_calls(vec![first.clone(), second])
                .with_response("hi")
                .with_response("all done"),
        );
        let store = Arc::new(InMemoryStore::new());
        let reconciler = Arc::new(Reconciler::new(model.clone(), store));
        let supervisor = Router::new(
            model.clone(),
            reconciler.clone(),
            "route",
            DecisionTool::route_intent(&[]),
        );
        let echo = Router::new(model.clone(), reconciler, "echo", DecisionTool::route_intent(&[]));
        let g = OrchestrationGraph::new("supervisor", supervisor).with_worker(
            "echo",
            "echo_agent",
            AgentNode::Router(echo),
        );
        let inv = Invocation::new(Context::for_session("s"), "supervisor");

        let out = g
            .run(&inv, ConversationState::new(vec![Message::human("go")]), None)
            .await
            .unwrap();
        let roles: Vec<_> = out.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["human", "ai", "tool", "ai"]);
        assert_eq!(out.messages[2].tool_call_id.as_deref(), Some(first.id.as_str()));
        assert_eq!(out.messages[2].content, "hi");
        // supervisor, echo, supervisor
        assert_eq!(model.decide_requests.lock().len(), 3);
        assert_eq!(model.pending_decisions(), 0);
    }

    #[tokio::test]
    async fn test_call_without_route_gets_feedback() {
        let g = graph(
            MockModel::new()
                .with_tool_call("RouteIntent", json!({}))
                .with_response("sorry"),
        );
        let inv = Invocation::new(Context::for_session("s"), "supervisor");
        let out = g
            .run(&inv, ConversationState::new(vec![Message::human("go")]), None)
            .await
            .unwrap();
        assert_eq!(out.messages[2].content, "error: unknown route unknown");
        assert_eq!(out.messages[3].content, "sorry");
    }

    #[tokio::test]
    async fn test_cycle_limit() {
        let g = graph(
            MockModel::new()
                .with_route("nowhere", "")
                .with_route("nowhere", "")
                .with_route("nowhere", ""),
        )
        .with_max_cycles(2);
        let inv = Invocation::new(Context::for_session("s"), "supervisor");
        let err = g
            .run(&inv, ConversationState::new(vec![Message::human("go")]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ForemanError::CycleLimitExceeded { limit: 2 }));
    }
}
