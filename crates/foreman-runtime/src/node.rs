//! Graph nodes: routers that decide, and the workers they route to.

use foreman_core::{ConversationState, Context, ForemanError, Message, Result};
use foreman_llm::{DecisionRequest, DecisionTool, ModelCapability, ModelChunk};
use foreman_memory::{EntityKind, WindowSpec, merge_runs, select_window};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::graph::OrchestrationGraph;
use crate::reconcile::{Reconciler, Reconciliation};
use crate::stream::{Fragment, FragmentKind};
use crate::template::{Bindings, render};

/// Where a node runs and how it reports progress. Cheap to clone; a nested
/// graph gets a child invocation one path element deeper.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub ctx: Context,
    pub path: Vec<String>,
    events: Option<mpsc::Sender<Fragment>>,
}

impl Invocation {
    pub fn new(ctx: Context, root: &str) -> Self {
        Self {
            ctx,
            path: vec![root.to_string()],
            events: None,
        }
    }

    pub fn streaming(mut self, events: mpsc::Sender<Fragment>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn child(&self, name: &str) -> Self {
        let mut child = self.clone();
        child.path.push(name.to_string());
        child
    }

    pub fn is_streaming(&self) -> bool {
        self.events.is_some()
    }

    /// Emit a fragment at this invocation's path. A dropped receiver only
    /// means nobody is listening any more; the turn carries on.
    pub async fn emit(&self, kind: FragmentKind) {
        if let Some(tx) = &self.events {
            let _ = tx
                .send(Fragment {
                    node_path: self.path.clone(),
                    kind,
                })
                .await;
        }
    }
}

/// One node of an orchestration graph.
pub enum AgentNode {
    Router(Router),
    ExtractionWorker(ExtractionWorker),
    SubgraphWorker(Arc<OrchestrationGraph>),
}

impl AgentNode {
    /// Run the node as a worker and return the text its caller records as
    /// the tool result. A router used this way answers with its decision's
    /// content.
    pub fn execute<'a>(
        &'a self,
        inv: &'a Invocation,
        state: &'a ConversationState,
        instruction: Option<String>,
    ) -> BoxFuture<'a, Result<String>> {
        async move {
            // Nested routers never see the decision that routed to them.
            let upstream = || {
                let mut messages = state.messages.clone();
                messages.pop();
                ConversationState {
                    messages,
                    supervisor_message: instruction.clone(),
                }
            };
            match self {
                AgentNode::Router(router) => {
                    let decision = router.decide(inv, &upstream(), None).await?;
                    Ok(decision.content)
                }
                AgentNode::ExtractionWorker(worker) => worker.run(inv, state).await,
                AgentNode::SubgraphWorker(graph) => {
                    let done = graph.run(inv, upstream(), None).await?;
                    Ok(done.last().map(|m| m.content.clone()).unwrap_or_default())
                }
            }
        }
        .boxed()
    }
}

/// Appended to a router's prompt when its caller handed it an instruction.
const SUPERVISOR_NOTE: &str =
    "\n\nPlease review the following message from the supervisor agent: {message}";

/// A node whose only job is to choose the next route or answer.
pub struct Router {
    model: Arc<dyn ModelCapability>,
    reconciler: Arc<Reconciler>,
    template: String,
    snapshots: Vec<(String, EntityKind)>,
    pub(crate) decision: DecisionTool,
    window: WindowSpec,
}

impl Router {
    pub fn new(
        model: Arc<dyn ModelCapability>,
        reconciler: Arc<Reconciler>,
        template: impl Into<String>,
        decision: DecisionTool,
    ) -> Self {
        Self {
            model,
            reconciler,
            template: template.into(),
            snapshots: Vec::new(),
            decision,
            window: WindowSpec::default(),
        }
    }

    /// Bind the current value of `kind` to `{binding}` in the prompt.
    pub fn with_snapshot(mut self, binding: &str, kind: EntityKind) -> Self {
        self.snapshots.push((binding.to_string(), kind));
        self
    }

    pub fn with_window(mut self, window: WindowSpec) -> Self {
        self.window = window;
        self
    }

    pub fn decision_tool(&self) -> &DecisionTool {
        &self.decision
    }

    /// Render the system prompt with the latest entity snapshots. A kind
    /// whose scope is missing from the context renders as absent.
    pub async fn system_prompt(&self, ctx: &Context, instruction: Option<&str>) -> Result<String> {
        let mut bindings = Bindings::new();
        for (binding, kind) in &self.snapshots {
            let value = match self.reconciler.snapshot(ctx, *kind).await {
                Ok(value) => value,
                Err(ForemanError::MissingScope { .. }) => None,
                Err(e) => return Err(e),
            };
            let rendered = match value {
                Some(v) => serde_json::to_string_pretty(&v)?,
                None => "None".to_string(),
            };
            bindings.insert(binding.as_str(), rendered);
        }
        let mut prompt = render(&self.template, &bindings);
        if let Some(message) = instruction.filter(|m| !m.is_empty()) {
            prompt.push_str(&render(
                SUPERVISOR_NOTE,
                &Bindings::from([("message", message.to_string())]),
            ));
        }
        Ok(prompt)
    }

    /// One decision step over the windowed conversation.
    pub async fn decide(
        &self,
        inv: &Invocation,
        state: &ConversationState,
        instruction: Option<&str>,
    ) -> Result<Message> {
        let instruction = instruction.or(state.supervisor_message.as_deref());
        let request = DecisionRequest {
            system: self.system_prompt(&inv.ctx, instruction).await?,
            messages: select_window(&state.messages, &self.window),
            decision: self.decision.clone(),
        };
        debug!(
            path = ?inv.path,
            window = request.messages.len(),
            "Router deciding"
        );

        if !inv.is_streaming() {
            return self.model.decide(&request).await;
        }

        let mut chunks = self.model.stream_decide(&request).await?;
        while let Some(chunk) = chunks.recv().await {
            match chunk {
                ModelChunk::TextDelta(text) => {
                    inv.emit(FragmentKind::AiDelta {
                        content: text,
                        tool_call_deltas: Vec::new(),
                    })
                    .await;
                }
                ModelChunk::ToolCallDelta(delta) => {
                    inv.emit(FragmentKind::AiDelta {
                        content: String::new(),
                        tool_call_deltas: vec![delta],
                    })
                    .await;
                }
                ModelChunk::Complete(message) => return Ok(message),
                ModelChunk::Error(e) => return Err(ForemanError::Model(e)),
            }
        }
        Err(ForemanError::Stream(
            "model stream ended before the decision completed".into(),
        ))
    }
}

/// A worker that reconciles one entity kind from the recent conversation.
pub struct ExtractionWorker {
    kind: EntityKind,
    guidance: String,
    reconciler: Arc<Reconciler>,
    window: WindowSpec,
}

impl ExtractionWorker {
    pub fn new(kind: EntityKind, guidance: impl Into<String>, reconciler: Arc<Reconciler>) -> Self {
        Self {
            kind,
            guidance: guidance.into(),
            reconciler,
            window: WindowSpec::default().for_extraction(),
        }
    }

    pub fn with_window(mut self, window: WindowSpec) -> Self {
        self.window = window.for_extraction();
        self
    }

    /// The slice the reconciler sees: the extraction window without its
    /// last message, which is the decision that routed here.
    pub fn slice(&self, messages: &[Message]) -> Vec<Message> {
        let mut window = select_window(messages, &self.window);
        window.pop();
        merge_runs(window)
    }

    pub async fn run(&self, inv: &Invocation, state: &ConversationState) -> Result<String> {
        let slice = self.slice(&state.messages);
        let outcome = self
            .reconciler
            .reconcile(&inv.ctx, &slice, self.kind, &self.guidance)
            .await?;
        Ok(match outcome {
            Reconciliation::NoUpdate => "no updates".to_string(),
            Reconciliation::Updated(_) => format!("updated {}", self.kind.label()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_llm::MockModel;
    use foreman_memory::{EntityStore, InMemoryStore};
    use serde_json::json;

    fn router(model: Arc<MockModel>, store: Arc<InMemoryStore>) -> Router {
        Router::new(
            model.clone(),
            Arc::new(Reconciler::new(model, store)),
            "You help with {{projects}}. Customer: {customer}",
            DecisionTool::route_intent(&["update_customer"]),
        )
        .with_snapshot("customer", EntityKind::Customer)
    }

    #[tokio::test]
    async fn test_prompt_renders_snapshot() {
        let store = Arc::new(InMemoryStore::new());
        store
            .store(EntityKind::Customer, "c1", &json!({"name": "Acme"}))
            .await
            .unwrap();
        let r = router(Arc::new(MockModel::new()), store);
        let ctx = Context::for_session("s").with_customer("c1");

        let prompt = r.system_prompt(&ctx, None).await.unwrap();
        assert!(prompt.starts_with("You help with {projects}. Customer: {"));
        assert!(prompt.contains("\"Acme\""));
    }

    #[tokio::test]
    async fn test_prompt_missing_scope_renders_none() {
        let r = router(Arc::new(MockModel::new()), Arc::new(InMemoryStore::new()));
        let prompt = r
            .system_prompt(&Context::for_session("s"), Some("add a machine"))
            .await
            .unwrap();
        assert!(prompt.contains("Customer: None"));
        assert!(prompt.ends_with(
            "Please review the following message from the supervisor agent: add a machine"
        ));
    }

    #[tokio::test]
    async fn test_streaming_decision_emits_fragments() {
        let model = Arc::new(MockModel::new().with_response("Hello there"));
        let r = router(model, Arc::new(InMemoryStore::new()));
        let (tx, mut rx) = mpsc::channel(16);
        let inv = Invocation::new(Context::for_session("s"), "supervisor").streaming(tx);
        let state = ConversationState::new(vec![Message::human("hi")]);

        let message = r.decide(&inv, &state, None).await.unwrap();
        drop(inv);
        assert_eq!(message.content, "Hello there");

        let mut text = String::new();
        while let Some(f) = rx.recv().await {
            assert_eq!(f.node_path, vec!["supervisor".to_string()]);
            if let FragmentKind::AiDelta { content, .. } = f.kind {
                text.push_str(&content);
            }
        }
        assert_eq!(text, "Hello there");
    }

    #[tokio::test]
    async fn test_streaming_model_failure_keeps_reason() {
        let model = Arc::new(MockModel::new().with_error("connection reset"));
        let r = router(model, Arc::new(InMemoryStore::new()));
        let (tx, _rx) = mpsc::channel(16);
        let inv = Invocation::new(Context::for_session("s"), "supervisor").streaming(tx);
        let state = ConversationState::new(vec![Message::human("hi")]);

        let err = r.decide(&inv, &state, None).await.unwrap_err();
        assert_eq!(err.to_string(), "model error: connection reset");
    }

    #[test]
    fn test_extraction_slice_drops_decision() {
        let worker = ExtractionWorker::new(
            EntityKind::Customer,
            "",
            Arc::new(Reconciler::new(
                Arc::new(MockModel::new()),
                Arc::new(InMemoryStore::new()),
            )),
        );
        let messages = vec![
            Message::human("one"),
            Message::human("two"),
            Message::ai("").with_tool_calls(vec![foreman_core::ToolCall::new("RouteIntent", json!({}))]),
        ];
        let slice = worker.slice(&messages);
        assert_eq!(slice.len(), 1);
        assert_eq!(slice[0].content, "one\ntwo");
    }

    #[test]
    fn test_child_invocation_path() {
        let inv = Invocation::new(Context::default(), "supervisor");
        assert_eq!(inv.child("survey_agent").path, vec!["supervisor", "survey_agent"]);
        assert!(!inv.is_streaming());
    }
}
