//! Mock model for deterministic testing.
//!
//! Returns pre-configured decisions and extractions without making any
//! HTTP calls.

use async_trait::async_trait;
use foreman_core::{ForemanError, Message, Result, ToolCall, ToolCallDelta};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::provider::*;

/// A pre-configured decision.
#[derive(Debug, Clone)]
pub enum MockDecision {
    /// Plain ai text, i.e. a terminal answer.
    Text(String),
    /// Pick `route` on whatever decision tool the request binds.
    Route {
        route: String,
        instruction: Option<String>,
    },
    /// Raw tool calls, bypassing the request's decision tool.
    ToolCalls(Vec<ToolCall>),
    Error(String),
}

/// A pre-configured extraction outcome.
#[derive(Debug, Clone)]
pub enum MockExtraction {
    Responses(Vec<Value>),
    Error(String),
}

/// A mock model that replays queued responses in order.
///
/// # Example
/// ```
/// use foreman_llm::MockModel;
/// let model = MockModel::new()
///     .with_route("update_customer", "store the new name")
///     .with_extraction(serde_json::json!({"name": "Acme"}))
///     .with_response("Done.");
/// ```
#[derive(Default)]
pub struct MockModel {
    decisions: Mutex<VecDeque<MockDecision>>,
    extractions: Mutex<VecDeque<MockExtraction>>,
    /// Every decision request received, for assertions in tests.
    pub decide_requests: Arc<Mutex<Vec<DecisionRequest>>>,
    /// Every extraction request received.
    pub extract_requests: Arc<Mutex<Vec<ExtractionRequest>>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain text answer.
    pub fn with_response(self, text: &str) -> Self {
        self.decisions
            .lock()
            .push_back(MockDecision::Text(text.to_string()));
        self
    }

    /// Queue a route decision with an instruction for the worker.
    pub fn with_route(self, route: &str, instruction: &str) -> Self {
        self.decisions.lock().push_back(MockDecision::Route {
            route: route.to_string(),
            instruction: Some(instruction.to_string()),
        });
        self
    }

    /// Queue a route decision without an instruction.
    pub fn with_bare_route(self, route: &str) -> Self {
        self.decisions.lock().push_back(MockDecision::Route {
            route: route.to_string(),
            instruction: None,
        });
        self
    }

    /// Queue a raw tool call.
    pub fn with_tool_call(self, name: &str, args: Value) -> Self {
        self.decisions
            .lock()
            .push_back(MockDecision::ToolCalls(vec![ToolCall::new(name, args)]));
        self
    }

    /// Queue several tool calls in one decision message.
    pub fn with_tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.decisions.lock().push_back(MockDecision::ToolCalls(calls));
        self
    }

    /// Queue a decision failure.
    pub fn with_error(self, error: &str) -> Self {
        self.decisions
            .lock()
            .push_back(MockDecision::Error(error.to_string()));
        self
    }

    /// Queue an extraction yielding one candidate.
    pub fn with_extraction(self, candidate: Value) -> Self {
        self.extractions
            .lock()
            .push_back(MockExtraction::Responses(vec![candidate]));
        self
    }

    /// Queue an extraction yielding the given candidates (possibly none).
    pub fn with_extractions(self, candidates: Vec<Value>) -> Self {
        self.extractions
            .lock()
            .push_back(MockExtraction::Responses(candidates));
        self
    }

    /// Queue an extraction failure.
    pub fn with_extraction_error(self, error: &str) -> Self {
        self.extractions
            .lock()
            .push_back(MockExtraction::Error(error.to_string()));
        self
    }

    /// Number of decisions not yet consumed.
    pub fn pending_decisions(&self) -> usize {
        self.decisions.lock().len()
    }

    fn next_decision(&self) -> MockDecision {
        self.decisions
            .lock()
            .pop_front()
            .unwrap_or_else(|| MockDecision::Text("(mock: no more queued responses)".into()))
    }

    fn resolve(decision: MockDecision, request: &DecisionRequest) -> Result<Message> {
        match decision {
            MockDecision::Text(text) => Ok(Message::ai(text)),
            MockDecision::Route { route, instruction } => {
                let tool = &request.decision;
                let mut args = serde_json::Map::new();
                args.insert(tool.route_field.clone(), json!(route));
                if let (Some(field), Some(text)) = (&tool.instruction_field, instruction) {
                    args.insert(field.clone(), json!(text));
                }
                let call = ToolCall::new(&tool.name, Value::Object(args));
                Ok(Message::ai("").with_tool_calls(vec![call]))
            }
            MockDecision::ToolCalls(calls) => Ok(Message::ai("").with_tool_calls(calls)),
            MockDecision::Error(e) => Err(ForemanError::Model(e)),
        }
    }
}

#[async_trait]
impl ModelCapability for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<Message> {
        self.decide_requests.lock().push(request.clone());
        Self::resolve(self.next_decision(), request)
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<Vec<Value>> {
        self.extract_requests.lock().push(request.clone());
        match self.extractions.lock().pop_front() {
            Some(MockExtraction::Responses(values)) => Ok(values),
            Some(MockExtraction::Error(e)) => Err(ForemanError::Model(e)),
            None => Ok(vec![]),
        }
    }

    async fn stream_decide(&self, request: &DecisionRequest) -> Result<mpsc::Receiver<ModelChunk>> {
        self.decide_requests.lock().push(request.clone());
        let result = Self::resolve(self.next_decision(), request);

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let message = match result {
                Ok(message) => message,
                Err(e) => {
                    let reason = match e {
                        ForemanError::Model(reason) => reason,
                        other => other.to_string(),
                    };
                    let _ = tx.send(ModelChunk::Error(reason)).await;
                    return;
                }
            };

            // Stream the text word by word
            let words: Vec<&str> = message.content.split_inclusive(' ').collect();
            for word in words {
                let _ = tx.send(ModelChunk::TextDelta(word.to_string())).await;
            }

            // Tool calls: header delta, then the arguments in two fragments
            for (index, call) in message.tool_calls.iter().enumerate() {
                let _ = tx
                    .send(ModelChunk::ToolCallDelta(ToolCallDelta {
                        index,
                        id: Some(call.id.clone()),
                        name: Some(call.name.clone()),
                        args: String::new(),
                    }))
                    .await;
                let args = call.args.to_string();
                let mid = args.len() / 2;
                let split = (0..=mid).rev().find(|i| args.is_char_boundary(*i)).unwrap_or(0);
                for fragment in [&args[..split], &args[split..]] {
                    let _ = tx
                        .send(ModelChunk::ToolCallDelta(ToolCallDelta {
                            index,
                            args: fragment.to_string(),
                            ..Default::default()
                        }))
                        .await;
                }
            }

            let _ = tx.send(ModelChunk::Complete(message)).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DecisionRequest {
        DecisionRequest {
            system: "be useful".into(),
            messages: vec![Message::human("hi")],
            decision: DecisionTool::route_intent(&["update_customer", "survey"]),
        }
    }

    #[tokio::test]
    async fn test_mock_text_response() {
        let model = MockModel::new().with_response("Hello!");
        let msg = model.decide(&request()).await.unwrap();
        assert_eq!(msg.content, "Hello!");
        assert!(msg.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_mock_route_uses_request_tool() {
        let model = MockModel::new()
            .with_route("survey", "add machine")
            .with_bare_route("survey");

        let msg = model.decide(&request()).await.unwrap();
        let call = msg.first_tool_call().unwrap();
        assert_eq!(call.name, "RouteIntent");
        assert_eq!(call.arg_str("route"), Some("survey"));
        assert_eq!(call.arg_str("supervisor_message"), Some("add machine"));

        let mut req = request();
        req.decision = DecisionTool::update_memory(&["survey"]);
        let msg = model.decide(&req).await.unwrap();
        let call = msg.first_tool_call().unwrap();
        assert_eq!(call.name, "UpdateMemory");
        assert_eq!(call.arg_str("update_type"), Some("survey"));
    }

    #[tokio::test]
    async fn test_mock_error() {
        let model = MockModel::new().with_error("HTTP 503: overloaded");
        assert!(matches!(
            model.decide(&request()).await,
            Err(ForemanError::Model(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_records_requests() {
        let model = MockModel::new().with_response("ok");
        let _ = model.decide(&request()).await;
        let recorded = model.decide_requests.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].system, "be useful");
    }

    #[tokio::test]
    async fn test_mock_exhausted_queue() {
        let model = MockModel::new();
        let msg = model.decide(&request()).await.unwrap();
        assert!(msg.content.contains("no more queued"));
    }

    #[tokio::test]
    async fn test_mock_streaming_text() {
        let model = MockModel::new().with_response("Hello big world");
        let mut rx = model.stream_decide(&request()).await.unwrap();
        let mut text = String::new();
        let mut complete = None;
        while let Some(chunk) = rx.recv().await {
            match chunk {
                ModelChunk::TextDelta(t) => text.push_str(&t),
                ModelChunk::Complete(m) => complete = Some(m),
                other => panic!("unexpected chunk {other:?}"),
            }
        }
        assert_eq!(text, "Hello big world");
        assert_eq!(complete.unwrap().content, "Hello big world");
    }

    #[tokio::test]
    async fn test_mock_streaming_tool_call_deltas() {
        let model = MockModel::new().with_route("survey", "go");
        let mut rx = model.stream_decide(&request()).await.unwrap();
        let mut args = String::new();
        let mut complete = None;
        while let Some(chunk) = rx.recv().await {
            match chunk {
                ModelChunk::ToolCallDelta(d) => args.push_str(&d.args),
                ModelChunk::Complete(m) => complete = Some(m),
                _ => {}
            }
        }
        let complete = complete.unwrap();
        let parsed: Value = serde_json::from_str(&args).unwrap();
        assert_eq!(parsed, complete.tool_calls[0].args);
    }

    #[tokio::test]
    async fn test_mock_streaming_error() {
        let model = MockModel::new().with_error("boom");
        let mut rx = model.stream_decide(&request()).await.unwrap();
        match rx.recv().await {
            Some(ModelChunk::Error(reason)) => assert_eq!(reason, "boom"),
            other => panic!("unexpected chunk {other:?}"),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_mock_extractions_in_order() {
        let model = MockModel::new()
            .with_extraction(json!({"name": "Acme"}))
            .with_extractions(vec![])
            .with_extraction_error("bad gateway");
        let req = ExtractionRequest {
            instruction: "extract".into(),
            messages: vec![],
            existing: json!({"Customer": {}}),
            target: ExtractionTarget {
                name: "Customer".into(),
                description: String::new(),
                schema: json!({}),
            },
        };
        assert_eq!(model.extract(&req).await.unwrap(), vec![json!({"name": "Acme"})]);
        assert!(model.extract(&req).await.unwrap().is_empty());
        assert!(model.extract(&req).await.is_err());
        assert!(model.extract(&req).await.unwrap().is_empty());
        assert_eq!(model.extract_requests.lock().len(), 4);
    }
}
