use async_trait::async_trait;
use foreman_core::{Message, Result, ToolCall, ToolCallDelta};
use serde_json::{Value, json};
use tokio::sync::mpsc;

/// The single callable a router binds for its decision step.
///
/// The model picks one of `routes` by filling `route_field`; when
/// `instruction_field` is set the model may also pass an instruction down
/// to the worker it selects.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTool {
    pub name: String,
    pub description: String,
    pub route_field: String,
    pub instruction_field: Option<String>,
    pub routes: Vec<String>,
}

impl DecisionTool {
    /// The `RouteIntent` decision used by supervisors.
    pub fn route_intent(routes: &[&str]) -> Self {
        Self {
            name: "RouteIntent".into(),
            description: "Define which agent to activate next.".into(),
            route_field: "route".into(),
            instruction_field: Some("supervisor_message".into()),
            routes: routes.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// The `UpdateMemory` decision used by narrow specialists that only
    /// choose which memory to update.
    pub fn update_memory(routes: &[&str]) -> Self {
        Self {
            name: "UpdateMemory".into(),
            description: "Decision on what memory type to update.".into(),
            route_field: "update_type".into(),
            instruction_field: None,
            routes: routes.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// JSON Schema for the tool arguments.
    pub fn parameters(&self) -> Value {
        let mut properties = serde_json::Map::new();
        properties.insert(
            self.route_field.clone(),
            json!({ "type": "string", "enum": self.routes }),
        );
        let mut required = vec![json!(self.route_field)];
        if let Some(field) = &self.instruction_field {
            properties.insert(
                field.clone(),
                json!({
                    "type": "string",
                    "description": "The message from the supervisor to the agent.",
                }),
            );
            required.push(json!(field));
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Route named by a tool call, if the call carries one.
    pub fn route_of<'a>(&self, call: &'a ToolCall) -> Option<&'a str> {
        call.arg_str(&self.route_field)
    }

    /// Instruction carried by a tool call, if any.
    pub fn instruction_of(&self, call: &ToolCall) -> Option<String> {
        self.instruction_field
            .as_deref()
            .and_then(|f| call.arg_str(f))
            .map(str::to_string)
    }
}

/// A route decision request.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub decision: DecisionTool,
}

/// The entity kind an extraction must produce.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionTarget {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// A structured extraction request.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// System instruction, already carrying the baseline.
    pub instruction: String,
    pub messages: Vec<Message>,
    /// `{<kind>: <baseline>}`
    pub existing: Value,
    pub target: ExtractionTarget,
}

/// A piece of a streamed decision.
#[derive(Debug, Clone)]
pub enum ModelChunk {
    TextDelta(String),
    ToolCallDelta(ToolCallDelta),
    /// The assembled message. Always the last chunk of a successful stream.
    Complete(Message),
    /// Failure reason, without the error-kind prefix.
    Error(String),
}

/// Settings shared by HTTP-backed models.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-mini".into(),
            temperature: 0.0,
            max_tokens: 4096,
        }
    }
}

/// Black-box model capability consumed by agent nodes.
#[async_trait]
pub trait ModelCapability: Send + Sync {
    /// Human-readable name, e.g. "openai", "mock".
    fn name(&self) -> &str;

    /// Return one ai message: plain text, or a call to the decision tool.
    async fn decide(&self, request: &DecisionRequest) -> Result<Message>;

    /// Return zero or more candidate entities of the target kind.
    async fn extract(&self, request: &ExtractionRequest) -> Result<Vec<Value>>;

    /// Streaming variant of [`decide`](Self::decide).
    async fn stream_decide(&self, request: &DecisionRequest) -> Result<mpsc::Receiver<ModelChunk>>;
}
