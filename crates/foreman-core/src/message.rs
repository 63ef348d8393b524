use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single conversation unit. Messages are immutable once appended to a
/// session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Capabilities the ai invoked in this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool messages: the id of the ai tool call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Ai,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Human => "human",
            Role::Ai => "ai",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    /// Human or ai turns, as opposed to instructions and tool results.
    pub fn is_dialogue(&self) -> bool {
        matches!(self, Role::Human | Role::Ai)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request from the ai to invoke a route or capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            args,
        }
    }

    /// String argument by key, if present.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }
}

/// A partial tool call as it arrives on a stream. `index` groups the deltas
/// that belong to the same call; `args` carries a raw JSON fragment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub args: String,
}

impl Message {
    fn build(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::build(Role::Human, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::build(Role::Ai, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::build(Role::System, content)
    }

    /// A tool result correlated to the ai tool call `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::build(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// The only tool call a decision honors.
    pub fn first_tool_call(&self) -> Option<&ToolCall> {
        self.tool_calls.first()
    }

    /// Character length of everything the message carries.
    pub fn char_len(&self) -> usize {
        let mut chars = self.content.chars().count();
        for tc in &self.tool_calls {
            chars += tc.name.len() + tc.id.len() + tc.args.to_string().len();
        }
        if let Some(id) = &self.tool_call_id {
            chars += id.len();
        }
        chars
    }

    /// Estimate token count for this message.
    /// Uses ~4 chars per token plus a small role overhead.
    pub fn estimate_tokens(&self) -> usize {
        ((self.char_len() + 16) / 4).max(1)
    }
}
