use serde::{Deserialize, Serialize};

use crate::message::{Role, ToolCallDelta};

/// One element of a streamed turn, tagged with the node path that produced it.
///
/// `is_boundary` is set on the first event after `node_path` changes,
/// including the first event of the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub node_path: Vec<String>,
    pub role: Role,
    #[serde(default)]
    pub content_delta: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_deltas: Vec<ToolCallDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub is_boundary: bool,
}

impl StreamEvent {
    /// Last element of the node path, i.e. the agent currently emitting.
    pub fn node(&self) -> Option<&str> {
        self.node_path.last().map(String::as_str)
    }

    pub fn is_diagnostic(&self) -> bool {
        self.role == Role::Ai && self.content_delta.starts_with(crate::DIAGNOSTIC_PREFIX)
    }
}
