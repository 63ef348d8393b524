//! Streaming: nodes emit fragments while a turn runs, and the multiplexer
//! turns them into the ordered `StreamEvent`s a caller consumes.

use async_stream::stream;
use foreman_core::{ForemanError, Result, Role, StreamEvent, ToolCallDelta, diagnostic};
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Something a node produced, tagged with where in the graph it ran.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub node_path: Vec<String>,
    pub kind: FragmentKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FragmentKind {
    /// A piece of a router's decision as the model produces it.
    AiDelta {
        content: String,
        tool_call_deltas: Vec<ToolCallDelta>,
    },
    /// A worker's result, delivered whole.
    ToolResult {
        content: String,
        tool_call_id: String,
    },
}

/// Tracks the node path of the previous event to mark boundaries.
#[derive(Debug, Default)]
pub struct Multiplexer {
    previous: Option<Vec<String>>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: Fragment) -> StreamEvent {
        let is_boundary = self.advance(&fragment.node_path);
        match fragment.kind {
            FragmentKind::AiDelta {
                content,
                tool_call_deltas,
            } => StreamEvent {
                node_path: fragment.node_path,
                role: Role::Ai,
                content_delta: content,
                tool_call_deltas,
                tool_call_id: None,
                is_boundary,
            },
            FragmentKind::ToolResult {
                content,
                tool_call_id,
            } => StreamEvent {
                node_path: fragment.node_path,
                role: Role::Tool,
                content_delta: content,
                tool_call_deltas: Vec::new(),
                tool_call_id: Some(tool_call_id),
                is_boundary,
            },
        }
    }

    /// The terminal event for a turn that failed. It belongs to no node, so
    /// its empty path always starts a new segment.
    pub fn fail(&mut self, error: &ForemanError) -> StreamEvent {
        let node_path = Vec::new();
        let is_boundary = self.advance(&node_path);
        StreamEvent {
            node_path,
            role: Role::Ai,
            content_delta: diagnostic(error),
            tool_call_deltas: Vec::new(),
            tool_call_id: None,
            is_boundary,
        }
    }

    fn advance(&mut self, path: &[String]) -> bool {
        let changed = self.previous.as_deref() != Some(path);
        if changed {
            self.previous = Some(path.to_vec());
        }
        changed
    }
}

/// Events for a turn running in `task`, which emits into the other end of
/// `fragments`. The stream ends once every sender is gone and the task has
/// finished. A failed task yields one diagnostic event instead of an error.
pub fn multiplex(
    mut fragments: mpsc::Receiver<Fragment>,
    task: JoinHandle<Result<()>>,
) -> BoxStream<'static, StreamEvent> {
    Box::pin(stream! {
        let mut mux = Multiplexer::new();
        while let Some(fragment) = fragments.recv().await {
            yield mux.push(fragment);
        }
        let failure = match task.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(e) => Some(ForemanError::Stream(format!("turn aborted: {e}"))),
        };
        if let Some(e) = failure {
            warn!(error = %e, "Streamed turn failed");
            yield mux.fail(&e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn delta(path: &[&str], text: &str) -> Fragment {
        Fragment {
            node_path: path.iter().map(|s| s.to_string()).collect(),
            kind: FragmentKind::AiDelta {
                content: text.into(),
                tool_call_deltas: vec![],
            },
        }
    }

    #[test]
    fn test_boundaries_follow_path_changes() {
        let mut mux = Multiplexer::new();
        let flags: Vec<bool> = [
            delta(&["supervisor"], "a"),
            delta(&["supervisor"], "b"),
            delta(&["supervisor", "survey_agent"], "c"),
            delta(&["supervisor", "survey_agent"], "d"),
            delta(&["supervisor"], "e"),
        ]
        .into_iter()
        .map(|f| mux.push(f).is_boundary)
        .collect();
        assert_eq!(flags, vec![true, false, true, false, true]);
    }

    #[test]
    fn test_tool_result_event() {
        let mut mux = Multiplexer::new();
        let event = mux.push(Fragment {
            node_path: vec!["supervisor".into()],
            kind: FragmentKind::ToolResult {
                content: "updated customer".into(),
                tool_call_id: "call_1".into(),
            },
        });
        assert_eq!(event.role, Role::Tool);
        assert_eq!(event.tool_call_id.as_deref(), Some("call_1"));
        assert!(event.is_boundary);
    }

    #[test]
    fn test_failure_is_boundary_with_empty_path() {
        let mut mux = Multiplexer::new();
        mux.push(delta(&["supervisor"], "a"));
        let event = mux.fail(&ForemanError::Model("HTTP 500".into()));
        assert!(event.is_boundary);
        assert!(event.node_path.is_empty());
        assert!(event.is_diagnostic());
        assert_eq!(event.content_delta, "error: model error: HTTP 500");
    }

    #[tokio::test]
    async fn test_multiplex_appends_diagnostic_on_failure() {
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(async move {
            tx.send(delta(&["supervisor"], "partial")).await.ok();
            Err(ForemanError::Model("boom".into()))
        });
        let events: Vec<StreamEvent> = multiplex(rx, task).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].content_delta, "partial");
        assert!(events[1].is_diagnostic());
    }

    #[tokio::test]
    async fn test_multiplex_clean_finish() {
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(async move {
            tx.send(delta(&["supervisor"], "hello")).await.ok();
            Ok(())
        });
        let events: Vec<StreamEvent> = multiplex(rx, task).collect().await;
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_diagnostic());
    }
}
