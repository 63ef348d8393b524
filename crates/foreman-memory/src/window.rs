//! Context-window selection.
//!
//! A window is the longest trailing run of a conversation that fits in a
//! budget, trimmed so it starts on a human turn. Extraction windows must
//! also end on a human or ai turn so a reconciliation never sees a tool
//! result without the decision that caused it.

use foreman_core::{Message, Role};
use serde::{Deserialize, Serialize};

/// How message size is measured against the budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitCounter {
    /// Every message costs one unit.
    #[default]
    Messages,
    Chars,
    /// Estimated at ~4 chars per token.
    Tokens,
}

impl UnitCounter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "messages" => Some(Self::Messages),
            "chars" => Some(Self::Chars),
            "tokens" => Some(Self::Tokens),
            _ => None,
        }
    }

    pub fn count(&self, message: &Message) -> usize {
        match self {
            Self::Messages => 1,
            Self::Chars => message.char_len(),
            Self::Tokens => message.estimate_tokens(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub budget: usize,
    pub counter: UnitCounter,
    /// Drop trailing messages until the window ends on a human or ai turn.
    pub end_on_dialogue: bool,
}

impl WindowSpec {
    pub fn new(budget: usize, counter: UnitCounter) -> Self {
        Self {
            budget,
            counter,
            end_on_dialogue: false,
        }
    }

    /// The same budget, constrained to end on a dialogue turn.
    pub fn for_extraction(self) -> Self {
        Self {
            end_on_dialogue: true,
            ..self
        }
    }
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self::new(10, UnitCounter::Messages)
    }
}

/// Select the trailing window of `messages` that fits `spec`.
///
/// The result is a contiguous suffix of the input (after an optional
/// trailing trim) whose total size is at most `spec.budget` and whose
/// first message, if any, is human. Returns an empty vec when no human
/// message fits.
pub fn select_window(messages: &[Message], spec: &WindowSpec) -> Vec<Message> {
    let mut end = messages.len();
    if spec.end_on_dialogue {
        while end > 0 && !messages[end - 1].role.is_dialogue() {
            end -= 1;
        }
    }
    let candidates = &messages[..end];

    // Widest suffix within budget
    let mut start = candidates.len();
    let mut used = 0usize;
    while start > 0 {
        let cost = spec.counter.count(&candidates[start - 1]);
        if used + cost > spec.budget {
            break;
        }
        used += cost;
        start -= 1;
    }

    // Advance to the first human turn
    match candidates[start..].iter().position(|m| m.role == Role::Human) {
        Some(offset) => candidates[start + offset..].to_vec(),
        None => vec![],
    }
}

/// Merge consecutive messages of the same role into one, joining content
/// with a newline. Tool messages and messages carrying tool calls are
/// never merged since their correlation ids must survive.
pub fn merge_runs(messages: Vec<Message>) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    for msg in messages {
        if let Some(prev) = out.last_mut()
            && prev.role == msg.role
            && prev.role != Role::Tool
            && prev.tool_calls.is_empty()
            && msg.tool_calls.is_empty()
        {
            if !msg.content.is_empty() {
                if !prev.content.is_empty() {
                    prev.content.push('\n');
                }
                prev.content.push_str(&msg.content);
            }
            continue;
        }
        out.push(msg);
    }
    out
}
