use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Conversation state owned by one graph execution for one session.
///
/// `supervisor_message` is the instruction a calling router hands to the
/// worker it invokes. It lives only for that invocation and is never
/// checkpointed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(skip)]
    pub supervisor_message: Option<String>,
}

impl ConversationState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            supervisor_message: None,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Messages with non-empty content, in order.
    pub fn visible(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| !m.content.is_empty())
    }
}
