//! Conversation view state: ordered messages and the streaming state machine.
//!
//! `idle` → submit → `awaitingFirstFragment` → first fragment appends a received message →
//! `streamingReceived` → later fragments extend it → sentinel → `idle`.

use serde::{Deserialize, Serialize};

/// Visible marker appended when a new topic starts on a non-empty conversation.
pub const NEW_TOPIC_SEPARATOR: &str = "------------------------新话题------------------------";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub sender: Sender,
}

impl Message {
    pub fn sent(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::Sent,
        }
    }

    pub fn received(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::Received,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChatState {
    #[default]
    Idle,
    AwaitingFirstFragment,
    StreamingReceived,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("nothing to send")]
    EmptyInput,
    #[error("a response is still streaming")]
    Busy,
}

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    state: ChatState,
    new_topic: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True between a "new topic" action and the end of the next response.
    pub fn is_new_topic(&self) -> bool {
        self.new_topic
    }

    /// Append the user's message and wait for the reply. Only one response streams at a time.
    pub fn submit(&mut self, input: &str) -> Result<(), ConversationError> {
        if input.trim().is_empty() {
            return Err(ConversationError::EmptyInput);
        }
        if self.state != ChatState::Idle {
            return Err(ConversationError::Busy);
        }
        self.messages.push(Message::sent(input));
        self.state = ChatState::AwaitingFirstFragment;
        Ok(())
    }

    /// Feed one fragment, or `None` for end of stream.
    pub fn apply(&mut self, fragment: Option<&str>) -> ChatState {
        match (fragment, self.state) {
            (None, _) => {
                self.state = ChatState::Idle;
                self.new_topic = false;
            }
            (Some(text), ChatState::AwaitingFirstFragment) => {
                self.messages.push(Message::received(text));
                self.state = ChatState::StreamingReceived;
            }
            (Some(text), ChatState::StreamingReceived) => {
                if let Some(last) = self.messages.last_mut() {
                    last.text.push_str(text);
                }
            }
            (Some(text), ChatState::Idle) => {
                log::warn!("dropping fragment with no pending request: {:?}", text);
            }
        }
        self.state
    }

    /// Give up on the pending response (transport failure). Text received so far stays.
    pub fn abort(&mut self) {
        self.state = ChatState::Idle;
    }

    /// Mark a new topic. Appends the separator only when there is something to separate;
    /// returns whether it did. Rejected with [`ConversationError::Busy`] while a reply is pending.
    pub fn start_new_topic(&mut self) -> Result<bool, ConversationError> {
        if self.state != ChatState::Idle {
            return Err(ConversationError::Busy);
        }
        self.new_topic = true;
        if self.messages.is_empty() {
            return Ok(false);
        }
        self.messages.push(Message::sent(NEW_TOPIC_SEPARATOR));
        Ok(true)
    }
}
