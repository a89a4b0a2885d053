//! Conversation transcript and turn tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Text typed by the user.
    User,
    /// Text streamed by the backend, or a local notice shown in its place.
    Assistant,
}

/// One entry in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who wrote the message.
    pub role: Role,
    /// Message text. Grows while an assistant turn is streaming.
    pub content: String,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
    /// Generated locally (connection or decoding notice) rather than by the
    /// backend. Rendered like any assistant message.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
}

impl Message {
    fn new(role: Role, content: impl Into<String>, synthetic: bool) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
            synthetic,
        }
    }

    /// A user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, false)
    }

    /// An assistant message streamed from the backend.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, false)
    }

    /// A locally generated assistant-role notice.
    #[must_use]
    pub fn notice(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, true)
    }
}

/// What happened to an incoming chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Appended to the turn's assistant message at this index.
    Appended(usize),
    /// Started a new assistant message at this index.
    Started(usize),
    /// No open turn to receive it.
    Dropped,
    /// Empty text; nothing to do.
    Empty,
}

#[derive(Debug, Clone)]
struct Turn {
    id: u64,
    /// Index of the assistant message being streamed into.
    assistant: Option<usize>,
    complete: bool,
}

/// Ordered conversation history plus the state of the current turn.
///
/// A turn starts with each user message and ends on a terminator, an error
/// frame, or a failed send. Chunks only ever land in the open turn.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    turn: Option<Turn>,
    turns_started: u64,
}

impl Transcript {
    /// Create an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages in display order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the transcript has no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Id of the open turn, if any.
    #[must_use]
    pub fn open_turn(&self) -> Option<u64> {
        self.turn.as_ref().filter(|t| !t.complete).map(|t| t.id)
    }

    /// Record a user message and open a new turn for its response.
    ///
    /// Any previous turn is implicitly closed.
    pub fn begin_turn(&mut self, text: impl Into<String>) -> u64 {
        self.messages.push(Message::user(text));
        self.turns_started += 1;
        let id = self.turns_started;
        self.turn = Some(Turn {
            id,
            assistant: None,
            complete: false,
        });
        id
    }

    /// Add streamed text to the open turn.
    ///
    /// Extends the turn's assistant message while it is still the last entry;
    /// otherwise starts a new one.
    pub fn append_chunk(&mut self, text: &str) -> ChunkOutcome {
        if text.is_empty() {
            return ChunkOutcome::Empty;
        }

        let Some(turn) = self.turn.as_mut().filter(|t| !t.complete) else {
            return ChunkOutcome::Dropped;
        };

        match turn.assistant {
            Some(index) if index + 1 == self.messages.len() => {
                self.messages[index].content.push_str(text);
                ChunkOutcome::Appended(index)
            }
            _ => {
                self.messages.push(Message::assistant(text));
                let index = self.messages.len() - 1;
                turn.assistant = Some(index);
                ChunkOutcome::Started(index)
            }
        }
    }

    /// Mark the open turn complete. Returns `false` if there was none.
    pub fn complete_turn(&mut self) -> bool {
        match self.turn.as_mut() {
            Some(turn) if !turn.complete => {
                turn.complete = true;
                true
            }
            _ => false,
        }
    }

    /// Append a locally generated notice.
    pub fn push_notice(&mut self, text: impl Into<String>) {
        self.messages.push(Message::notice(text));
    }
}
