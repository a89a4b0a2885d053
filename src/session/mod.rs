//! Streaming chat session management.
//!
//! A [`SessionManager`] owns one backend connection and the conversation
//! [`Transcript`] it feeds. Streamed fragments are accumulated into the
//! assistant message of the current turn; a new turn only starts when the
//! user submits another message.
//!
//! # Architecture
//!
//! - [`SessionManager`]: connection lifecycle, submit, inbound frame handling
//! - [`Transcript`]: ordered messages plus the open turn
//! - [`SessionSnapshot`]: read-only view published to renderers
//!
//! # Example
//!
//! ```rust
//! use chatstream::session::{Role, Transcript};
//!
//! let mut transcript = Transcript::new();
//! transcript.begin_turn("hi");
//! transcript.append_chunk("Hel");
//! transcript.append_chunk("lo");
//! transcript.complete_turn();
//!
//! let messages = transcript.messages();
//! assert_eq!(messages.len(), 2);
//! assert_eq!(messages[1].role, Role::Assistant);
//! assert_eq!(messages[1].content, "Hello");
//! ```

mod manager;
mod transcript;

pub use manager::{
    PARSE_FAILURE_NOTICE, Result, SessionError, SessionManager, SessionOptions, SessionSnapshot,
    SessionState, UNAVAILABLE_NOTICE,
};
pub use transcript::{ChunkOutcome, Message, Role, Transcript};
