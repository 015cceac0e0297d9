//! Chat wire protocol shared between saged and its clients.
//!
//! The daemon streams Server-Sent Events with JSON payloads:
//!
//! ```text
//! data: {"type":"delta","content":"<text chunk>"}
//! data: {"type":"meta","tool_calls":2,"urls":[...],"titles":[...]}
//! data: {"type":"done"}
//! data: {"type":"error","content":"<message>"}
//! ```
//!
//! Ordering invariant: zero or more `delta` events, at most one `meta`
//! event, then exactly one terminal event (`done` or `error`). Nothing
//! follows the terminal event.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard cap on model invocations within a single chat run.
pub const MAX_MODEL_CALLS: u32 = 5;

/// Maximum accepted request message length, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 4000;

/// Inbound chat request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// One event on the outbound chat stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Incremental answer text.
    Delta { content: String },
    /// Run trace metadata, emitted once before the terminal event.
    Meta {
        tool_calls: u32,
        urls: Vec<String>,
        titles: Vec<String>,
    },
    /// Normal completion.
    Done,
    /// Run-fatal failure with a user-facing message.
    Error { content: String },
}

impl StreamEvent {
    pub fn delta(content: impl Into<String>) -> Self {
        StreamEvent::Delta {
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        StreamEvent::Error {
            content: content.into(),
        }
    }

    /// Terminal events end the stream; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

/// Why an inbound request was rejected before any model call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestRejection {
    #[error("Empty message")]
    Empty,
    #[error("Message too long. Maximum {MAX_MESSAGE_LENGTH} characters.")]
    TooLong { length: usize },
}

/// Validate a chat message against the inbound contract.
///
/// Whitespace-only messages count as empty. Length is measured in
/// characters, not bytes, so multi-byte input is not penalized.
pub fn validate_message(message: &str) -> Result<(), RequestRejection> {
    if message.trim().is_empty() {
        return Err(RequestRejection::Empty);
    }
    let length = message.chars().count();
    if length > MAX_MESSAGE_LENGTH {
        return Err(RequestRejection::TooLong { length });
    }
    Ok(())
}
