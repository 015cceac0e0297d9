//! Conversation state for one chat run.
//!
//! A conversation is an append-only sequence of turns and IS the model's
//! context: insertion order is significant, and the struct is owned by a
//! single in-flight run (never shared, dropped when the run ends).
//!
//! The upstream messages API carries tool results on a user-role message;
//! the in-memory model keeps a distinct `ToolResult` role and maps it back
//! to `"user"` at the wire boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who contributed a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

impl Role {
    /// Role string on the model API wire.
    pub fn wire_role(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolResult => "user",
        }
    }
}

/// One content block inside a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
        }
    }
}

/// One named contribution to the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

/// Tool-call/result pairing violations. These are protocol errors that
/// terminate the run, not recoverable data errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("tool results must follow an assistant turn")]
    NoPrecedingAssistantTurn,
    #[error("tool result id '{id}' does not match any tool request in the preceding turn")]
    UnmatchedToolResult { id: String },
    #[error("expected {expected} tool results for the preceding turn, got {actual}")]
    ResultCountMismatch { expected: usize, actual: usize },
}

/// Append-only ordered conversation history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Start a conversation from the user's opening message.
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn {
                role: Role::User,
                content: vec![ContentBlock::text(user_message)],
            }],
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn push_assistant(&mut self, content: Vec<ContentBlock>) {
        self.turns.push(Turn {
            role: Role::Assistant,
            content,
        });
    }

    /// Tool-use ids of the last turn, in emission order. Empty unless the
    /// last turn is an assistant turn containing tool requests.
    pub fn pending_tool_ids(&self) -> Vec<&str> {
        match self.turns.last() {
            Some(turn) if turn.role == Role::Assistant => turn
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect(),
            _ => vec![],
        }
    }

    /// Append one tool-result turn answering the preceding assistant turn.
    ///
    /// Every result must match a tool request from that turn, one result
    /// per request, in the same order.
    pub fn push_tool_results(&mut self, results: Vec<ContentBlock>) -> Result<(), ProtocolError> {
        let pending: Vec<String> = self
            .pending_tool_ids()
            .iter()
            .map(|s| s.to_string())
            .collect();
        if pending.is_empty() {
            return Err(ProtocolError::NoPrecedingAssistantTurn);
        }
        if results.len() != pending.len() {
            return Err(ProtocolError::ResultCountMismatch {
                expected: pending.len(),
                actual: results.len(),
            });
        }
        for (block, expected_id) in results.iter().zip(pending.iter()) {
            match block {
                ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == expected_id => {}
                ContentBlock::ToolResult { tool_use_id, .. } => {
                    return Err(ProtocolError::UnmatchedToolResult {
                        id: tool_use_id.clone(),
                    });
                }
                _ => {
                    return Err(ProtocolError::UnmatchedToolResult {
                        id: String::new(),
                    });
                }
            }
        }
        self.turns.push(Turn {
            role: Role::ToolResult,
            content: results,
        });
        Ok(())
    }

    /// Serialize to the messages array the model API expects.
    pub fn to_wire(&self) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = self
            .turns
            .iter()
            .map(|turn| {
                serde_json::json!({
                    "role": turn.role.wire_role(),
                    "content": turn.content,
                })
            })
            .collect();
        serde_json::Value::Array(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_conversation_has_user_turn() {
        let conv = Conversation::new("What is tungsten?");
        assert_eq!(conv.turns().len(), 1);
        assert_eq!(conv.turns()[0].role, Role::User);
    }

    #[test]
    fn test_pending_tool_ids_in_order() {
        let mut conv = Conversation::new("q");
        conv.push_assistant(vec![
            ContentBlock::tool_use("tu_1", "wikipedia_search", json!({"query": "a"})),
            ContentBlock::text("looking this up"),
            ContentBlock::tool_use("tu_2", "wikipedia_search", json!({"query": "b"})),
        ]);
        assert_eq!(conv.pending_tool_ids(), vec!["tu_1", "tu_2"]);
    }

    #[test]
    fn test_push_tool_results_matching() {
        let mut conv = Conversation::new("q");
        conv.push_assistant(vec![
            ContentBlock::tool_use("tu_1", "wikipedia_search", json!({"query": "a"})),
            ContentBlock::tool_use("tu_2", "wikipedia_search", json!({"query": "b"})),
        ]);
        let result = conv.push_tool_results(vec![
            ContentBlock::tool_result("tu_1", "{}"),
            ContentBlock::tool_result("tu_2", "{}"),
        ]);
        assert!(result.is_ok());
        assert_eq!(conv.turns().len(), 3);
        assert_eq!(conv.turns()[2].role, Role::ToolResult);
    }

    #[test]
    fn test_push_tool_results_id_mismatch() {
        let mut conv = Conversation::new("q");
        conv.push_assistant(vec![ContentBlock::tool_use(
            "tu_1",
            "wikipedia_search",
            json!({"query": "a"}),
        )]);
        let err = conv
            .push_tool_results(vec![ContentBlock::tool_result("tu_9", "{}")])
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnmatchedToolResult {
                id: "tu_9".to_string()
            }
        );
    }

    #[test]
    fn test_push_tool_results_count_mismatch() {
        let mut conv = Conversation::new("q");
        conv.push_assistant(vec![
            ContentBlock::tool_use("tu_1", "wikipedia_search", json!({})),
            ContentBlock::tool_use("tu_2", "wikipedia_search", json!({})),
        ]);
        let err = conv
            .push_tool_results(vec![ContentBlock::tool_result("tu_1", "{}")])
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::ResultCountMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_push_tool_results_without_assistant_turn() {
        let mut conv = Conversation::new("q");
        let err = conv
            .push_tool_results(vec![ContentBlock::tool_result("tu_1", "{}")])
            .unwrap_err();
        assert_eq!(err, ProtocolError::NoPrecedingAssistantTurn);
    }

    #[test]
    fn test_wire_role_mapping() {
        let mut conv = Conversation::new("q");
        conv.push_assistant(vec![ContentBlock::tool_use(
            "tu_1",
            "wikipedia_search",
            json!({}),
        )]);
        conv.push_tool_results(vec![ContentBlock::tool_result("tu_1", "{}")])
            .unwrap();

        let wire = conv.to_wire();
        let roles: Vec<&str> = wire
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        // Tool results ride on a user-role message at the wire level.
        assert_eq!(roles, vec!["user", "assistant", "user"]);
    }

    #[test]
    fn test_content_block_wire_shape() {
        let block = ContentBlock::tool_use("tu_1", "wikipedia_search", json!({"query": "x"}));
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_use");
        assert_eq!(json["id"], "tu_1");
        assert_eq!(json["input"]["query"], "x");
    }
}
