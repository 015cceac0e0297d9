//! Streaming model client.
//!
//! [`HttpModelClient`] speaks the upstream messages API with `stream: true`
//! and forwards text deltas into the run's [`StreamSink`] as they arrive,
//! so forwarding latency is bounded by model output latency only. Tool-use
//! blocks are assembled from partial-json deltas and returned with the
//! final turn.
//!
//! [`StreamAssembler`] is the pure line-by-line parser so the SSE handling
//! is testable without a network. [`FakeModelClient`] provides scripted
//! turns for engine tests.

use super::streaming::{SinkClosed, StreamSink};
use async_trait::async_trait;
use futures::StreamExt;
use sage_common::config::ModelConfig;
use sage_common::{ContentBlock, Conversation};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

/// The model's declared reason for ending a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Other(String),
}

impl StopReason {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "end_turn" => StopReason::EndTurn,
            "max_tokens" => StopReason::MaxTokens,
            "tool_use" => StopReason::ToolUse,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// One complete model response: assembled content plus the stop signal.
#[derive(Debug, Clone)]
pub struct ModelTurn {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("client disconnected")]
    Disconnected,
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("model API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed model stream: {0}")]
    Stream(String),
}

impl From<SinkClosed> for ModelError {
    fn from(_: SinkClosed) -> Self {
        ModelError::Disconnected
    }
}

/// Capability boundary for model invocation: given a conversation, stream
/// text into the sink and return the assembled turn.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream_turn(
        &self,
        conversation: &Conversation,
        sink: &dyn StreamSink,
    ) -> Result<ModelTurn, ModelError>;
}

// ============================================================================
// Wire events
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart,
    ContentBlockStart {
        index: usize,
        content_block: WireBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: WireDelta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: usize,
    },
    MessageDelta {
        delta: WireMessageDelta,
    },
    MessageStop,
    Ping,
    Error {
        error: WireError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text,
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}

// ============================================================================
// Stream assembly
// ============================================================================

#[derive(Debug)]
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

/// Accumulates one streamed model response from raw SSE lines.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    blocks: Vec<(usize, PartialBlock)>,
    stop_reason: Option<String>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line of the SSE body. Returns text to forward, if any.
    /// Non-data lines (event:, comments, blanks) are skipped.
    pub fn feed(&mut self, line: &str) -> Result<Option<String>, ModelError> {
        let trimmed = line.trim();
        let json_str = match trimmed.strip_prefix("data: ") {
            Some(rest) => rest,
            None => return Ok(None),
        };
        if json_str.is_empty() {
            return Ok(None);
        }

        let event: WireEvent = serde_json::from_str(json_str)
            .map_err(|e| ModelError::Stream(format!("unparseable event: {}", e)))?;

        match event {
            WireEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                match content_block {
                    WireBlock::Text => self.blocks.push((index, PartialBlock::Text(String::new()))),
                    WireBlock::ToolUse { id, name } => self.blocks.push((
                        index,
                        PartialBlock::ToolUse {
                            id,
                            name,
                            input_json: String::new(),
                        },
                    )),
                    WireBlock::Other => {}
                }
                Ok(None)
            }
            WireEvent::ContentBlockDelta { index, delta } => match delta {
                WireDelta::TextDelta { text } => {
                    if let Some((_, PartialBlock::Text(buf))) =
                        self.blocks.iter_mut().find(|(i, _)| *i == index)
                    {
                        buf.push_str(&text);
                    }
                    Ok(Some(text))
                }
                WireDelta::InputJsonDelta { partial_json } => {
                    if let Some((_, PartialBlock::ToolUse { input_json, .. })) =
                        self.blocks.iter_mut().find(|(i, _)| *i == index)
                    {
                        input_json.push_str(&partial_json);
                    }
                    Ok(None)
                }
                WireDelta::Other => Ok(None),
            },
            WireEvent::MessageDelta { delta } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                Ok(None)
            }
            WireEvent::Error { error } => Err(ModelError::Stream(error.message)),
            WireEvent::MessageStart
            | WireEvent::ContentBlockStop { .. }
            | WireEvent::MessageStop
            | WireEvent::Ping
            | WireEvent::Unknown => Ok(None),
        }
    }

    /// Close out the response into an ordered turn.
    pub fn finish(mut self) -> Result<ModelTurn, ModelError> {
        self.blocks.sort_by_key(|(index, _)| *index);

        let mut content = Vec::with_capacity(self.blocks.len());
        for (_, block) in self.blocks {
            match block {
                PartialBlock::Text(text) => content.push(ContentBlock::text(text)),
                PartialBlock::ToolUse {
                    id,
                    name,
                    input_json,
                } => {
                    let input = if input_json.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&input_json).map_err(|e| {
                            ModelError::Stream(format!("invalid tool input json: {}", e))
                        })?
                    };
                    content.push(ContentBlock::tool_use(id, name, input));
                }
            }
        }

        let stop_reason = match self.stop_reason {
            Some(raw) => StopReason::from_wire(&raw),
            None => StopReason::Other("(missing stop reason)".to_string()),
        };

        Ok(ModelTurn {
            content,
            stop_reason,
        })
    }
}

// ============================================================================
// HTTP client
// ============================================================================

const API_VERSION: &str = "2023-06-01";

/// Live client for the upstream messages API.
pub struct HttpModelClient {
    http: reqwest::Client,
    config: ModelConfig,
    api_key: String,
    system_prompt: String,
    tools: Vec<serde_json::Value>,
}

impl HttpModelClient {
    pub fn new(
        config: ModelConfig,
        api_key: String,
        system_prompt: String,
        tools: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            api_key,
            system_prompt,
            tools,
        }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn stream_turn(
        &self,
        conversation: &Conversation,
        sink: &dyn StreamSink,
    ) -> Result<ModelTurn, ModelError> {
        let url = format!("{}/v1/messages", self.config.api_base.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": self.system_prompt,
            "tools": self.tools,
            "messages": conversation.to_wire(),
            "stream": true,
        });

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut assembler = StreamAssembler::new();
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);
            // Process every complete line in the buffer; a partial trailing
            // line waits for the next chunk.
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                if let Some(text) = assembler.feed(&line)? {
                    sink.delta(&text)?;
                }
            }
        }
        if !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer).into_owned();
            if let Some(text) = assembler.feed(&line)? {
                sink.delta(&text)?;
            }
        }

        let turn = assembler.finish()?;
        debug!("model turn assembled: stop_reason={:?}", turn.stop_reason);
        Ok(turn)
    }
}

// ============================================================================
// Fake client (testing)
// ============================================================================

/// One pre-scripted model response for [`FakeModelClient`].
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    pub deltas: Vec<String>,
    pub turn: ModelTurn,
}

impl ScriptedTurn {
    /// A normal text completion.
    pub fn completion(text: &str) -> Self {
        Self {
            deltas: vec![text.to_string()],
            turn: ModelTurn {
                content: vec![ContentBlock::text(text)],
                stop_reason: StopReason::EndTurn,
            },
        }
    }

    /// A turn ending in one or more tool requests.
    pub fn tool_requests(requests: Vec<(&str, &str, serde_json::Value)>) -> Self {
        let content = requests
            .into_iter()
            .map(|(id, name, input)| ContentBlock::tool_use(id, name, input))
            .collect();
        Self {
            deltas: vec![],
            turn: ModelTurn {
                content,
                stop_reason: StopReason::ToolUse,
            },
        }
    }

    pub fn with_deltas(mut self, deltas: Vec<&str>) -> Self {
        self.deltas = deltas.into_iter().map(String::from).collect();
        self
    }

    pub fn with_stop_reason(mut self, stop_reason: StopReason) -> Self {
        self.turn.stop_reason = stop_reason;
        self
    }
}

/// Deterministic model client for engine tests: plays scripted turns and
/// records every conversation it was invoked with.
pub struct FakeModelClient {
    script: Mutex<VecDeque<ScriptedTurn>>,
    /// Replayed forever once the script runs out, if set.
    cycle: Option<ScriptedTurn>,
    calls: Mutex<Vec<Conversation>>,
}

impl FakeModelClient {
    /// Play the given turns in order; error if invoked past the end.
    pub fn scripted(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into()),
            cycle: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Return the same turn on every invocation.
    pub fn cycling(turn: ScriptedTurn) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            cycle: Some(turn),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Conversation snapshots, one per invocation, in call order.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for FakeModelClient {
    async fn stream_turn(
        &self,
        conversation: &Conversation,
        sink: &dyn StreamSink,
    ) -> Result<ModelTurn, ModelError> {
        self.calls.lock().unwrap().push(conversation.clone());

        let scripted = match self.script.lock().unwrap().pop_front() {
            Some(turn) => turn,
            None => match &self.cycle {
                Some(turn) => turn.clone(),
                None => return Err(ModelError::Stream("fake script exhausted".to_string())),
            },
        };

        for delta in &scripted.deltas {
            sink.delta(delta)?;
        }
        Ok(scripted.turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_text_stream() {
        let mut asm = StreamAssembler::new();
        assert_eq!(
            asm.feed(r#"data: {"type":"message_start","message":{}}"#).unwrap(),
            None
        );
        asm.feed(r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#)
            .unwrap();
        let d1 = asm
            .feed(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#)
            .unwrap();
        assert_eq!(d1.as_deref(), Some("Hel"));
        let d2 = asm
            .feed(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}"#)
            .unwrap();
        assert_eq!(d2.as_deref(), Some("lo"));
        asm.feed(r#"data: {"type":"content_block_stop","index":0}"#).unwrap();
        asm.feed(r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"}}"#)
            .unwrap();
        asm.feed(r#"data: {"type":"message_stop"}"#).unwrap();

        let turn = asm.finish().unwrap();
        assert_eq!(turn.stop_reason, StopReason::EndTurn);
        assert_eq!(turn.content, vec![ContentBlock::text("Hello")]);
    }

    #[test]
    fn test_assembler_tool_use_from_partial_json() {
        let mut asm = StreamAssembler::new();
        asm.feed(r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"tu_1","name":"wikipedia_search"}}"#)
            .unwrap();
        asm.feed(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"query\":"}}"#)
            .unwrap();
        asm.feed(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"\"tungsten\"}"}}"#)
            .unwrap();
        asm.feed(r#"data: {"type":"message_delta","delta":{"stop_reason":"tool_use"}}"#)
            .unwrap();

        let turn = asm.finish().unwrap();
        assert_eq!(turn.stop_reason, StopReason::ToolUse);
        assert_eq!(
            turn.content,
            vec![ContentBlock::tool_use(
                "tu_1",
                "wikipedia_search",
                serde_json::json!({"query": "tungsten"})
            )]
        );
    }

    #[test]
    fn test_assembler_mixed_text_and_tool_preserves_order() {
        let mut asm = StreamAssembler::new();
        asm.feed(r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#)
            .unwrap();
        asm.feed(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Let me look that up."}}"#)
            .unwrap();
        asm.feed(r#"data: {"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tu_1","name":"wikipedia_search"}}"#)
            .unwrap();
        asm.feed(r#"data: {"type":"message_delta","delta":{"stop_reason":"tool_use"}}"#)
            .unwrap();

        let turn = asm.finish().unwrap();
        assert_eq!(turn.content.len(), 2);
        assert!(matches!(turn.content[0], ContentBlock::Text { .. }));
        assert!(matches!(turn.content[1], ContentBlock::ToolUse { .. }));
    }

    #[test]
    fn test_assembler_empty_tool_input_defaults_to_object() {
        let mut asm = StreamAssembler::new();
        asm.feed(r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"tu_1","name":"wikipedia_search"}}"#)
            .unwrap();
        asm.feed(r#"data: {"type":"message_delta","delta":{"stop_reason":"tool_use"}}"#)
            .unwrap();
        let turn = asm.finish().unwrap();
        assert_eq!(
            turn.content,
            vec![ContentBlock::tool_use("tu_1", "wikipedia_search", serde_json::json!({}))]
        );
    }

    #[test]
    fn test_assembler_skips_non_data_lines() {
        let mut asm = StreamAssembler::new();
        assert_eq!(asm.feed("event: message_start").unwrap(), None);
        assert_eq!(asm.feed("").unwrap(), None);
        assert_eq!(asm.feed(": comment").unwrap(), None);
        assert_eq!(asm.feed(r#"data: {"type":"ping"}"#).unwrap(), None);
    }

    #[test]
    fn test_assembler_error_event() {
        let mut asm = StreamAssembler::new();
        let err = asm
            .feed(r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .unwrap_err();
        assert!(matches!(err, ModelError::Stream(m) if m == "Overloaded"));
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(StopReason::from_wire("end_turn"), StopReason::EndTurn);
        assert_eq!(StopReason::from_wire("max_tokens"), StopReason::MaxTokens);
        assert_eq!(StopReason::from_wire("tool_use"), StopReason::ToolUse);
        assert_eq!(
            StopReason::from_wire("pause_turn"),
            StopReason::Other("pause_turn".to_string())
        );
    }

    #[tokio::test]
    async fn test_fake_client_records_conversations() {
        use super::super::streaming::CollectSink;

        let fake = FakeModelClient::scripted(vec![ScriptedTurn::completion("done")]);
        let sink = CollectSink::new();
        let conv = Conversation::new("hello");
        let turn = fake.stream_turn(&conv, &sink).await.unwrap();

        assert_eq!(turn.stop_reason, StopReason::EndTurn);
        assert_eq!(fake.call_count(), 1);
        assert_eq!(sink.answer_text(), "done");
    }

    #[tokio::test]
    async fn test_fake_client_exhausted_script_errors() {
        use super::super::streaming::CollectSink;

        let fake = FakeModelClient::scripted(vec![]);
        let sink = CollectSink::new();
        let conv = Conversation::new("hello");
        assert!(fake.stream_turn(&conv, &sink).await.is_err());
    }
}
