//! The bounded multi-turn orchestration loop.
//!
//! One engine run owns one [`Conversation`] from request to terminal event:
//! invoke the model, forward its text as it streams, branch on the stop
//! signal. A tool-use round executes every requested lookup (siblings in
//! parallel, results appended in request order) and loops; completion and
//! truncation emit `done`; anything else is an error path. The round
//! counter is hard-capped at [`MAX_MODEL_CALLS`] and reaching the cap is a
//! designed outcome, reported to the user rather than crashed on.
//!
//! Every exit path emits a `meta` event carrying the round count and the
//! retrieved article titles/URLs before the terminal event, so the
//! evaluation runner can enforce its turn-cap override.

use super::model_client::{ModelClient, ModelError, StopReason};
use super::streaming::{SinkClosed, StreamSink};
use super::tool_trait::ToolGateway;
use crate::wiki::LookupResult;
use sage_common::{ContentBlock, Conversation, ProtocolError, StreamEvent, MAX_MODEL_CALLS};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// User-facing message for the designed round-cap terminal state.
pub const CAP_EXCEEDED_MSG: &str = "Too many lookup steps. Please try a simpler question.";

/// User-facing message for an unrecognized model stop signal.
pub const UNEXPECTED_STOP_MSG: &str =
    "The model returned an unexpected response. Please try again.";

/// Appended to the answer when the model hit its length limit.
pub const TRUNCATION_NOTE: &str = "\n\n*(Response truncated due to length)*";

/// Generic catch-all error shown to the client; details stay in the logs.
pub const GENERIC_ERROR_MSG: &str = "Something went wrong. Please try again.";

/// The lookup tool name the model is given.
pub const LOOKUP_TOOL_NAME: &str = "wikipedia_search";

/// Run-fatal engine failures. Tool failures never appear here; they flow
/// back into the conversation as ordinary tool results.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("client disconnected")]
    Disconnected,
    #[error(transparent)]
    Model(ModelError),
    #[error("conversation protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<ModelError> for EngineError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Disconnected => EngineError::Disconnected,
            other => EngineError::Model(other),
        }
    }
}

impl From<SinkClosed> for EngineError {
    fn from(_: SinkClosed) -> Self {
        EngineError::Disconnected
    }
}

/// Per-run counters and trace data. Each run owns its own instance; there
/// is no ambient shared state between runs.
#[derive(Debug, Default)]
struct RunState {
    rounds: u32,
    titles: Vec<String>,
    urls: Vec<String>,
}

impl RunState {
    fn can_continue(&self) -> bool {
        self.rounds < MAX_MODEL_CALLS
    }

    fn next_round(&mut self) {
        self.rounds += 1;
    }

    fn record_lookup(&mut self, result: &LookupResult) {
        for article in &result.results {
            if !self.titles.contains(&article.title) {
                self.titles.push(article.title.clone());
                self.urls.push(article.url.clone());
            }
        }
    }

    fn meta_event(&self) -> StreamEvent {
        StreamEvent::Meta {
            tool_calls: self.rounds,
            urls: self.urls.clone(),
            titles: self.titles.clone(),
        }
    }
}

/// Drives one chat request through the model/tool loop.
pub struct ChatEngine {
    model: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolGateway>,
}

impl ChatEngine {
    pub fn new(model: Arc<dyn ModelClient>, tools: Arc<dyn ToolGateway>) -> Self {
        Self { model, tools }
    }

    /// Process one request, emitting every stream event including the
    /// terminal one. Returns Err only for run-fatal conditions the caller
    /// should log; the caller is responsible for a defensive catch-all
    /// `error` event in that case.
    pub async fn run(&self, message: &str, sink: &dyn StreamSink) -> Result<(), EngineError> {
        let mut conversation = Conversation::new(message);
        let mut state = RunState::default();

        while state.can_continue() {
            if sink.is_closed() {
                return Err(EngineError::Disconnected);
            }
            state.next_round();
            info!("model round {}/{}", state.rounds, MAX_MODEL_CALLS);

            let turn = self.model.stream_turn(&conversation, sink).await?;

            match turn.stop_reason {
                StopReason::ToolUse => {
                    let requests: Vec<(String, String, serde_json::Value)> = turn
                        .content
                        .iter()
                        .filter_map(|block| match block {
                            ContentBlock::ToolUse { id, name, input } => {
                                Some((id.clone(), name.clone(), input.clone()))
                            }
                            _ => None,
                        })
                        .collect();

                    if requests.is_empty() {
                        warn!("tool_use stop signal with no tool request blocks");
                        sink.emit(state.meta_event())?;
                        sink.error(UNEXPECTED_STOP_MSG)?;
                        return Ok(());
                    }

                    // Sibling lookups run concurrently; all must finish
                    // before the next model invocation (results keep
                    // request order).
                    let outcomes = futures::future::join_all(
                        requests
                            .iter()
                            .map(|(id, name, input)| self.execute_tool(id, name, input)),
                    )
                    .await;

                    let mut results = Vec::with_capacity(outcomes.len());
                    for (block, lookup) in outcomes {
                        state.record_lookup(&lookup);
                        results.push(block);
                    }

                    conversation.push_assistant(turn.content);
                    conversation.push_tool_results(results)?;
                }
                StopReason::EndTurn => {
                    sink.emit(state.meta_event())?;
                    sink.done()?;
                    return Ok(());
                }
                StopReason::MaxTokens => {
                    sink.delta(TRUNCATION_NOTE)?;
                    sink.emit(state.meta_event())?;
                    sink.done()?;
                    return Ok(());
                }
                StopReason::Other(reason) => {
                    warn!("unexpected stop reason '{}', terminating run", reason);
                    sink.emit(state.meta_event())?;
                    sink.error(UNEXPECTED_STOP_MSG)?;
                    return Ok(());
                }
            }
        }

        // Round cap reached without completion: a designed outcome.
        info!("round cap reached after {} model calls", state.rounds);
        sink.emit(state.meta_event())?;
        sink.error(CAP_EXCEEDED_MSG)?;
        Ok(())
    }

    /// Execute one tool request into a result block. Individual failures
    /// (unknown tool, lookup error) become structured error payloads; the
    /// run always proceeds to the next round.
    async fn execute_tool(
        &self,
        id: &str,
        name: &str,
        input: &serde_json::Value,
    ) -> (ContentBlock, LookupResult) {
        let lookup = if name == LOOKUP_TOOL_NAME {
            let query = input.get("query").and_then(|v| v.as_str()).unwrap_or("");
            let language = input
                .get("language")
                .and_then(|v| v.as_str())
                .unwrap_or("en");
            self.tools.lookup(query, language).await
        } else {
            warn!("model requested unknown tool '{}'", name);
            LookupResult::failure(format!("Unknown tool '{}'", name))
        };

        let payload = serde_json::to_string(&lookup)
            .unwrap_or_else(|_| r#"{"error":"unserializable tool result","results":[]}"#.to_string());
        (ContentBlock::tool_result(id, payload), lookup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::model_client::{FakeModelClient, ModelTurn, ScriptedTurn};
    use crate::orchestrator::streaming::CollectSink;
    use crate::orchestrator::tool_trait::FakeToolGateway;
    use crate::wiki::WikiArticle;
    use sage_common::Role;
    use serde_json::json;

    fn engine(model: FakeModelClient, tools: FakeToolGateway) -> (ChatEngine, Arc<FakeModelClient>, Arc<FakeToolGateway>) {
        let model = Arc::new(model);
        let tools = Arc::new(tools);
        (
            ChatEngine::new(model.clone(), tools.clone()),
            model,
            tools,
        )
    }

    fn article(title: &str) -> WikiArticle {
        WikiArticle {
            title: title.to_string(),
            url: format!("https://en.wikipedia.org/wiki/{}", title.replace(' ', "_")),
            snippet: "snippet".to_string(),
            extract: "extract".to_string(),
        }
    }

    fn tool_round(queries: &[(&str, &str)]) -> ScriptedTurn {
        ScriptedTurn::tool_requests(
            queries
                .iter()
                .map(|(id, q)| (*id, LOOKUP_TOOL_NAME, json!({"query": q})))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_simple_completion_streams_then_done() {
        let (engine, model, _) = engine(
            FakeModelClient::scripted(vec![
                ScriptedTurn::completion("Tungsten melts at 3422 degrees Celsius.")
                    .with_deltas(vec!["Tungsten melts ", "at 3422 degrees Celsius."]),
            ]),
            FakeToolGateway::new(),
        );
        let sink = CollectSink::new();
        engine.run("melting point of tungsten?", &sink).await.unwrap();

        assert_eq!(model.call_count(), 1);
        assert_eq!(sink.answer_text(), "Tungsten melts at 3422 degrees Celsius.");

        let events = sink.events();
        assert_eq!(events.last().unwrap(), &StreamEvent::Done);
        // Exactly one terminal event, positioned last.
        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1);
    }

    #[tokio::test]
    async fn test_tool_round_then_completion() {
        let (engine, model, tools) = engine(
            FakeModelClient::scripted(vec![
                tool_round(&[("tu_1", "tungsten")]),
                ScriptedTurn::completion("It is tungsten."),
            ]),
            FakeToolGateway::new()
                .with_response("tungsten", LookupResult::ok(vec![article("Tungsten")])),
        );
        let sink = CollectSink::new();
        engine.run("hardest metal?", &sink).await.unwrap();

        assert_eq!(model.call_count(), 2);
        assert_eq!(tools.call_count(), 1);

        // The second invocation saw the assistant turn plus the results turn.
        let second = &model.conversations()[1];
        let roles: Vec<Role> = second.turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::ToolResult]);

        // Meta reflects rounds used and retrieved articles.
        let meta = sink
            .events()
            .into_iter()
            .find(|e| matches!(e, StreamEvent::Meta { .. }))
            .unwrap();
        match meta {
            StreamEvent::Meta {
                tool_calls,
                titles,
                urls,
            } => {
                assert_eq!(tool_calls, 2);
                assert_eq!(titles, vec!["Tungsten".to_string()]);
                assert_eq!(urls, vec!["https://en.wikipedia.org/wiki/Tungsten".to_string()]);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_round_cap_yields_error_never_done() {
        let (engine, model, _) = engine(
            FakeModelClient::cycling(tool_round(&[("tu_1", "anything")])),
            FakeToolGateway::new(),
        );
        let sink = CollectSink::new();
        engine.run("loop forever", &sink).await.unwrap();

        // The cap bounds model invocations exactly.
        assert_eq!(model.call_count(), MAX_MODEL_CALLS as usize);

        let events = sink.events();
        assert_eq!(
            events.last().unwrap(),
            &StreamEvent::error(CAP_EXCEEDED_MSG)
        );
        assert!(!events.contains(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_two_tools_in_one_round_ordered_results() {
        let (engine, model, tools) = engine(
            FakeModelClient::scripted(vec![
                tool_round(&[("tu_a", "brazil"), ("tu_b", "argentina")]),
                ScriptedTurn::completion("Both covered."),
            ]),
            FakeToolGateway::new()
                .with_response("brazil", LookupResult::ok(vec![article("Brazil")]))
                .with_response("argentina", LookupResult::ok(vec![article("Argentina")])),
        );
        let sink = CollectSink::new();
        engine.run("compare economies", &sink).await.unwrap();

        assert_eq!(tools.call_count(), 2);

        // Exactly two result blocks, in request order, before the next
        // model invocation.
        let second = &model.conversations()[1];
        let results_turn = second.turns().last().unwrap();
        assert_eq!(results_turn.role, Role::ToolResult);
        let ids: Vec<&str> = results_turn
            .content
            .iter()
            .map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, .. } => tool_use_id.as_str(),
                _ => panic!("expected tool result block"),
            })
            .collect();
        assert_eq!(ids, vec!["tu_a", "tu_b"]);
    }

    #[tokio::test]
    async fn test_text_before_tool_round_is_forwarded() {
        // A single round may carry both free text and a tool request; the
        // text goes to the client even though the round is not terminal.
        let mixed = ScriptedTurn {
            deltas: vec!["Let me check that. ".to_string()],
            turn: ModelTurn {
                content: vec![
                    ContentBlock::text("Let me check that. "),
                    ContentBlock::tool_use("tu_1", LOOKUP_TOOL_NAME, json!({"query": "paris"})),
                ],
                stop_reason: StopReason::ToolUse,
            },
        };
        let (engine, _, _) = engine(
            FakeModelClient::scripted(vec![mixed, ScriptedTurn::completion("Paris facts.")]),
            FakeToolGateway::new(),
        );
        let sink = CollectSink::new();
        engine.run("population of paris", &sink).await.unwrap();

        assert_eq!(sink.answer_text(), "Let me check that. Paris facts.");
    }

    #[tokio::test]
    async fn test_sibling_tool_failure_does_not_abort_round() {
        let (engine, model, _) = engine(
            FakeModelClient::scripted(vec![
                tool_round(&[("tu_a", "good"), ("tu_b", "bad")]),
                ScriptedTurn::completion("Partial sources used."),
            ]),
            FakeToolGateway::new()
                .with_response("good", LookupResult::ok(vec![article("Good")]))
                .with_response("bad", LookupResult::failure("Wikipedia search failed.")),
        );
        let sink = CollectSink::new();
        engine.run("mixed luck", &sink).await.unwrap();

        // Both results were appended and the run proceeded to completion.
        assert_eq!(model.call_count(), 2);
        let second = &model.conversations()[1];
        let results_turn = second.turns().last().unwrap();
        assert_eq!(results_turn.content.len(), 2);
        let error_payload = match &results_turn.content[1] {
            ContentBlock::ToolResult { content, .. } => content,
            _ => panic!("expected tool result"),
        };
        assert!(error_payload.contains("Wikipedia search failed."));
        assert_eq!(sink.events().last().unwrap(), &StreamEvent::Done);
    }

    #[tokio::test]
    async fn test_truncation_appends_note_then_done() {
        let (engine, _, _) = engine(
            FakeModelClient::scripted(vec![ScriptedTurn::completion("A very long answer")
                .with_stop_reason(StopReason::MaxTokens)
                .with_deltas(vec!["A very long answer"])]),
            FakeToolGateway::new(),
        );
        let sink = CollectSink::new();
        engine.run("tell me everything", &sink).await.unwrap();

        assert_eq!(
            sink.answer_text(),
            format!("A very long answer{}", TRUNCATION_NOTE)
        );
        assert_eq!(sink.events().last().unwrap(), &StreamEvent::Done);
    }

    #[tokio::test]
    async fn test_unexpected_stop_reason_is_error() {
        let (engine, model, _) = engine(
            FakeModelClient::cycling(
                ScriptedTurn::completion("?").with_stop_reason(StopReason::Other("pause_turn".to_string())),
            ),
            FakeToolGateway::new(),
        );
        let sink = CollectSink::new();
        engine.run("odd", &sink).await.unwrap();

        // Terminates without further model calls.
        assert_eq!(model.call_count(), 1);
        assert_eq!(
            sink.events().last().unwrap(),
            &StreamEvent::error(UNEXPECTED_STOP_MSG)
        );
    }

    #[tokio::test]
    async fn test_disconnect_stops_loop_promptly() {
        let (engine, model, _) = engine(
            FakeModelClient::cycling(tool_round(&[("tu_1", "anything")])),
            FakeToolGateway::new(),
        );
        let sink = CollectSink::new();
        sink.close();
        let err = engine.run("q", &sink).await.unwrap_err();

        assert!(matches!(err, EngineError::Disconnected));
        // No model call happened after the disconnect was observable.
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_name_becomes_error_result() {
        let (engine, model, tools) = engine(
            FakeModelClient::scripted(vec![
                ScriptedTurn::tool_requests(vec![("tu_1", "launch_missiles", json!({}))]),
                ScriptedTurn::completion("Could not use that tool."),
            ]),
            FakeToolGateway::new(),
        );
        let sink = CollectSink::new();
        engine.run("q", &sink).await.unwrap();

        // The gateway was never consulted for an unknown tool.
        assert_eq!(tools.call_count(), 0);
        let second = &model.conversations()[1];
        let results_turn = second.turns().last().unwrap();
        match &results_turn.content[0] {
            ContentBlock::ToolResult { content, .. } => {
                assert!(content.contains("Unknown tool 'launch_missiles'"));
            }
            _ => panic!("expected tool result"),
        }
    }

    #[tokio::test]
    async fn test_meta_emitted_before_terminal_on_every_path() {
        for script in [
            vec![ScriptedTurn::completion("fine")],
            vec![ScriptedTurn::completion("cut").with_stop_reason(StopReason::MaxTokens)],
            vec![ScriptedTurn::completion("?")
                .with_stop_reason(StopReason::Other("weird".to_string()))],
        ] {
            let (engine, _, _) = engine(FakeModelClient::scripted(script), FakeToolGateway::new());
            let sink = CollectSink::new();
            engine.run("q", &sink).await.unwrap();

            let events = sink.events();
            let meta_pos = events
                .iter()
                .position(|e| matches!(e, StreamEvent::Meta { .. }))
                .expect("meta event missing");
            let terminal_pos = events.iter().position(|e| e.is_terminal()).unwrap();
            assert!(meta_pos < terminal_pos);
        }
    }
}
