//! LLM judge client and prompts.
//!
//! The judge sees the complete rubric, the test case under evaluation, and
//! the captured answer, and must return strict JSON in the score-record
//! schema. Output validation lives in `sage_common::validator`; the retry
//! protocol lives in [`crate::session`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sage_common::config::{JudgeConfig, ModelConfig};
use sage_common::{TestCase, RUBRICS};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub const JUDGE_SYSTEM: &str = "You are an evaluation judge for Sage, a Wikipedia-backed Q&A \
     tool. You score answers on 7 quality dimensions using a fixed rubric. Output ONLY valid \
     JSON. No markdown fences, no commentary, no extra text.";

pub const JUDGE_RETRY_PROMPT: &str = "You did not follow the rubric anchoring requirements. Try again.\n\n\
     Your output MUST be valid JSON matching this schema exactly:\n\
     {\n\
     \x20 \"scores\": {\"D1\": int, \"D2\": int, \"D3\": int, \"D4\": int, \"D5\": int, \"D6\": int, \"D7\": int},\n\
     \x20 \"rubric_anchors\": {\"D1\": \"Score X: <excerpt from rubric>\", \"D2\": \"Score X: ...\", ...},\n\
     \x20 \"reasons\": {\"D1\": [\"reason\"], \"D2\": [\"reason\"], ...}\n\
     }\n\n\
     Each rubric_anchors value MUST begin with \"Score \" followed by the integer score and \
     contain text from the corresponding rubric dimension.\n\
     Output ONLY valid JSON, nothing else.";

/// The user message sent to the judge model for one case.
pub fn build_judge_prompt(case: &TestCase, answer: &str) -> String {
    format!(
        "Below is the COMPLETE evaluation rubric. This is the ONLY authority for scoring. \
         You MUST use ONLY these criteria. Do NOT invent new criteria or rely on unstated \
         preferences.\n\n\
         <rubric>\n{rubric}\n</rubric>\n\n\
         <test_case>\n\
         ID: {id}\n\
         Primary Dimension: D{dim} - {dim_name}\n\
         Question Type: Q{qt} - {qt_name}\n\
         Prompt: {prompt}\n\
         Ideal Behavior: {ideal}\n\
         Red Flags: {red}\n\
         </test_case>\n\n\
         <system_answer>\n{answer}\n</system_answer>\n\n\
         Score this answer on ALL 7 dimensions (D1 through D7) using ONLY the rubric above.\n\n\
         For EACH dimension you MUST:\n\
         1. Identify which score level (1-5) in the rubric best matches the answer.\n\
         2. Quote a short excerpt from that exact score line in the rubric.\n\
         3. Explain specifically why the answer matches that anchor.\n\n\
         Output STRICT JSON matching this exact schema (no extra keys):\n\n\
         {{\n\
         \x20 \"scores\": {{\"D1\": <int 1-5>, \"D2\": <int 1-5>, \"D3\": <int 1-5>, \
         \"D4\": <int 1-5>, \"D5\": <int 1-5>, \"D6\": <int 1-5>, \"D7\": <int 1-5>}},\n\
         \x20 \"rubric_anchors\": {{\"D1\": \"Score <N>: <short excerpt from rubric>\", ...}},\n\
         \x20 \"reasons\": {{\"D1\": [\"<specific reason>\"], ...}}\n\
         }}\n\n\
         CRITICAL RULES:\n\
         - Each score MUST be an integer 1 through 5.\n\
         - Each rubric_anchors value MUST begin with \"Score \" followed by the SAME integer \
         as the corresponding score.\n\
         - Each rubric_anchors value MUST contain a short excerpt from the matching score \
         line in the rubric above.\n\
         - Reasons must be short, specific, and MUST NOT introduce criteria absent from the \
         rubric.\n\
         - Output ONLY the JSON object. No markdown code fences. No text before or after \
         the JSON.",
        rubric = RUBRICS,
        id = case.id,
        dim = case.dimension,
        dim_name = case.dimension_name(),
        qt = case.question_type,
        qt_name = case.question_type_name(),
        prompt = case.prompt,
        ideal = case.ideal_behavior,
        red = case.red_flags,
        answer = answer,
    )
}

/// One message in the judge conversation.
#[derive(Debug, Clone)]
pub struct JudgeMessage {
    pub role: &'static str,
    pub content: String,
}

impl JudgeMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }
}

/// Capability boundary for judge invocation: one conversation in, raw text
/// out. Non-streaming; the judge returns a single structured object.
#[async_trait]
pub trait JudgeClient: Send + Sync {
    async fn complete(&self, system: &str, messages: &[JudgeMessage]) -> Result<String>;
}

const API_VERSION: &str = "2023-06-01";

/// Live judge client against the upstream messages API.
pub struct HttpJudgeClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl HttpJudgeClient {
    pub fn new(
        model_config: &ModelConfig,
        judge_config: &JudgeConfig,
        api_key: String,
        model_override: Option<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(judge_config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_base: model_config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: model_override.unwrap_or_else(|| judge_config.model.clone()),
            max_tokens: model_config.max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl JudgeClient for HttpJudgeClient {
    async fn complete(&self, system: &str, messages: &[JudgeMessage]) -> Result<String> {
        let wire_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
            .collect();
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": wire_messages,
        });

        let response = self
            .http
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .context("judge request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("judge API error {}: {}", status.as_u16(), text));
        }

        let value: serde_json::Value = response.json().await.context("judge response not JSON")?;
        value
            .pointer("/content/0/text")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("judge response missing content"))
    }
}

/// Scripted judge for session tests, with recorded conversations.
pub struct FakeJudgeClient {
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<Vec<JudgeMessage>>>,
}

impl FakeJudgeClient {
    pub fn scripted(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| Ok(s.to_string())).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A client whose every call fails at the transport level.
    pub fn failing(message: &str) -> Self {
        let mut responses = VecDeque::new();
        responses.push_back(Err(message.to_string()));
        Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Message lists seen per call, in call order.
    pub fn calls(&self) -> Vec<Vec<JudgeMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl JudgeClient for FakeJudgeClient {
    async fn complete(&self, _system: &str, messages: &[JudgeMessage]) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("fake judge script exhausted")),
        }
    }
}
