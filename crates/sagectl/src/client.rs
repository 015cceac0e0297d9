//! SSE capture client for the system under test.
//!
//! Reconstructs the full answer by concatenating `delta` events, records
//! the `meta` trace event (tool-call count, retrieved titles/URLs), and
//! reports errors and timeouts as normal outcomes so one failed case never
//! aborts a batch.

use anyhow::{Context, Result};
use futures::StreamExt;
use sage_common::{ChatRequest, StreamEvent};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Default per-request ceiling for one SUT call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Success,
    Error,
    Timeout,
}

/// Everything captured from one SUT request.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub status: QueryStatus,
    pub answer: String,
    pub elapsed_secs: f64,
    pub tool_calls: Option<u32>,
    pub urls: Vec<String>,
    pub titles: Vec<String>,
    pub error: Option<String>,
}

impl QueryOutcome {
    fn failed(status: QueryStatus, error: impl Into<String>, elapsed_secs: f64) -> Self {
        Self {
            status,
            answer: String::new(),
            elapsed_secs,
            tool_calls: None,
            urls: vec![],
            titles: vec![],
            error: Some(error.into()),
        }
    }
}

/// Pure accumulator over SSE lines; separated from I/O for testing.
#[derive(Debug, Default)]
pub struct SseCollector {
    parts: Vec<String>,
    pub tool_calls: Option<u32>,
    pub urls: Vec<String>,
    pub titles: Vec<String>,
    pub error: Option<String>,
}

impl SseCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line of the response body. Lines that are not parseable
    /// `data:` frames are skipped, matching a tolerant SSE reader.
    pub fn feed_line(&mut self, line: &str) {
        let trimmed = line.trim();
        let payload = match trimmed.strip_prefix("data: ") {
            Some(rest) => rest,
            None => return,
        };
        let event: StreamEvent = match serde_json::from_str(payload) {
            Ok(ev) => ev,
            Err(_) => return,
        };
        match event {
            StreamEvent::Delta { content } => self.parts.push(content),
            StreamEvent::Meta {
                tool_calls,
                urls,
                titles,
            } => {
                self.tool_calls = Some(tool_calls);
                self.urls = urls;
                self.titles = titles;
            }
            StreamEvent::Error { content } => self.error = Some(content),
            StreamEvent::Done => {}
        }
    }

    pub fn answer(&self) -> String {
        self.parts.concat()
    }
}

/// HTTP client for one running saged instance.
pub struct SutClient {
    http: reqwest::Client,
    base_url: String,
}

impl SutClient {
    pub fn new(server_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    /// Preflight check so a whole batch does not fail case by case.
    pub async fn check_reachable(&self) -> Result<()> {
        let url = format!("{}/v1/health", self.base_url);
        self.http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .with_context(|| format!("cannot reach server at {}", self.base_url))?;
        Ok(())
    }

    /// Send *prompt* and capture the streamed answer.
    pub async fn query(&self, prompt: &str, timeout: Duration) -> QueryOutcome {
        let start = Instant::now();
        match tokio::time::timeout(timeout, self.query_inner(prompt)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                QueryOutcome::failed(QueryStatus::Error, e.to_string(), start.elapsed().as_secs_f64())
            }
            Err(_) => QueryOutcome::failed(
                QueryStatus::Timeout,
                "request timed out",
                start.elapsed().as_secs_f64(),
            ),
        }
    }

    async fn query_inner(&self, prompt: &str) -> Result<QueryOutcome> {
        let start = Instant::now();
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&ChatRequest {
                message: prompt.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Ok(QueryOutcome::failed(
                QueryStatus::Error,
                format!("HTTP {}", status.as_u16()),
                start.elapsed().as_secs_f64(),
            ));
        }

        let mut collector = SseCollector::new();
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                collector.feed_line(&String::from_utf8_lossy(&line));
            }
        }
        if !buffer.is_empty() {
            collector.feed_line(&String::from_utf8_lossy(&buffer));
        }

        let elapsed_secs = start.elapsed().as_secs_f64();
        let status = if collector.error.is_some() {
            QueryStatus::Error
        } else {
            QueryStatus::Success
        };
        Ok(QueryOutcome {
            status,
            answer: collector.answer(),
            elapsed_secs,
            tool_calls: collector.tool_calls,
            urls: collector.urls,
            titles: collector.titles,
            error: collector.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_reassembles_answer() {
        let mut c = SseCollector::new();
        c.feed_line(r#"data: {"type":"delta","content":"Hello "}"#);
        c.feed_line("");
        c.feed_line(r#"data: {"type":"delta","content":"world"}"#);
        c.feed_line(r#"data: {"type":"done"}"#);
        assert_eq!(c.answer(), "Hello world");
        assert!(c.error.is_none());
    }

    #[test]
    fn test_collector_captures_meta() {
        let mut c = SseCollector::new();
        c.feed_line(
            r#"data: {"type":"meta","tool_calls":3,"urls":["https://en.wikipedia.org/wiki/X"],"titles":["X"]}"#,
        );
        c.feed_line(r#"data: {"type":"done"}"#);
        assert_eq!(c.tool_calls, Some(3));
        assert_eq!(c.titles, vec!["X".to_string()]);
    }

    #[test]
    fn test_collector_captures_error() {
        let mut c = SseCollector::new();
        c.feed_line(r#"data: {"type":"delta","content":"partial"}"#);
        c.feed_line(r#"data: {"type":"error","content":"Too many lookup steps."}"#);
        assert_eq!(c.error.as_deref(), Some("Too many lookup steps."));
        assert_eq!(c.answer(), "partial");
    }

    #[test]
    fn test_collector_skips_unparseable_lines() {
        let mut c = SseCollector::new();
        c.feed_line("retry: 3000");
        c.feed_line("data: not json");
        c.feed_line(r#"data: {"type":"unknown_future_event","x":1}"#);
        c.feed_line(r#"data: {"type":"delta","content":"ok"}"#);
        assert_eq!(c.answer(), "ok");
    }
}
