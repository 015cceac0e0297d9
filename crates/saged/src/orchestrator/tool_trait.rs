//! Tool gateway abstraction.
//!
//! The engine only needs "give me a lookup outcome for this query"; the
//! trait keeps it independent of the live Wikipedia client so tests can run
//! with pre-configured responses and assert on recorded calls.

use crate::wiki::{LookupResult, WikiGateway};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Capability boundary for the lookup tool. Failures are carried inside
/// [`LookupResult`], never raised past this interface.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    async fn lookup(&self, query: &str, language: &str) -> LookupResult;
}

#[async_trait]
impl ToolGateway for WikiGateway {
    async fn lookup(&self, query: &str, language: &str) -> LookupResult {
        WikiGateway::lookup(self, query, language).await
    }
}

/// Fake gateway with per-query responses and recorded calls.
pub struct FakeToolGateway {
    responses: HashMap<String, LookupResult>,
    default_response: LookupResult,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeToolGateway {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            default_response: LookupResult::ok(vec![]),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Respond to *query* with *result*.
    pub fn with_response(mut self, query: &str, result: LookupResult) -> Self {
        self.responses.insert(query.to_string(), result);
        self
    }

    /// Response for queries with no configured entry.
    pub fn with_default(mut self, result: LookupResult) -> Self {
        self.default_response = result;
        self
    }

    /// Recorded (query, language) pairs, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Default for FakeToolGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolGateway for FakeToolGateway {
    async fn lookup(&self, query: &str, language: &str) -> LookupResult {
        self.calls
            .lock()
            .unwrap()
            .push((query.to_string(), language.to_string()));
        self.responses
            .get(query)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone())
    }
}
