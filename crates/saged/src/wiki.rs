//! Wikipedia tool gateway.
//!
//! Two sequential calls against the MediaWiki API: a keyword search for up
//! to `search_limit` candidate titles, then one batched intro-extract fetch
//! for all of them, merged by title. Every network or parse failure is
//! converted into a structured error result at this boundary; nothing
//! propagates upward, so the orchestrator can hand failures back to the
//! model as ordinary tool outcomes and keep the conversation going.

use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use sage_common::config::WikiConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::error;

const USER_AGENT: &str = "SageWiki/0.4 (Wikipedia research assistant) reqwest";

/// Generic user-facing failure; upstream details stay in the logs.
const LOOKUP_FAILED_MSG: &str = "Wikipedia search failed. Please try again.";

static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Characters left verbatim in article URLs, matching the MediaWiki
/// convention for readable titles.
const TITLE_KEEP: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b':')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// One merged search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikiArticle {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub extract: String,
}

/// Uniform tool outcome: either hits or a structured error, never a panic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub results: Vec<WikiArticle>,
}

impl LookupResult {
    pub fn ok(results: Vec<WikiArticle>) -> Self {
        Self {
            error: None,
            results,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            results: vec![],
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Sanitize a language edition code: lowercase ASCII letters only, at most
/// three, defaulting to English on anything unusable.
pub fn sanitize_lang(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase())
        .take(3)
        .collect();
    if cleaned.is_empty() {
        "en".to_string()
    } else {
        cleaned
    }
}

fn strip_html(s: &str) -> String {
    HTML_TAG_RE.replace_all(s, "").into_owned()
}

fn encode_title(title: &str) -> String {
    let underscored = title.replace(' ', "_");
    utf8_percent_encode(&underscored, TITLE_KEEP).to_string()
}

/// Live gateway against the MediaWiki API.
pub struct WikiGateway {
    http: reqwest::Client,
    search_limit: u32,
}

impl WikiGateway {
    pub fn new(config: &WikiConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            search_limit: config.search_limit,
        }
    }

    /// Search Wikipedia and return structured results.
    pub async fn lookup(&self, query: &str, language: &str) -> LookupResult {
        let lang = sanitize_lang(language);
        let base_url = format!("https://{}.wikipedia.org/w/api.php", lang);

        match self.lookup_inner(&base_url, &lang, query).await {
            Ok(result) => result,
            Err(e) => {
                error!("wikipedia lookup failed: {:#}", e);
                LookupResult::failure(LOOKUP_FAILED_MSG)
            }
        }
    }

    async fn lookup_inner(
        &self,
        base_url: &str,
        lang: &str,
        query: &str,
    ) -> anyhow::Result<LookupResult> {
        let limit = self.search_limit.to_string();
        let search: Value = self
            .http
            .get(base_url)
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", limit.as_str()),
                ("format", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // The API reports its own failures in-band.
        if let Some(err) = search.get("error") {
            let info = err
                .get("info")
                .and_then(|v| v.as_str())
                .unwrap_or("Wikipedia API error");
            return Ok(LookupResult::failure(info));
        }

        let items: Vec<&Value> = search
            .pointer("/query/search")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().collect())
            .unwrap_or_default();
        if items.is_empty() {
            return Ok(LookupResult::ok(vec![]));
        }

        let titles: Vec<&str> = items
            .iter()
            .filter_map(|item| item.get("title").and_then(|t| t.as_str()))
            .collect();

        // One batched fetch for every candidate's intro extract.
        let content: Value = self
            .http
            .get(base_url)
            .query(&[
                ("action", "query"),
                ("titles", titles.join("|").as_str()),
                ("prop", "extracts"),
                ("exintro", "1"),
                ("explaintext", "1"),
                ("format", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut extracts_by_title: HashMap<String, String> = HashMap::new();
        if let Some(pages) = content.pointer("/query/pages").and_then(|v| v.as_object()) {
            for page in pages.values() {
                let title = page.get("title").and_then(|t| t.as_str()).unwrap_or("");
                let extract = page.get("extract").and_then(|e| e.as_str()).unwrap_or("");
                extracts_by_title.insert(title.to_string(), extract.to_string());
            }
        }

        let results = items
            .iter()
            .filter_map(|item| {
                let title = item.get("title").and_then(|t| t.as_str())?;
                let snippet = item
                    .get("snippet")
                    .and_then(|s| s.as_str())
                    .map(strip_html)
                    .unwrap_or_default();
                let extract = extracts_by_title.get(title).cloned().unwrap_or_default();
                Some(WikiArticle {
                    title: title.to_string(),
                    url: format!("https://{}.wikipedia.org/wiki/{}", lang, encode_title(title)),
                    snippet,
                    extract,
                })
            })
            .collect();

        Ok(LookupResult::ok(results))
    }
}
