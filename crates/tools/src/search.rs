//! Tavily web search.

use async_trait::async_trait;
use pipeline::{Capability, CapabilityError, SearchHit, SearchTool, SourceReference};
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

pub const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

/// API key for Tavily.
#[derive(Clone, PartialEq, Eq)]
pub struct TavilyCredentials {
    pub api_key: String,
}

impl TavilyCredentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl std::fmt::Debug for TavilyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TavilyCredentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
    search_depth: &'static str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// [`SearchTool`] backed by the Tavily search API.
pub struct TavilySearch {
    client: reqwest::Client,
    credentials: TavilyCredentials,
    url: String,
}

impl TavilySearch {
    pub fn new(credentials: TavilyCredentials) -> Self {
        Self {
            client: crate::http_client(),
            credentials,
            url: TAVILY_SEARCH_URL.to_string(),
        }
    }

    /// Points the client at a different search URL (proxies, test servers).
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Converts Tavily results to hits, dropping results without a usable URL.
fn parse_response(body: &str, max_results: usize) -> Result<Vec<SearchHit>, CapabilityError> {
    let response: SearchResponse = serde_json::from_str(body).map_err(|e| {
        CapabilityError::new(Capability::Search, format!("malformed search response: {e}"))
    })?;

    let hits = response
        .results
        .into_iter()
        .filter_map(|r| {
            let Some(source) = SourceReference::new(r.url) else {
                warn!("Dropping search result without a URL");
                return None;
            };
            Some(SearchHit {
                title: r.title.filter(|t| !t.trim().is_empty()),
                snippet: r.content,
                source,
            })
        })
        .take(max_results)
        .collect();
    Ok(hits)
}

#[async_trait]
impl SearchTool for TavilySearch {
    #[instrument(skip(self))]
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, CapabilityError> {
        let request = SearchRequest {
            query,
            max_results,
            search_depth: "basic",
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.credentials.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CapabilityError::new(Capability::Search, e.to_string()))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response
            .text()
            .await
            .map_err(|e| CapabilityError::new(Capability::Search, e.to_string()))?;

        if !status.is_success() {
            return Err(CapabilityError::http_status(
                Capability::Search,
                status.as_u16(),
                &body,
                retry_after.as_deref(),
            ));
        }

        let hits = parse_response(&body, max_results)?;
        debug!(hits = hits.len(), "Search returned");
        Ok(hits)
    }
}
