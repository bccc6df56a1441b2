use std::sync::Arc;

use async_trait::async_trait;
use deck_agent_core::tool::{Error as ToolError, Tool, ToolResult};
use reqwest::{Client, Url};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_NUM_RESULTS: u8 = 5;
const MAX_NUM_RESULTS: u8 = 10;
const GOOGLE_SEARCH_ENDPOINT: &str =
    "https://www.googleapis.com/customsearch/v1";

/// One search result.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SearchHit {
    /// Page title.
    #[serde(default)]
    pub title: String,
    /// Page URL.
    #[serde(default)]
    pub link: String,
    /// A short excerpt of the page.
    #[serde(default)]
    pub snippet: String,
}

/// The error type for [`SearchBackend`].
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The request could not be sent or the body could not be read.
    #[error("search request failed: {0}")]
    Request(#[source] reqwest::Error),
    /// The search service answered with an error status.
    #[error("search service returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error body of the response.
        message: String,
    },
    /// The backend is misconfigured.
    #[error("invalid search configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        // The request URL carries the API key.
        Self::Request(err.without_url())
    }
}

/// A web search service.
#[async_trait]
pub trait SearchBackend: Send + Sync + 'static {
    /// Returns up to `num_results` hits for `query`, best first.
    async fn search(
        &self,
        query: &str,
        num_results: u8,
    ) -> Result<Vec<SearchHit>, SearchError>;
}

/// Google Programmable Search (Custom Search JSON API).
#[derive(Clone)]
pub struct GoogleSearch {
    client: Client,
    api_key: String,
    engine_id: String,
    endpoint: String,
}

impl GoogleSearch {
    /// Creates a client for the search engine `engine_id` (the `cx`
    /// parameter).
    pub fn new<K, E>(api_key: K, engine_id: E) -> Self
    where
        K: Into<String>,
        E: Into<String>,
    {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            engine_id: engine_id.into(),
            endpoint: GOOGLE_SEARCH_ENDPOINT.to_owned(),
        }
    }

    /// Sets a custom endpoint.
    #[inline]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_url(&self, query: &str, num_results: u8) -> Result<Url, SearchError> {
        Url::parse_with_params(
            &self.endpoint,
            &[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", &num_results.to_string()),
            ],
        )
        .map_err(|err| SearchError::Config(format!("bad endpoint: {err}")))
    }
}

impl std::fmt::Debug for GoogleSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleSearch")
            .field("api_key", &"<redacted>")
            .field("engine_id", &self.engine_id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Deserialize)]
struct GoogleSearchResponse {
    // Absent when nothing matched.
    #[serde(default)]
    items: Vec<SearchHit>,
}

#[async_trait]
impl SearchBackend for GoogleSearch {
    async fn search(
        &self,
        query: &str,
        num_results: u8,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let url = self.request_url(query, num_results)?;
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SearchError::Status {
                status: status.as_u16(),
                message: message.trim().to_owned(),
            });
        }
        let body: GoogleSearchResponse = resp.json().await?;
        Ok(body.items)
    }
}

/// Input of [`WebSearchTool`].
#[derive(Deserialize, JsonSchema)]
pub struct WebSearchParameters {
    #[schemars(description = "The search query.")]
    query: String,
    #[schemars(
        description = "How many results to return, from 1 to 10, default to 5.",
        range(min = 1, max = 10)
    )]
    num_results: Option<i64>,
}

/// A tool for searching the web.
pub struct WebSearchTool {
    backend: Arc<dyn SearchBackend>,
    parameter_schema: Value,
}

impl WebSearchTool {
    /// Creates a new web search tool on top of `backend`.
    #[inline]
    pub fn new<B: SearchBackend>(backend: B) -> Self {
        Self::from_shared(Arc::new(backend))
    }

    /// Creates a new web search tool on top of a shared backend.
    #[inline]
    pub fn from_shared(backend: Arc<dyn SearchBackend>) -> Self {
        WebSearchTool {
            backend,
            parameter_schema: schema_for!(WebSearchParameters).to_value(),
        }
    }
}

impl Tool for WebSearchTool {
    type Input = WebSearchParameters;

    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        r#"
Searches the web and returns a numbered list of results, each with a title, a link and a snippet.
Use focused queries, and search again with different wording to cover more facets of a topic."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: WebSearchParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let backend = Arc::clone(&self.backend);
        async move {
            let query = input.query.trim();
            if query.is_empty() {
                return Err(ToolError::invalid_input()
                    .with_reason("`query` must not be empty"));
            }
            let num_results = input
                .num_results
                .map_or(DEFAULT_NUM_RESULTS, |n| {
                    n.clamp(1, MAX_NUM_RESULTS.into()) as u8
                });

            debug!("searching the web for {query:?}");
            let hits = backend.search(query, num_results).await.map_err(|err| {
                warn!("web search failed: {err}");
                ToolError::execution_error().with_reason(err.to_string())
            })?;
            Ok(format_hits(query, &hits))
        }
    }
}

fn format_hits(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results found for {query:?}.");
    }
    let mut result = String::new();
    for (idx, hit) in hits.iter().enumerate() {
        if !result.is_empty() {
            result.push('\n');
        }
        result.push_str(&format!(
            "{}. {}\n   {}\n   {}",
            idx + 1,
            hit.title.trim(),
            hit.link.trim(),
            collapse_whitespace(&hit.snippet)
        ));
    }
    result
}

#[inline]
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
