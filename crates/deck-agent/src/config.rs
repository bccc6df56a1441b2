//! Settings of a [`crate::DeckPipeline`].

use std::fmt::{self, Debug, Formatter};
use std::path::PathBuf;

/// Gemini's OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/openai";
/// The fast model, used for research and coordination.
pub const DEFAULT_FAST_MODEL: &str = "gemini-2.5-flash";
/// The stronger model, used to design the slides.
pub const DEFAULT_PRESENTATION_MODEL: &str = "gemini-2.5-pro";
/// How many times the research loop may run the research agent.
pub const DEFAULT_MAX_RESEARCH_ITERATIONS: usize = 10;

/// Credentials of the Google Programmable Search engine.
#[derive(Clone, PartialEq, Eq)]
pub struct SearchConfig {
    /// API key of the Custom Search JSON API.
    pub api_key: String,
    /// The search engine id (`cx`).
    pub engine_id: String,
}

impl Debug for SearchConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchConfig")
            .field("api_key", &"<redacted>")
            .field("engine_id", &self.engine_id)
            .finish()
    }
}

/// Configuration of a [`crate::DeckPipeline`].
#[derive(Clone, PartialEq)]
pub struct DeckConfig {
    /// API key of the model endpoint.
    pub api_key: String,
    /// Base URL of an OpenAI-compatible endpoint.
    pub base_url: String,
    /// Model of the research agent.
    pub research_model: String,
    /// Model of the coordinator.
    pub coordinator_model: String,
    /// Model of the presentation agent.
    pub presentation_model: String,
    /// Web search credentials. Without them the research agent works from
    /// the model's own knowledge.
    pub search: Option<SearchConfig>,
    /// Iteration limit of the research loop.
    pub max_research_iterations: usize,
    /// Where the CLI writes decks.
    pub output_dir: PathBuf,
    /// Caps the tokens of the presentation agent's answer.
    pub presentation_max_tokens: Option<u32>,
}

impl DeckConfig {
    /// Creates a configuration with default models and limits.
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            research_model: DEFAULT_FAST_MODEL.to_owned(),
            coordinator_model: DEFAULT_FAST_MODEL.to_owned(),
            presentation_model: DEFAULT_PRESENTATION_MODEL.to_owned(),
            search: None,
            max_research_iterations: DEFAULT_MAX_RESEARCH_ITERATIONS,
            output_dir: PathBuf::from("decks"),
            presentation_max_tokens: None,
        }
    }
}

impl Debug for DeckConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeckConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("research_model", &self.research_model)
            .field("coordinator_model", &self.coordinator_model)
            .field("presentation_model", &self.presentation_model)
            .field("search", &self.search)
            .field("max_research_iterations", &self.max_research_iterations)
            .field("output_dir", &self.output_dir)
            .field("presentation_max_tokens", &self.presentation_max_tokens)
            .finish()
    }
}
