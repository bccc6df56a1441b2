use std::sync::{Arc, Mutex, PoisonError};

use deck_agent_core::tool::{AgentTool, ToolResult};
use deck_agent_core::{
    Agent, AgentBuilder, AgentError, Escalation, ExitLoopTool, LoopAgent,
    RetryPolicy, TranscriptSource,
};
use deck_agent_model::{ModelProvider, ToolCallRequest};
use deck_agent_openai_model::{OpenAIConfigBuilder, OpenAIProvider};
use serde_json::Value;
use tracing::Instrument;

use crate::config::{DEFAULT_MAX_RESEARCH_ITERATIONS, DeckConfig};
use crate::deck::{Deck, extract_deck};
use crate::prompts::*;
use crate::tools::{GoogleSearch, SearchBackend, WebSearchTool};

const RESEARCH_AGENT: &str = "research_agent";
const RESEARCH_LOOP: &str = "research_loop";
const PRESENTATION_AGENT: &str = "presentation_agent";
const COORDINATOR: &str = "coordinator";

/// Progress of a pipeline run, as seen from its agents.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    /// An agent added an item to its conversation.
    Transcript {
        /// Name of the agent.
        agent: Arc<str>,
        /// Who produced the item.
        source: TranscriptSource,
        /// Text of the item.
        text: String,
    },
    /// An agent called a tool.
    ToolStarted {
        /// Name of the calling agent.
        agent: Arc<str>,
        /// Name of the tool.
        tool: String,
        /// Arguments sent by the model.
        arguments: Value,
    },
    /// A tool call finished.
    ToolFinished {
        /// Name of the calling agent.
        agent: Arc<str>,
        /// Name of the tool.
        tool: String,
        /// Whether the tool succeeded.
        ok: bool,
    },
    /// A deck was extracted from the presentation agent's answer.
    DeckReady {
        /// Number of slides.
        slides: usize,
    },
}

/// The result of [`DeckPipeline::run`].
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    /// The coordinator's final message.
    pub reply: String,
    /// The deck generated during the run, if any.
    pub deck: Option<Deck>,
}

/// A failed [`DeckPipeline::run`].
///
/// The presentation agent may have answered before the coordinator failed,
/// so the deck captured up to that point comes along with the error.
#[derive(Clone, Debug, thiserror::Error)]
#[error("the coordinator failed: {source}")]
pub struct PipelineError {
    /// Why the coordinator gave up.
    pub source: AgentError,
    /// The deck generated during the run, if any.
    pub deck: Option<Deck>,
}

type Observer = Arc<dyn Fn(PipelineEvent) + Send + Sync>;
type DeckSlot = Arc<Mutex<Option<Deck>>>;

/// Builder for [`DeckPipeline`].
pub struct DeckPipelineBuilder {
    research: AgentBuilder,
    presentation: AgentBuilder,
    coordinator: AgentBuilder,
    search: Option<Arc<dyn SearchBackend>>,
    max_research_iterations: usize,
    observer: Option<Observer>,
}

impl DeckPipelineBuilder {
    /// Gives the research agent a web search backend.
    #[inline]
    pub fn with_search_backend<B: SearchBackend>(self, backend: B) -> Self {
        self.with_shared_search_backend(Arc::new(backend))
    }

    /// Gives the research agent a shared web search backend.
    #[inline]
    pub fn with_shared_search_backend(
        mut self,
        backend: Arc<dyn SearchBackend>,
    ) -> Self {
        self.search = Some(backend);
        self
    }

    /// Sets how many times the research loop may run the research agent.
    #[inline]
    pub fn with_max_research_iterations(mut self, iterations: usize) -> Self {
        self.max_research_iterations = iterations;
        self
    }

    /// Sets the retry policy of every agent.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.research = self.research.with_retry_policy(retry_policy);
        self.presentation = self.presentation.with_retry_policy(retry_policy);
        self.coordinator = self.coordinator.with_retry_policy(retry_policy);
        self
    }

    /// Attaches a callback to be invoked with the progress of every agent.
    #[inline]
    pub fn on_event(
        mut self,
        on_event: impl Fn(PipelineEvent) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Arc::new(on_event));
        self
    }

    /// Builds the pipeline. Must be called within a tokio runtime.
    pub fn build(self) -> DeckPipeline {
        let observer = self.observer;
        let deck: DeckSlot = Default::default();

        let escalation = Escalation::new();
        let mut research = observe(
            self.research
                .with_name(RESEARCH_AGENT)
                .with_description(
                    "Searches the web and summarizes findings on a teaching \
                     topic.",
                )
                .with_instruction(RESEARCH_AGENT_INSTRUCTION),
            RESEARCH_AGENT,
            &observer,
            None,
        );
        match self.search {
            Some(backend) => {
                research = research.with_tool(WebSearchTool::from_shared(backend));
            }
            None => {
                warn!("no search backend, research relies on model knowledge");
            }
        }
        let research = research
            .with_tool(ExitLoopTool::new(escalation.clone()))
            .build();
        let research_loop = LoopAgent::builder(RESEARCH_LOOP)
            .with_description(
                "Researches a teaching topic in repeated rounds of web \
                 searches and returns the collected findings.",
            )
            .with_sub_agent(research)
            .with_max_iterations(self.max_research_iterations)
            .with_escalation(escalation)
            .build();

        let presentation = observe(
            self.presentation
                .with_name(PRESENTATION_AGENT)
                .with_description(
                    "Turns research findings and an outline into HTML \
                     slides wrapped in a <Slides> block.",
                )
                .with_instruction(PRESENTATION_AGENT_INSTRUCTION),
            PRESENTATION_AGENT,
            &observer,
            None,
        )
        .build();

        let coordinator = observe(
            self.coordinator
                .with_name(COORDINATOR)
                .with_instruction(COORDINATOR_INSTRUCTION),
            COORDINATOR,
            &observer,
            Some(Arc::clone(&deck)),
        )
        .with_tool(AgentTool::new(research_loop))
        .with_tool(AgentTool::new(presentation))
        .build();

        DeckPipeline {
            coordinator,
            deck,
            run_lock: tokio::sync::Mutex::new(()),
        }
    }
}

/// Wires `builder`'s callbacks to the observer. The coordinator also gets a
/// slot where decks from the presentation agent are captured.
fn observe(
    builder: AgentBuilder,
    agent: &'static str,
    observer: &Option<Observer>,
    deck: Option<DeckSlot>,
) -> AgentBuilder {
    let agent: Arc<str> = Arc::from(agent);
    let mut builder = builder;
    if let Some(observer) = observer {
        builder = builder
            .on_transcript({
                let observer = Arc::clone(observer);
                let agent = Arc::clone(&agent);
                move |text, source| {
                    observer(PipelineEvent::Transcript {
                        agent: Arc::clone(&agent),
                        source,
                        text: text.to_owned(),
                    });
                }
            })
            .on_tool_call({
                let observer = Arc::clone(observer);
                let agent = Arc::clone(&agent);
                move |req: &ToolCallRequest| {
                    observer(PipelineEvent::ToolStarted {
                        agent: Arc::clone(&agent),
                        tool: req.name.clone(),
                        arguments: req.arguments.clone(),
                    });
                }
            });
    }

    let observer = observer.clone();
    if observer.is_none() && deck.is_none() {
        return builder;
    }
    builder.on_tool_result(move |tool, result: &ToolResult| {
        if let Some(observer) = &observer {
            observer(PipelineEvent::ToolFinished {
                agent: Arc::clone(&agent),
                tool: tool.to_owned(),
                ok: result.is_ok(),
            });
        }
        let (Some(deck), Ok(output)) = (&deck, result) else {
            return;
        };
        if tool != PRESENTATION_AGENT {
            return;
        }
        match extract_deck(output) {
            Ok(new_deck) => {
                info!("captured a deck of {} slides", new_deck.len());
                let slides = new_deck.len();
                *deck.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(new_deck);
                if let Some(observer) = &observer {
                    observer(PipelineEvent::DeckReady { slides });
                }
            }
            Err(err) => warn!("presentation answer has no usable deck: {err}"),
        }
    })
}

/// The DeckAgent workflow: a coordinator that researches a topic through
/// a bounded research loop and then asks a presentation agent for slides.
///
/// Runs are serialized. The coordinator keeps its conversation between
/// runs, so follow-up requests can refine the previous deck.
pub struct DeckPipeline {
    coordinator: Agent,
    deck: DeckSlot,
    run_lock: tokio::sync::Mutex<()>,
}

impl DeckPipeline {
    /// Creates a builder that talks to the endpoint in `config`.
    pub fn builder(config: &DeckConfig) -> DeckPipelineBuilder {
        let client = reqwest::Client::new();
        let provider = |model: &str, max_tokens: Option<u32>| {
            let mut openai_config =
                OpenAIConfigBuilder::with_api_key(&config.api_key)
                    .with_base_url(&config.base_url)
                    .with_model(model);
            if let Some(max_tokens) = max_tokens {
                openai_config = openai_config.with_max_tokens(max_tokens);
            }
            OpenAIProvider::with_client(client.clone(), openai_config.build())
        };

        let mut builder = Self::with_providers(
            provider(&config.research_model, None),
            provider(&config.presentation_model, config.presentation_max_tokens),
            provider(&config.coordinator_model, None),
        )
        .with_max_research_iterations(config.max_research_iterations);
        if let Some(search) = &config.search {
            builder = builder.with_search_backend(GoogleSearch::new(
                &search.api_key,
                &search.engine_id,
            ));
        }
        builder
    }

    /// Creates a builder with a model provider per role.
    pub fn with_providers<R, P, C>(
        research: R,
        presentation: P,
        coordinator: C,
    ) -> DeckPipelineBuilder
    where
        R: ModelProvider + 'static,
        P: ModelProvider + 'static,
        C: ModelProvider + 'static,
    {
        DeckPipelineBuilder {
            research: AgentBuilder::with_model_provider(research),
            presentation: AgentBuilder::with_model_provider(presentation),
            coordinator: AgentBuilder::with_model_provider(coordinator),
            search: None,
            max_research_iterations: DEFAULT_MAX_RESEARCH_ITERATIONS,
            observer: None,
        }
    }

    /// Asks the coordinator to research `topic` and build a deck.
    ///
    /// The deck is taken from the presentation agent's latest answer in
    /// this run, or from the coordinator's reply if it carries the slides
    /// itself. If the coordinator fails, the error still carries the deck
    /// the presentation agent produced before.
    pub async fn run(&self, topic: &str) -> Result<PipelineOutput, PipelineError> {
        let _guard = self.run_lock.lock().await;
        self.take_deck();

        info!("new topic: {topic}");
        let result = self
            .coordinator
            .run(topic)
            .instrument(info_span!("deck pipeline"))
            .await;
        let captured = self.take_deck();
        let reply = match result {
            Ok(reply) => reply,
            Err(source) => {
                return Err(PipelineError {
                    source,
                    deck: captured,
                });
            }
        };

        let deck = captured.or_else(|| extract_deck(&reply).ok());
        if deck.is_some() && !reply.contains(COMPLETION_MESSAGE) {
            debug!("the coordinator did not acknowledge the deck");
        }
        Ok(PipelineOutput { reply, deck })
    }

    fn take_deck(&self) -> Option<Deck> {
        self.deck
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
