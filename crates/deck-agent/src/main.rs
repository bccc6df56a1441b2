//! The `deck-agent` command: researches a topic and writes a slide deck.

#[macro_use]
extern crate tracing;

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use deck_agent::config::{
    DEFAULT_BASE_URL, DEFAULT_FAST_MODEL, DEFAULT_MAX_RESEARCH_ITERATIONS,
    DEFAULT_PRESENTATION_MODEL,
};
use deck_agent::core::TranscriptSource;
use deck_agent::deck::topic_slug;
use deck_agent::{
    Deck, DeckConfig, DeckPipeline, PipelineError, PipelineEvent,
    SearchConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::select;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::sleep;

const BAR_CHAR: &str = "▎";

/// Researches a teaching topic and turns it into an HTML slide deck.
#[derive(Parser, Debug)]
#[command(name = "deck-agent", version, about)]
struct Cli {
    /// Teaching topic. Starts an interactive session when omitted.
    topic: Option<String>,

    /// API key of the model endpoint.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Base URL of an OpenAI-compatible endpoint.
    #[arg(long, env = "DECK_AGENT_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Model of the research agent.
    #[arg(long, env = "DECK_AGENT_RESEARCH_MODEL", default_value = DEFAULT_FAST_MODEL)]
    research_model: String,

    /// Model of the coordinator.
    #[arg(long, env = "DECK_AGENT_COORDINATOR_MODEL", default_value = DEFAULT_FAST_MODEL)]
    coordinator_model: String,

    /// Model of the presentation agent.
    #[arg(long, env = "DECK_AGENT_PRESENTATION_MODEL", default_value = DEFAULT_PRESENTATION_MODEL)]
    presentation_model: String,

    /// Caps the tokens of the presentation agent's answer.
    #[arg(long, env = "DECK_AGENT_PRESENTATION_MAX_TOKENS")]
    presentation_max_tokens: Option<u32>,

    /// API key of the Google Custom Search JSON API.
    #[arg(long, env = "GOOGLE_SEARCH_API_KEY", hide_env_values = true, requires = "search_engine_id")]
    search_api_key: Option<String>,

    /// Id of the Google Programmable Search engine (`cx`).
    #[arg(long, env = "GOOGLE_SEARCH_ENGINE_ID", requires = "search_api_key")]
    search_engine_id: Option<String>,

    /// How many times the research loop may run.
    #[arg(long, default_value_t = DEFAULT_MAX_RESEARCH_ITERATIONS)]
    max_iterations: usize,

    /// Where decks are written, one directory per topic.
    #[arg(short, long, env = "DECK_AGENT_OUTPUT_DIR", default_value = "decks")]
    output_dir: PathBuf,
}

impl Cli {
    fn into_config(self) -> (Option<String>, DeckConfig) {
        let search = match (self.search_api_key, self.search_engine_id) {
            (Some(api_key), Some(engine_id)) => {
                Some(SearchConfig { api_key, engine_id })
            }
            _ => None,
        };
        let config = DeckConfig {
            base_url: self.base_url,
            research_model: self.research_model,
            coordinator_model: self.coordinator_model,
            presentation_model: self.presentation_model,
            search,
            max_research_iterations: self.max_iterations,
            output_dir: self.output_dir,
            presentation_max_tokens: self.presentation_max_tokens,
            ..DeckConfig::new(self.api_key)
        };
        (self.topic, config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // A missing `.env` is fine, flags and the environment still apply.
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (topic, config) = Cli::parse().into_config();
    if config.search.is_none() {
        eprintln!(
            "{}",
            "Web search is not configured, research will rely on the \
             model's own knowledge."
                .yellow()
        );
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let pipeline = DeckPipeline::builder(&config)
        .on_event(move |event| {
            event_tx.send(event).ok();
        })
        .build();

    if let Some(topic) = topic {
        return run_topic(&pipeline, &topic, &mut event_rx, &config.output_dir)
            .await;
    }

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = read_line(&mut lines).await else {
            break;
        };
        let topic = line.trim();
        if topic.is_empty() {
            continue;
        }
        if let Err(err) =
            run_topic(&pipeline, topic, &mut event_rx, &config.output_dir).await
        {
            println!("{}❌ {err:#}", BAR_CHAR.bright_red());
        }
        println!();
    }
    Ok(())
}

async fn run_topic(
    pipeline: &DeckPipeline,
    topic: &str,
    event_rx: &mut UnboundedReceiver<PipelineEvent>,
    output_dir: &Path,
) -> anyhow::Result<()> {
    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")?
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    let mut status = "🤔 Thinking...".to_owned();
    let mut progress_bar: Option<ProgressBar> = None;

    let run = pipeline.run(topic);
    tokio::pin!(run);
    let output = loop {
        // Create a new progress bar if it has been finished.
        progress_bar
            .get_or_insert_with(|| {
                let progress_bar = ProgressBar::new_spinner();
                progress_bar.set_style(progress_style.clone());
                progress_bar.set_message(status.clone());
                progress_bar
            })
            .inc(1);

        let event = select! {
            output = &mut run => break output,
            event = event_rx.recv() => event,
            _ = sleep(Duration::from_millis(100)) => continue,
        };
        let Some(event) = event else {
            continue;
        };

        // Finish the progress bar before printing anything else.
        if let Some(progress_bar) = progress_bar.take() {
            progress_bar.finish_and_clear();
        }
        if let Some(new_status) = print_event(event) {
            status = new_status;
        }
    };
    if let Some(progress_bar) = progress_bar.take() {
        progress_bar.finish_and_clear();
    }
    while let Ok(event) = event_rx.try_recv() {
        print_event(event);
    }

    // Slides from the presentation agent are kept even if the coordinator
    // failed afterwards.
    let (deck, failure) = match output {
        Ok(output) => (output.deck, None),
        Err(PipelineError { source, deck }) => (deck, Some(source)),
    };
    match deck {
        Some(deck) => write_deck(&deck, topic, output_dir).await?,
        None if failure.is_none() => {
            println!("{}No slides were generated.", BAR_CHAR.bright_yellow());
        }
        None => {}
    }
    match failure {
        Some(err) => Err(anyhow::Error::new(err).context("the agents failed")),
        None => Ok(()),
    }
}

async fn write_deck(
    deck: &Deck,
    topic: &str,
    output_dir: &Path,
) -> anyhow::Result<()> {
    let dir = output_dir.join(topic_slug(topic));
    let index_path = deck
        .write_to(&dir)
        .await
        .with_context(|| format!("cannot write the deck to {}", dir.display()))?;
    println!(
        "{}📊 {} slides written, open {}",
        BAR_CHAR.bright_green(),
        deck.len(),
        index_path.display().bright_white().bold()
    );
    for warning in deck.lint() {
        println!("{}⚠️  {warning}", BAR_CHAR.bright_yellow());
    }
    Ok(())
}

/// Prints an event and returns the new spinner message, if it changes.
fn print_event(event: PipelineEvent) -> Option<String> {
    match event {
        PipelineEvent::Transcript {
            agent,
            source,
            text,
        } => {
            if &*agent == "coordinator" && source == TranscriptSource::Assistant
            {
                println!("{}🤖 {}", BAR_CHAR.bright_cyan(), text.bright_white());
            } else {
                debug!(%agent, ?source, "{text}");
            }
            None
        }
        PipelineEvent::ToolStarted {
            tool, arguments, ..
        } => match tool.as_str() {
            "research_loop" => {
                println!("{}📚 Researching...", BAR_CHAR.bright_blue());
                Some("📚 Researching...".to_owned())
            }
            "presentation_agent" => {
                println!("{}🎨 Designing slides...", BAR_CHAR.bright_magenta());
                Some("🎨 Designing slides...".to_owned())
            }
            "web_search" => {
                let query = arguments
                    .get("query")
                    .and_then(|q| q.as_str())
                    .unwrap_or_default();
                println!("{}🔎 {}", BAR_CHAR.blue(), query.dimmed());
                None
            }
            _ => None,
        },
        PipelineEvent::ToolFinished { agent, tool, ok } => {
            if !ok {
                println!(
                    "{}`{tool}` failed for {agent}",
                    BAR_CHAR.bright_red()
                );
            }
            None
        }
        PipelineEvent::DeckReady { slides } => {
            println!("{}✅ {slides} slides ready", BAR_CHAR.bright_green());
            Some("🤔 Wrapping up...".to_owned())
        }
    }
}

async fn read_line(lines: &mut Lines<BufReader<Stdin>>) -> Option<String> {
    match lines.next_line().await {
        Ok(line) => line,
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
