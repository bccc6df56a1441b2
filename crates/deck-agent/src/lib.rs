//! DeckAgent: researches a teaching topic on the web and turns the findings
//! into an HTML slide deck.
//!
//! A coordinator agent drives the workflow. It calls a bounded research
//! loop, which repeats a web-searching research agent, and then a
//! presentation agent that answers with a `<Slides>` block. The
//! [`DeckPipeline`] wires these agents together and captures the deck.
//!
//! The crate also ships a CLI (the `cli` feature) for using it in the
//! terminal.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod config;
pub mod deck;
mod pipeline;
pub mod prompts;
pub mod tools;

pub use config::{DeckConfig, SearchConfig};
pub use deck::{Deck, DeckError, Slide, extract_deck};
pub use pipeline::{
    DeckPipeline, DeckPipelineBuilder, PipelineError, PipelineEvent,
    PipelineOutput,
};

/// Re-exports of [`deck_agent_core`] crate.
pub mod core {
    pub use deck_agent_core::*;
}
