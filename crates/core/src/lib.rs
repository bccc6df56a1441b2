//! Agent runtime: the LLM agent loop, tool execution, and the composite
//! agents that wire several agents together.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
mod error;
mod loop_agent;
mod model_client;
mod runnable;
pub mod tool;

pub use agent::{Agent, AgentBuilder, TranscriptSource};
pub use error::AgentError;
pub use loop_agent::{Escalation, ExitLoopTool, LoopAgent, LoopAgentBuilder};
pub use model_client::RetryPolicy;
pub use runnable::Runnable;
