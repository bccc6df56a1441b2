use deck_agent_model::ErrorKind;
use thiserror::Error;

/// Why an agent could not produce an answer for an input.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AgentError {
    /// The model provider failed, after retries if the error was retryable.
    #[error("model request failed ({kind}): {message}")]
    Model {
        /// Kind reported by the provider.
        kind: ErrorKind,
        /// Provider error message.
        message: String,
    },
    /// The model kept calling tools past the configured turn limit.
    #[error("no final answer after {0} model turns")]
    TurnLimitExceeded(usize),
    /// The agent stopped before answering.
    #[error("the agent has terminated")]
    Terminated,
}
