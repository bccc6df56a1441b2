use async_trait::async_trait;

use crate::AgentError;

/// Anything that turns a text request into a text answer: a single LLM
/// [`crate::Agent`], or a composite such as [`crate::LoopAgent`].
///
/// Runnables can be nested and exposed to models through
/// [`crate::tool::AgentTool`].
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Name of the runnable, also used as its tool name.
    fn name(&self) -> &str;

    /// What the runnable does, shown to models that may call it.
    fn description(&self) -> &str;

    /// Handles one request.
    async fn run(&self, input: String) -> Result<String, AgentError>;

    /// Handles one request as the start of a new session, without any
    /// history left by earlier requests.
    ///
    /// Stateless runnables need not override this.
    async fn run_in_new_session(
        &self,
        input: String,
    ) -> Result<String, AgentError> {
        self.run(input).await
    }
}
