mod builder;
mod state;
#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use deck_agent_actor::Actor;
use deck_agent_model::{TokenUsage, ToolCallRequest};
use tokio::task::JoinHandle;

use crate::conversation::Conversation;
use crate::model_client::ModelClient;
use crate::tool::{Executor as ToolExecutor, ToolResult};
use crate::{AgentError, Runnable};
pub use builder::AgentBuilder;
use state::{
    AgentStage, EnqueueUserInput, GetConversation, PendingInput,
    PendingToolCall,
};

/// Who produced a piece of transcript.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TranscriptSource {
    /// Input given to the agent.
    User,
    /// Text generated by the model.
    Assistant,
    /// Output of a tool call.
    Tool,
}

type IdleFn = Box<dyn Fn() + Send + Sync>;
type TranscriptFn = Box<dyn Fn(&str, TranscriptSource) + Send + Sync>;
type ToolCallFn = Box<dyn Fn(&ToolCallRequest) + Send + Sync>;
type ToolResultFn = Box<dyn Fn(&str, &ToolResult) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Callbacks {
    pub on_idle: Option<IdleFn>,
    pub on_transcript: Option<TranscriptFn>,
    pub on_tool_call: Option<ToolCallFn>,
    pub on_tool_result: Option<ToolResultFn>,
}

/// State owned by an agent's actor.
///
/// Messages are handled immediately whatever stage the agent is in. For
/// example, an input that arrives while tools are running is queued and
/// processed once the agent becomes idle again.
pub(crate) struct AgentState {
    name: Arc<str>,
    instruction: String,
    model_client: Option<ModelClient>,
    tool_executor: Arc<ToolExecutor>,
    conversation: Conversation,
    current_stage: AgentStage,
    pending_inputs: VecDeque<PendingInput>,
    active_input: Option<PendingInput>,
    pending_tool_calls: Vec<PendingToolCall>,
    running_tasks: HashMap<u64, JoinHandle<()>>,
    next_task_id: u64,
    turns: usize,
    max_turns: usize,
    usage: TokenUsage,
    callbacks: Callbacks,
}

impl Drop for AgentState {
    fn drop(&mut self) {
        for (_, task) in self.running_tasks.drain() {
            task.abort();
        }
    }
}

/// An LLM agent: a model, an instruction, a set of tools and a
/// conversation, driven by an actor.
///
/// Each input is answered by calling the model, running the tools it asks
/// for, and calling it again until it produces a final message. The
/// conversation is kept across inputs. Clones share the same agent; it
/// stops once the last clone is dropped.
#[derive(Clone)]
pub struct Agent {
    handle: Actor<AgentState>,
    name: Arc<str>,
    description: Arc<str>,
}

impl Agent {
    /// Returns the agent's name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the agent's description.
    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Enqueues an input without waiting for the answer.
    ///
    /// Use the `on_transcript` and `on_idle` callbacks to follow progress.
    pub fn enqueue_user_input<S: Into<String>>(&self, input: S) {
        let input = PendingInput {
            text: input.into(),
            new_session: false,
            reply: None,
        };
        if self.handle.send(EnqueueUserInput(input)).is_err() {
            warn!("agent `{}` has terminated, input dropped", self.name);
        }
    }

    /// Sends an input and waits for the agent's final answer.
    #[inline]
    pub async fn run<S: Into<String>>(
        &self,
        input: S,
    ) -> Result<String, AgentError> {
        self.ask_input(input.into(), false).await
    }

    /// Like [`Agent::run`], but the conversation is cleared right before
    /// the input is processed. Inputs queued ahead of it still see the
    /// old conversation.
    #[inline]
    pub async fn run_in_new_session<S: Into<String>>(
        &self,
        input: S,
    ) -> Result<String, AgentError> {
        self.ask_input(input.into(), true).await
    }

    async fn ask_input(
        &self,
        text: String,
        new_session: bool,
    ) -> Result<String, AgentError> {
        self.handle
            .ask(|reply| {
                EnqueueUserInput(PendingInput {
                    text,
                    new_session,
                    reply: Some(reply),
                })
            })
            .await
            .map_err(|_| AgentError::Terminated)?
    }

    /// Returns a snapshot of the conversation.
    pub async fn conversation(&self) -> Result<Conversation, AgentError> {
        self.handle
            .ask(GetConversation)
            .await
            .map_err(|_| AgentError::Terminated)
    }

    fn spawn_from_builder(builder: AgentBuilder) -> Self {
        let AgentBuilder {
            mut model_client,
            name,
            description,
            instruction,
            tools,
            max_turns,
            retry_policy,
            callbacks,
        } = builder;
        model_client.set_retry_policy(retry_policy);

        let name: Arc<str> = Arc::from(name);
        let state = AgentState {
            name: Arc::clone(&name),
            instruction,
            model_client: Some(model_client),
            tool_executor: Arc::new(ToolExecutor::with_tools(tools)),
            conversation: Default::default(),
            current_stage: Default::default(),
            pending_inputs: Default::default(),
            active_input: None,
            pending_tool_calls: Default::default(),
            running_tasks: Default::default(),
            next_task_id: 1,
            turns: 0,
            max_turns,
            usage: Default::default(),
            callbacks,
        };
        let handle = Actor::spawn(state, Some(&*name));
        Self {
            handle,
            name,
            description: Arc::from(description),
        }
    }
}

#[async_trait]
impl Runnable for Agent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn run(&self, input: String) -> Result<String, AgentError> {
        Agent::run(self, input).await
    }

    async fn run_in_new_session(
        &self,
        input: String,
    ) -> Result<String, AgentError> {
        Agent::run_in_new_session(self, input).await
    }
}
