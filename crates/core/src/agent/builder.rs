use deck_agent_model::{ModelProvider, ToolCallRequest};

use super::{Agent, Callbacks, TranscriptSource};
use crate::RetryPolicy;
use crate::model_client::ModelClient;
use crate::tool::{AnyTool, Tool, ToolObject, ToolResult};

const DEFAULT_MAX_TURNS: usize = 16;

/// [`Agent`] builder.
pub struct AgentBuilder {
    pub(crate) model_client: ModelClient,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) instruction: String,
    pub(crate) tools: Vec<Box<dyn ToolObject>>,
    pub(crate) max_turns: usize,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) callbacks: Callbacks,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            name: "agent".to_owned(),
            description: String::new(),
            instruction: String::new(),
            tools: vec![],
            max_turns: DEFAULT_MAX_TURNS,
            retry_policy: RetryPolicy::default(),
            callbacks: Callbacks::default(),
        }
    }

    /// Sets the agent's name. Composite agents and tools refer to the
    /// agent by this name.
    #[inline]
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Sets what the agent does, as shown to models that can call it.
    #[inline]
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the system instruction.
    #[inline]
    pub fn with_instruction<S: Into<String>>(mut self, instruction: S) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.tools.push(Box::new(AnyTool(tool)));
        self
    }

    /// Limits how many model requests one input may take. Values below 1
    /// are raised to 1.
    #[inline]
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    /// Sets how failed model requests are retried.
    #[inline]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Attaches a callback to be invoked when the agent is idle.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_idle = Some(Box::new(on_idle));
        self
    }

    /// Attaches a callback to be invoked for every conversation item.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str, TranscriptSource) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_transcript = Some(Box::new(on_transcript));
        self
    }

    /// Attaches a callback to be invoked when a tool call starts.
    #[inline]
    pub fn on_tool_call(
        mut self,
        on_tool_call: impl Fn(&ToolCallRequest) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_tool_call = Some(Box::new(on_tool_call));
        self
    }

    /// Attaches a callback to be invoked with the tool name and result
    /// when a tool call finishes.
    #[inline]
    pub fn on_tool_result(
        mut self,
        on_tool_result: impl Fn(&str, &ToolResult) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_tool_result = Some(Box::new(on_tool_result));
        self
    }

    /// Builds the agent. Must be called within a tokio runtime.
    #[inline]
    pub fn build(self) -> Agent {
        Agent::spawn_from_builder(self)
    }
}
