use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::Instrument;

use crate::Runnable;
use crate::tool::{Error, Tool, ToolResult};

/// Input of an [`AgentTool`].
#[derive(Debug, Deserialize)]
pub struct AgentToolInput {
    request: String,
}

/// Exposes a [`Runnable`] to a model as a callable tool.
///
/// The tool is named after the runnable and takes a single `request`
/// string. Whatever the runnable answers becomes the tool output. Every
/// call runs in a new session of the runnable.
pub struct AgentTool {
    runnable: Arc<dyn Runnable>,
    parameter_schema: Value,
}

impl AgentTool {
    /// Wraps a runnable.
    #[inline]
    pub fn new<R: Runnable + 'static>(runnable: R) -> Self {
        Self::from_shared(Arc::new(runnable))
    }

    /// Wraps a runnable that is also used elsewhere.
    pub fn from_shared(runnable: Arc<dyn Runnable>) -> Self {
        let parameter_schema = json!({
            "type": "object",
            "properties": {
                "request": {
                    "type": "string",
                    "description": format!(
                        "The complete request for `{}`, including all context it needs.",
                        runnable.name()
                    ),
                }
            },
            "required": ["request"],
        });
        Self {
            runnable,
            parameter_schema,
        }
    }
}

impl Tool for AgentTool {
    type Input = AgentToolInput;

    fn name(&self) -> &str {
        self.runnable.name()
    }

    fn description(&self) -> &str {
        self.runnable.description()
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: AgentToolInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let runnable = Arc::clone(&self.runnable);
        let span = info_span!("agent tool", agent = runnable.name());
        async move {
            debug!("delegating request ({} bytes)", input.request.len());
            runnable
                .run_in_new_session(input.request)
                .await
                .map_err(|err| {
                    Error::execution_error().with_reason(err.to_string())
                })
        }
        .instrument(span)
    }
}
