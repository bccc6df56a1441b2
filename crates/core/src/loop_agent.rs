use std::future::ready;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::tool::{Tool, ToolResult};
use crate::{AgentError, Runnable};

/// A shared flag a sub-agent raises to stop the enclosing [`LoopAgent`].
#[derive(Clone, Debug, Default)]
pub struct Escalation(Arc<AtomicBool>);

impl Escalation {
    /// Creates a lowered flag.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    #[inline]
    pub fn escalate(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` if the flag is raised.
    #[inline]
    pub fn is_escalated(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs its sub-agents in order, over and over, until an iteration limit
/// is reached or one of them escalates.
///
/// The first sub-agent receives the request on the first iteration and a
/// continuation note on later ones; every other sub-agent receives the
/// previous sub-agent's answer. Sub-agents start a new session on the
/// first iteration of every run. The loop answers with every non-empty
/// sub-agent answer, separated by blank lines.
pub struct LoopAgent {
    name: String,
    description: String,
    sub_agents: Vec<Arc<dyn Runnable>>,
    max_iterations: usize,
    escalation: Escalation,
    run_lock: Mutex<()>,
}

impl LoopAgent {
    /// Creates a builder for a loop agent called `name`.
    #[inline]
    pub fn builder<S: Into<String>>(name: S) -> LoopAgentBuilder {
        LoopAgentBuilder {
            name: name.into(),
            description: String::new(),
            sub_agents: vec![],
            max_iterations: 10,
            escalation: Escalation::new(),
        }
    }

    /// Returns the iteration limit.
    #[inline]
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Returns the flag that stops this loop.
    #[inline]
    pub fn escalation(&self) -> &Escalation {
        &self.escalation
    }

    async fn run_iterations(&self, input: String) -> Result<String, AgentError> {
        let mut outputs: Vec<String> = vec![];
        'iterations: for iteration in 1..=self.max_iterations {
            debug!("iteration {iteration}/{}", self.max_iterations);
            let mut message = if iteration == 1 {
                input.clone()
            } else {
                continuation_note(iteration, self.max_iterations)
            };
            for sub_agent in &self.sub_agents {
                // Each run starts new sessions; later iterations build on
                // the history of the first.
                let output = if iteration == 1 {
                    sub_agent.run_in_new_session(message).await?
                } else {
                    sub_agent.run(message).await?
                };
                if !output.trim().is_empty() {
                    outputs.push(output.clone());
                }
                if self.escalation.is_escalated() {
                    info!(
                        "`{}` escalated on iteration {iteration}",
                        sub_agent.name()
                    );
                    break 'iterations;
                }
                message = output;
            }
        }
        Ok(outputs.join("\n\n"))
    }
}

fn continuation_note(iteration: usize, max_iterations: usize) -> String {
    format!(
        "This is iteration {iteration} of {max_iterations}. Continue the \
         task above: build on what you already found and cover what is \
         still missing. If the material is already sufficient, call \
         `exit_loop`."
    )
}

#[async_trait]
impl Runnable for LoopAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn run(&self, input: String) -> Result<String, AgentError> {
        // The escalation flag is per run, concurrent runs would share it.
        let _guard = self.run_lock.lock().await;
        self.escalation.reset();
        let span = info_span!("loop agent", name = %self.name);
        self.run_iterations(input).instrument(span).await
    }
}

/// [`LoopAgent`] builder.
pub struct LoopAgentBuilder {
    name: String,
    description: String,
    sub_agents: Vec<Arc<dyn Runnable>>,
    max_iterations: usize,
    escalation: Escalation,
}

impl LoopAgentBuilder {
    /// Sets what the loop does, as shown to models that can call it.
    #[inline]
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a sub-agent.
    #[inline]
    pub fn with_sub_agent<R: Runnable + 'static>(self, sub_agent: R) -> Self {
        self.with_shared_sub_agent(Arc::new(sub_agent))
    }

    /// Appends a sub-agent that is also used elsewhere.
    #[inline]
    pub fn with_shared_sub_agent(mut self, sub_agent: Arc<dyn Runnable>) -> Self {
        self.sub_agents.push(sub_agent);
        self
    }

    /// Sets the iteration limit, 10 by default.
    #[inline]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Uses an existing escalation flag, typically the one handed to an
    /// [`ExitLoopTool`] of a sub-agent.
    #[inline]
    pub fn with_escalation(mut self, escalation: Escalation) -> Self {
        self.escalation = escalation;
        self
    }

    /// Builds the loop agent.
    pub fn build(self) -> LoopAgent {
        let max_iterations = if self.max_iterations == 0 {
            warn!("`{}` needs at least one iteration, using 1", self.name);
            1
        } else {
            self.max_iterations
        };
        if self.sub_agents.is_empty() {
            warn!("`{}` has no sub-agents", self.name);
        }
        LoopAgent {
            name: self.name,
            description: self.description,
            sub_agents: self.sub_agents,
            max_iterations,
            escalation: self.escalation,
            run_lock: Mutex::new(()),
        }
    }
}

/// Input of [`ExitLoopTool`], which takes no arguments.
#[derive(Debug, Deserialize)]
pub struct ExitLoopInput {}

/// A tool that lets a sub-agent stop its [`LoopAgent`].
pub struct ExitLoopTool {
    escalation: Escalation,
    parameter_schema: Value,
}

impl ExitLoopTool {
    /// Creates the tool bound to a loop's escalation flag.
    #[inline]
    pub fn new(escalation: Escalation) -> Self {
        Self {
            escalation,
            parameter_schema: json!({ "type": "object", "properties": {} }),
        }
    }
}

impl Tool for ExitLoopTool {
    type Input = ExitLoopInput;

    fn name(&self) -> &str {
        "exit_loop"
    }

    fn description(&self) -> &str {
        "Stops the enclosing loop. Call this only when the information \
         gathered so far is sufficient for the task."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        _input: ExitLoopInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        self.escalation.escalate();
        ready(Ok("The loop will stop after this turn.".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use deck_agent_model::{ModelMessage, ModelRequest};
    use deck_agent_test_model::{
        PresetEvent, PresetResponse, TestModelProvider,
    };
    use serde_json::json;

    use super::*;
    use crate::AgentBuilder;
    use crate::tool::AgentTool;

    /// Records its inputs and answers with a numbered note.
    struct Notebook {
        name: &'static str,
        inputs: Arc<StdMutex<Vec<String>>>,
        escalate_after: Option<(usize, Escalation)>,
    }

    #[async_trait]
    impl Runnable for Notebook {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "takes notes"
        }

        async fn run(&self, input: String) -> Result<String, AgentError> {
            let count = {
                let mut inputs = self.inputs.lock().unwrap();
                inputs.push(input);
                inputs.len()
            };
            if let Some((after, escalation)) = &self.escalate_after {
                if count >= *after {
                    escalation.escalate();
                }
            }
            Ok(format!("{} note {count}", self.name))
        }
    }

    fn notebook(name: &'static str) -> (Notebook, Arc<StdMutex<Vec<String>>>) {
        let inputs = Arc::new(StdMutex::new(vec![]));
        let notebook = Notebook {
            name,
            inputs: Arc::clone(&inputs),
            escalate_after: None,
        };
        (notebook, inputs)
    }

    #[tokio::test]
    async fn test_runs_all_iterations() {
        let (researcher, inputs) = notebook("researcher");
        let research_loop = LoopAgent::builder("research_loop")
            .with_sub_agent(researcher)
            .with_max_iterations(3)
            .build();

        let output = research_loop.run("Volcanoes".to_owned()).await.unwrap();
        assert_eq!(
            output,
            "researcher note 1\n\nresearcher note 2\n\nresearcher note 3"
        );

        let inputs = inputs.lock().unwrap();
        assert_eq!(inputs.len(), 3);
        assert_eq!(inputs[0], "Volcanoes");
        assert!(inputs[1].contains("iteration 2 of 3"));
        assert!(inputs[2].contains("iteration 3 of 3"));
    }

    #[tokio::test]
    async fn test_sub_agents_chain_within_iteration() {
        let (drafter, _) = notebook("drafter");
        let (reviewer, reviewer_inputs) = notebook("reviewer");
        let pipeline = LoopAgent::builder("pipeline")
            .with_sub_agent(drafter)
            .with_sub_agent(reviewer)
            .with_max_iterations(1)
            .build();

        let output = pipeline.run("Cells".to_owned()).await.unwrap();
        assert_eq!(output, "drafter note 1\n\nreviewer note 1");
        assert_eq!(*reviewer_inputs.lock().unwrap(), ["drafter note 1"]);
    }

    #[tokio::test]
    async fn test_escalation_stops_loop_and_resets() {
        let escalation = Escalation::new();
        let (mut researcher, inputs) = notebook("researcher");
        researcher.escalate_after = Some((2, escalation.clone()));
        let research_loop = LoopAgent::builder("research_loop")
            .with_sub_agent(researcher)
            .with_escalation(escalation.clone())
            .build();
        assert_eq!(research_loop.max_iterations(), 10);

        let output = research_loop.run("Tides".to_owned()).await.unwrap();
        assert_eq!(output, "researcher note 1\n\nresearcher note 2");
        assert!(escalation.is_escalated());

        // A new run starts with a lowered flag; the notebook escalates
        // again right away because it has seen more than two inputs.
        let output = research_loop.run("Waves".to_owned()).await.unwrap();
        assert_eq!(output, "researcher note 3");
        assert_eq!(inputs.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_zero_iterations_clamped() {
        let (researcher, _) = notebook("researcher");
        let research_loop = LoopAgent::builder("research_loop")
            .with_sub_agent(researcher)
            .with_max_iterations(0)
            .build();
        assert_eq!(research_loop.max_iterations(), 1);
    }

    #[tokio::test]
    async fn test_llm_agent_exits_loop() {
        let model_provider = TestModelProvider::default();
        model_provider.add_assistant_turn(PresetResponse::text(
            "Found the core concepts.",
        ));
        model_provider.add_assistant_turn(PresetResponse::with_events([
            PresetEvent::MessageDelta("Enough material.".to_owned()),
            PresetEvent::tool_call("call_0", "exit_loop", json!(null)),
        ]));
        model_provider.add_assistant_turn(PresetResponse::text("Done."));

        let escalation = Escalation::new();
        let researcher = AgentBuilder::with_model_provider(model_provider.clone())
            .with_name("research_agent")
            .with_tool(ExitLoopTool::new(escalation.clone()))
            .build();
        let research_loop = LoopAgent::builder("research_loop")
            .with_description("Researches a topic")
            .with_sub_agent(researcher)
            .with_escalation(escalation)
            .build();

        let tool = AgentTool::new(research_loop);
        let output = tool
            .execute(
                serde_json::from_value(json!({ "request": "Gravity" }))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(output, "Found the core concepts.\n\nDone.");
        assert_eq!(model_provider.requests().len(), 3);
    }

    fn user_messages(request: &ModelRequest) -> Vec<&str> {
        request
            .messages
            .iter()
            .filter_map(|msg| match msg {
                ModelMessage::User(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_each_run_starts_a_new_session() {
        let model_provider = TestModelProvider::default();
        model_provider.add_assistant_turn(PresetResponse::text("First pass."));
        model_provider.add_assistant_turn(PresetResponse::text("Second pass."));

        let researcher = AgentBuilder::with_model_provider(model_provider.clone())
            .with_name("research_agent")
            .build();
        let research_loop = LoopAgent::builder("research_loop")
            .with_sub_agent(researcher)
            .with_max_iterations(2)
            .build();

        research_loop.run("Cells".to_owned()).await.unwrap();
        research_loop.run("Volcanoes".to_owned()).await.unwrap();

        let requests = model_provider.requests();
        assert_eq!(requests.len(), 4);
        // Iterations of one run share the history.
        let second_iteration = user_messages(&requests[1]);
        assert_eq!(second_iteration.len(), 2);
        assert_eq!(second_iteration[0], "Cells");
        // A new run forgets the previous one.
        assert_eq!(user_messages(&requests[2]), ["Volcanoes"]);
        assert_eq!(user_messages(&requests[3])[0], "Volcanoes");
    }
}
