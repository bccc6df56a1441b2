use std::collections::HashMap;
use std::future::ready;

use deck_agent_model::{ModelTool, ToolCallRequest};

use crate::tool::{Error, ToolFuture, ToolObject, ToolResult};

/// An executor that handles tool call requests from the model.
pub struct Executor {
    tools: Vec<Box<dyn ToolObject>>,
    by_name: HashMap<String, usize>,
}

impl Executor {
    pub fn with_tools(tools: Vec<Box<dyn ToolObject>>) -> Self {
        let mut registered: Vec<Box<dyn ToolObject>> =
            Vec::with_capacity(tools.len());
        let mut by_name = HashMap::with_capacity(tools.len());
        for tool in tools {
            let name = tool.name().to_owned();
            if let Some(&idx) = by_name.get(&name) {
                warn!("tool `{name}` registered twice, the last one wins");
                registered[idx] = tool;
            } else {
                by_name.insert(name, registered.len());
                registered.push(tool);
            }
        }
        Self {
            tools: registered,
            by_name,
        }
    }

    /// Definitions of all tools, in registration order.
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools
            .iter()
            .map(|tool| ModelTool {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.parameter_schema().clone(),
            })
            .collect()
    }

    /// Starts every request and hands the futures to `spawner` together
    /// with the request's position.
    ///
    /// Every request gets a future, requests for unknown tools resolve to
    /// a `NotFound` error immediately.
    pub fn handle_requests<S>(&self, requests: &[ToolCallRequest], spawner: S)
    where
        S: FnMut(usize, ToolFuture),
    {
        let mut spawner = spawner;

        let span = debug_span!("tool executor");
        let _enter = span.enter();
        for (idx, req) in requests.iter().enumerate() {
            let Some(&tool_idx) = self.by_name.get(&req.name) else {
                warn!("tool not found: {}", req.name);
                let err = Error::not_found()
                    .with_reason(format!("no tool named `{}`", req.name));
                spawner(idx, Box::pin(ready(ToolResult::Err(err))));
                continue;
            };
            trace!(
                "spawning a tool {} ({}) with args: {:?}",
                req.name, req.id, req.arguments
            );
            spawner(idx, self.tools[tool_idx].execute(req.arguments.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use serde::Deserialize;
    use serde_json::{Value, json};

    use super::*;
    use crate::tool::{AnyTool, ErrorKind, Tool};

    #[derive(Deserialize)]
    struct EchoInput {
        text: String,
    }

    struct EchoTool {
        schema: Value,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                schema: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            }
        }
    }

    impl Tool for EchoTool {
        type Input = EchoInput;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the text back"
        }

        fn parameter_schema(&self) -> &Value {
            &self.schema
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Ok(input.text))
        }
    }

    fn request(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments,
        }
    }

    async fn run_all(
        executor: &Executor,
        requests: &[ToolCallRequest],
    ) -> Vec<(usize, ToolResult)> {
        let mut futures = vec![];
        executor.handle_requests(requests, |idx, fut| futures.push((idx, fut)));
        let mut results = vec![];
        for (idx, fut) in futures {
            results.push((idx, fut.await));
        }
        results
    }

    #[tokio::test]
    async fn test_handle_requests() {
        let executor =
            Executor::with_tools(vec![Box::new(AnyTool(EchoTool::new()))]);

        let results = run_all(
            &executor,
            &[
                request("call_0", "echo", json!({ "text": "volcanoes" })),
                request("call_1", "read_file", json!({})),
                request("call_2", "echo", json!({ "wrong": 1 })),
            ],
        )
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], (0, Ok("volcanoes".to_owned())));
        assert_eq!(results[1].0, 1);
        assert_eq!(
            results[1].1.as_ref().unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            results[2].1.as_ref().unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_definitions_keep_order() {
        struct Named(&'static str, Value);

        impl Tool for Named {
            type Input = Value;

            fn name(&self) -> &str {
                self.0
            }

            fn description(&self) -> &str {
                "named"
            }

            fn parameter_schema(&self) -> &Value {
                &self.1
            }

            fn execute(
                &self,
                _input: Value,
            ) -> impl Future<Output = ToolResult> + Send + 'static {
                ready(Ok(String::new()))
            }
        }

        let executor = Executor::with_tools(vec![
            Box::new(AnyTool(Named("web_search", json!({})))),
            Box::new(AnyTool(Named("exit_loop", json!({})))),
            Box::new(AnyTool(Named("web_search", json!({ "v": 2 })))),
        ]);
        let defs = executor.definitions();
        let names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["web_search", "exit_loop"]);
        assert_eq!(defs[0].parameters, json!({ "v": 2 }));
    }
}
