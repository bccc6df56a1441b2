use std::future::ready;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deck_agent_model::{ErrorKind, ModelMessage};
use deck_agent_test_model::{PresetEvent, PresetResponse, TestModelProvider};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::time::timeout;

use crate::tool::{Tool, ToolResult};
use crate::{AgentBuilder, AgentError, RetryPolicy, TranscriptSource};

#[derive(Deserialize)]
struct LookupInput {
    term: String,
}

struct GlossaryTool {
    schema: Value,
}

impl GlossaryTool {
    fn new() -> Self {
        Self {
            schema: json!({
                "type": "object",
                "properties": { "term": { "type": "string" } },
                "required": ["term"]
            }),
        }
    }
}

impl Tool for GlossaryTool {
    type Input = LookupInput;

    fn name(&self) -> &str {
        "glossary"
    }

    fn description(&self) -> &str {
        "Looks up a term"
    }

    fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    fn execute(
        &self,
        input: LookupInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(Ok(format!("{} means something", input.term)))
    }
}

fn tool_call(id: &str, name: &str, arguments: Value) -> PresetEvent {
    PresetEvent::tool_call(id, name, arguments)
}

#[tokio::test]
async fn test_simple_message() {
    let model_provider = TestModelProvider::default();
    model_provider.add_assistant_turn(PresetResponse::with_events([
        PresetEvent::MessageDelta("Hi, ".to_owned()),
        PresetEvent::MessageDelta("what can I do for you?".to_owned()),
    ]));

    let (idle_tx, mut idle_rx) = watch::channel::<bool>(false);

    let agent = AgentBuilder::with_model_provider(model_provider)
        .on_idle(move || {
            idle_tx.send(true).unwrap();
        })
        .build();
    agent.enqueue_user_input("Hello");

    timeout(Duration::from_millis(500), idle_rx.wait_for(|v| *v))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_run_returns_final_answer() {
    let model_provider = TestModelProvider::default();
    model_provider.add_assistant_turn(PresetResponse::text("Ecosystems 101"));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_name("outliner")
        .with_instruction("Write outlines.")
        .build();
    let answer = agent.run("Ecosystems").await.unwrap();
    assert_eq!(answer, "Ecosystems 101");

    let requests = model_provider.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].messages,
        vec![
            ModelMessage::System("Write outlines.".to_owned()),
            ModelMessage::User("Ecosystems".to_owned()),
        ]
    );
    assert!(requests[0].tools.is_empty());
}

#[tokio::test]
async fn test_tool_round_trip() {
    let model_provider = TestModelProvider::default();
    model_provider.add_assistant_turn(PresetResponse::with_events([
        PresetEvent::MessageDelta("Let me check.".to_owned()),
        tool_call("call_0", "glossary", json!({ "term": "biome" })),
        tool_call("call_1", "missing_tool", json!({})),
    ]));
    model_provider.add_assistant_turn(PresetResponse::text("A biome is..."));

    let transcripts = Arc::new(Mutex::new(vec![]));
    let tool_results = Arc::new(Mutex::new(vec![]));
    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool(GlossaryTool::new())
        .on_transcript({
            let transcripts = Arc::clone(&transcripts);
            move |text, source| {
                transcripts.lock().unwrap().push((text.to_owned(), source));
            }
        })
        .on_tool_result({
            let tool_results = Arc::clone(&tool_results);
            move |name, result| {
                tool_results
                    .lock()
                    .unwrap()
                    .push((name.to_owned(), result.is_ok()));
            }
        })
        .build();

    let answer = agent.run("What is a biome?").await.unwrap();
    assert_eq!(answer, "A biome is...");

    let requests = model_provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[0].tools[0].name, "glossary");
    let tool_messages: Vec<_> = requests[1]
        .messages
        .iter()
        .filter_map(|msg| match msg {
            ModelMessage::Tool(result) => Some(result.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(tool_messages.len(), 2);
    assert_eq!(tool_messages[0].id, "call_0");
    assert_eq!(tool_messages[0].content, "biome means something");
    assert_eq!(tool_messages[1].id, "call_1");
    assert!(tool_messages[1].content.starts_with("Error: "));

    let mut tool_results = tool_results.lock().unwrap().clone();
    tool_results.sort();
    assert_eq!(
        tool_results,
        vec![
            ("glossary".to_owned(), true),
            ("missing_tool".to_owned(), false),
        ]
    );

    let transcripts = transcripts.lock().unwrap();
    let sources: Vec<_> = transcripts.iter().map(|(_, s)| *s).collect();
    assert_eq!(
        sources,
        [
            TranscriptSource::User,
            TranscriptSource::Assistant,
            TranscriptSource::Tool,
            TranscriptSource::Tool,
            TranscriptSource::Assistant,
        ]
    );
}

#[tokio::test]
async fn test_turn_limit() {
    let model_provider = TestModelProvider::default();
    for i in 0..3 {
        model_provider.add_assistant_turn(PresetResponse::with_events([
            tool_call(&format!("call_{i}"), "glossary", json!({ "term": "x" })),
        ]));
    }

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool(GlossaryTool::new())
        .with_max_turns(2)
        .build();
    let err = agent.run("Loop forever").await.unwrap_err();
    assert_eq!(err, AgentError::TurnLimitExceeded(2));
    assert_eq!(model_provider.requests().len(), 2);
}

#[tokio::test]
async fn test_model_error_then_next_input() {
    let model_provider = TestModelProvider::default();
    model_provider.add_assistant_turn(
        PresetResponse::text("unreachable")
            .with_failures(0)
            .with_error_kind(ErrorKind::Moderated),
    );

    let agent = AgentBuilder::with_model_provider(model_provider)
        .with_retry_policy(RetryPolicy::never())
        .build();
    let err = agent.run("Forbidden topic").await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Model {
            kind: ErrorKind::Moderated,
            ..
        }
    ));

    // The agent is idle again and keeps its history.
    let conversation = agent.conversation().await.unwrap();
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation.items()[0].transcript(), "Forbidden topic");
}

#[tokio::test]
async fn test_inputs_are_queued() {
    let model_provider = TestModelProvider::default();
    model_provider.set_delay(Duration::from_millis(5));
    model_provider.add_assistant_turn(PresetResponse::text("first"));
    model_provider.add_assistant_turn(PresetResponse::text("second"));

    let agent = AgentBuilder::with_model_provider(model_provider).build();
    let (a, b) = tokio::join!(agent.run("one"), agent.run("two"));
    assert_eq!(a.unwrap(), "first");
    assert_eq!(b.unwrap(), "second");

    let transcript = agent.conversation().await.unwrap().to_transcript();
    assert_eq!(
        transcript,
        "[user] one\n\n[assistant] first\n\n[user] two\n\n[assistant] second"
    );
}

fn quick_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(2),
        max_elapsed_time: None,
        max_retries,
    }
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let model_provider = TestModelProvider::default();
    model_provider.add_assistant_turn(
        PresetResponse::text("after the storm").with_failures(2),
    );

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_retry_policy(quick_retries(3))
        .build();
    let answer = agent.run("Weather").await.unwrap();
    assert_eq!(answer, "after the storm");
    assert_eq!(model_provider.requests().len(), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let model_provider = TestModelProvider::default();
    model_provider.add_assistant_turn(
        PresetResponse::text("unreachable")
            .with_failures(0)
            .with_error_kind(ErrorKind::Unavailable),
    );

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_retry_policy(quick_retries(2))
        .build();
    let err = agent.run("Anyone there?").await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Model {
            kind: ErrorKind::Unavailable,
            ..
        }
    ));
    assert_eq!(model_provider.requests().len(), 3);
}

#[tokio::test]
async fn test_permanent_errors_are_not_retried() {
    let model_provider = TestModelProvider::default();
    model_provider.add_assistant_turn(
        PresetResponse::text("unreachable")
            .with_failures(1)
            .with_error_kind(ErrorKind::InvalidResponse),
    );

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_retry_policy(quick_retries(3))
        .build();
    let err = agent.run("Garbled").await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Model {
            kind: ErrorKind::InvalidResponse,
            ..
        }
    ));
    assert_eq!(model_provider.requests().len(), 1);
}

#[tokio::test]
async fn test_new_session_forgets_history() {
    let model_provider = TestModelProvider::default();
    model_provider.add_assistant_turn(PresetResponse::text("Noted."));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_instruction("Take notes.")
        .build();
    agent.run("Cells").await.unwrap();
    agent.run_in_new_session("Volcanoes").await.unwrap();

    let requests = model_provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[1].messages,
        vec![
            ModelMessage::System("Take notes.".to_owned()),
            ModelMessage::User("Volcanoes".to_owned()),
        ]
    );
    let transcript = agent.conversation().await.unwrap().to_transcript();
    assert_eq!(transcript, "[user] Volcanoes\n\n[assistant] Noted.");
}
