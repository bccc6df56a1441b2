use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, ready};

use deck_agent_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    OpaqueMessage, TokenUsage, ToolCallRequest,
};
use futures_util::future::BoxFuture;
use pin_project_lite::pin_project;
use serde_json::Value;

use crate::Error;
use crate::io::Sse;
use crate::proto::{ChatCompletionChunk, FunctionToolCall, Message, ToolCall};

static NEXT_RESPONSE_ID: AtomicU64 = AtomicU64::new(0);

struct PartialState {
    sse: Sse,
    id: Option<String>,
    content: String,
    reasoning_content: Option<String>,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<ModelFinishReason>,
    usage: Option<TokenUsage>,
    // Set once the stream is drained. From then on the queued events below
    // are handed out one by one.
    done: bool,
    pending_tool_calls: VecDeque<ToolCallRequest>,
    pending_usage: Option<TokenUsage>,
    pending_finish_reason: Option<ModelFinishReason>,
}

impl PartialState {
    fn new(sse: Sse) -> Self {
        Self {
            sse,
            id: None,
            content: String::new(),
            reasoning_content: None,
            tool_calls: vec![],
            finish_reason: None,
            usage: None,
            done: false,
            pending_tool_calls: VecDeque::new(),
            pending_usage: None,
            pending_finish_reason: None,
        }
    }

    fn apply_chunk(&mut self, mut chunk: ChatCompletionChunk) -> Option<String> {
        if self.id.is_none() {
            self.id = chunk.id.take();
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into());
        }

        let choice = chunk.choices.pop()?;
        if let Some(finish_reason) = choice.finish_reason.as_deref() {
            self.finish_reason = Some(match finish_reason {
                "tool_calls" | "function_call" => ModelFinishReason::ToolCalls,
                "length" => ModelFinishReason::Length,
                _ => ModelFinishReason::Stop,
            });
        }
        if let Some(reasoning_content) = &choice.delta.reasoning_content {
            self.reasoning_content
                .get_or_insert_default()
                .push_str(reasoning_content);
        }
        for tool_call in choice.delta.tool_calls.into_iter().flatten() {
            self.merge_tool_call(tool_call);
        }
        let content = choice.delta.content.filter(|c| !c.is_empty())?;
        self.content.push_str(&content);
        Some(content)
    }

    fn merge_tool_call(&mut self, tool_call: ToolCall) {
        // Fragments without an index are complete calls on their own.
        let partial_tool_call = tool_call.index.and_then(|index| {
            self.tool_calls
                .iter_mut()
                .find(|t| t.index == Some(index))
        });
        let Some(partial_tool_call) = partial_tool_call else {
            self.tool_calls.push(tool_call);
            return;
        };

        // Patch the partial tool call.
        if let Some(id) = tool_call.id {
            partial_tool_call.id.get_or_insert_default().push_str(&id);
        }
        if let Some(ty) = tool_call.r#type {
            partial_tool_call.r#type.get_or_insert(ty);
        }
        let Some(function) = tool_call.function else {
            return;
        };
        match &mut partial_tool_call.function {
            Some(partial_func) => {
                if let Some(name) = function.name {
                    partial_func.name.get_or_insert_default().push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    partial_func
                        .arguments
                        .get_or_insert_default()
                        .push_str(&arguments);
                }
            }
            None => partial_tool_call.function = Some(function),
        }
    }

    /// Normalizes the accumulated tool calls and queues the trailing events.
    fn finish_stream(&mut self) {
        self.done = true;
        for (idx, tool_call) in self.tool_calls.iter_mut().enumerate() {
            let id = tool_call
                .id
                .get_or_insert_with(|| format!("call_{idx}"))
                .clone();
            tool_call.r#type.get_or_insert_with(|| "function".to_owned());
            let function =
                tool_call.function.get_or_insert_with(|| FunctionToolCall {
                    name: None,
                    arguments: None,
                });
            let name = function.name.clone().unwrap_or_default();
            let raw_arguments = function
                .arguments
                .get_or_insert_with(|| "{}".to_owned());
            if raw_arguments.trim().is_empty() {
                *raw_arguments = "{}".to_owned();
            }
            let arguments = match serde_json::from_str::<Value>(raw_arguments)
            {
                Ok(arguments) => arguments,
                Err(err) => {
                    warn!("malformed arguments for `{name}`: {err}");
                    Value::String(raw_arguments.clone())
                }
            };
            self.pending_tool_calls.push_back(ToolCallRequest {
                id,
                name,
                arguments,
            });
        }

        self.pending_usage = self.usage;
        let finish_reason = if self.tool_calls.is_empty() {
            self.finish_reason.unwrap_or(ModelFinishReason::Stop)
        } else {
            // Some providers report `stop` even when calling tools.
            ModelFinishReason::ToolCalls
        };
        self.pending_finish_reason = Some(finish_reason);
    }

    fn into_message(self) -> (String, Message) {
        let id = self.id.unwrap_or_else(|| {
            let n = NEXT_RESPONSE_ID.fetch_add(1, Ordering::Relaxed);
            format!("response-{n}")
        });
        let tool_calls = if self.tool_calls.is_empty() {
            None
        } else {
            Some(self.tool_calls)
        };
        let content = if self.content.is_empty() && tool_calls.is_some() {
            None
        } else {
            Some(self.content)
        };
        let msg = Message::Assistant {
            content,
            tool_calls,
            reasoning_content: self.reasoning_content,
        };
        (id, msg)
    }
}

type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    /// A streamed chat completion.
    pub struct OpenAIResponse {
        next_event_fut: Option<BoxFuture<'static, NextEvent>>,
        full_msg: Option<(String, Message)>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub(crate) fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState::new(sse);
        Self {
            next_event_fut: Some(Box::pin(next_event(partial_state))),
            full_msg: None,
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, partial_state)) => {
                    *this.next_event_fut = None;
                    *this.full_msg = Some(partial_state.into_message());
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        *this.next_event_fut = Some(Box::pin(next_event(partial_state)));

        Poll::Ready(Ok(Some(event)))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        self.full_msg
            .as_ref()
            .map(|(id, msg)| OpaqueMessage::new(id, msg.clone()))
    }
}

async fn next_event(mut partial_state: PartialState) -> NextEvent {
    while !partial_state.done {
        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                partial_state.finish_stream();
                break;
            }
            Err(err) => {
                return Err(Error::new(
                    format!("broken event stream: {err:?}"),
                    ErrorKind::Other,
                ));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event.trim() == "[DONE]" {
            partial_state.finish_stream();
            break;
        }

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| {
                Error::new(
                    format!("unexpected chunk: {err}"),
                    ErrorKind::InvalidResponse,
                )
            })?;
        if let Some(message_delta) = partial_state.apply_chunk(chunk) {
            return Ok((
                Some(ModelResponseEvent::MessageDelta(message_delta)),
                partial_state,
            ));
        }
    }

    // The order of events are important. Message deltas were emitted while
    // streaming, then come tool calls, usage and the finish reason.

    if let Some(tool_call) = partial_state.pending_tool_calls.pop_front() {
        return Ok((Some(ModelResponseEvent::ToolCall(tool_call)), partial_state));
    }

    if let Some(usage) = partial_state.pending_usage.take() {
        return Ok((Some(ModelResponseEvent::Usage(usage)), partial_state));
    }

    if let Some(finish_reason) = partial_state.pending_finish_reason.take() {
        return Ok((
            Some(ModelResponseEvent::Completed(finish_reason)),
            partial_state,
        ));
    }

    Ok((None, partial_state))
}
