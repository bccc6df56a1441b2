use std::fmt::{self, Debug};
use std::sync::Arc;

use deck_agent_actor::{Actor, Message, Reply};
use deck_agent_model::{
    ModelFinishReason, ModelMessage, ModelRequest, ToolCallRequest,
    ToolCallResult,
};

use super::{AgentState, TranscriptSource};
use crate::AgentError;
use crate::conversation::Conversation;
use crate::model_client::{BoxedProviderError, ModelClient, ModelClientResponse};
use crate::tool::{ToolFuture, ToolResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AgentStage {
    #[default]
    Idle,
    ModelThinking,
    RunningTools,
}

type RunReply = Reply<Result<String, AgentError>>;

#[derive(Debug)]
pub struct PendingInput {
    pub text: String,
    pub new_session: bool,
    pub reply: Option<RunReply>,
}

#[derive(Debug)]
pub struct PendingToolCall {
    id: String,
    name: String,
    result: Option<ToolResult>,
}

impl AgentState {
    fn enqueue_user_input(&mut self, input: PendingInput, handle: &Actor<Self>) {
        if self.current_stage != AgentStage::Idle {
            // Picked up again in `process_next_input` once the running
            // input has finished.
            self.pending_inputs.push_back(input);
            return;
        }
        self.process_input_checked(input, handle);
    }

    fn process_next_input(&mut self, handle: &Actor<Self>) {
        if self.current_stage != AgentStage::Idle {
            return;
        }
        if let Some(input) = self.pending_inputs.pop_front() {
            self.process_input_checked(input, handle);
        } else if let Some(on_idle) = &self.callbacks.on_idle {
            on_idle();
        }
    }

    /// Starts answering `input`, assuming the stage is checked.
    fn process_input_checked(&mut self, input: PendingInput, handle: &Actor<Self>) {
        debug!("{}: processing input ({} bytes)", self.name, input.text.len());
        if input.new_session && !self.conversation.is_empty() {
            debug!(
                "{}: new session, dropping {} conversation items",
                self.name,
                self.conversation.len()
            );
            self.conversation = Conversation::default();
        }
        self.turns = 0;
        self.emit_transcript(&input.text, TranscriptSource::User);
        self.conversation.push(
            ModelMessage::User(input.text.clone()),
            input.text.clone(),
            TranscriptSource::User,
        );
        self.active_input = Some(input);
        self.request_model(handle);
    }

    fn request_model(&mut self, handle: &Actor<Self>) {
        if self.turns >= self.max_turns {
            warn!("{}: turn limit ({}) reached", self.name, self.max_turns);
            self.finish_input(Err(AgentError::TurnLimitExceeded(self.max_turns)), handle);
            return;
        }
        let Some(model_client) = self.model_client.take() else {
            // Only one model request is in flight per agent.
            error!("{}: model client is already in use", self.name);
            return;
        };
        self.turns += 1;
        self.current_stage = AgentStage::ModelThinking;

        let request = self.build_model_request();
        let weak_handle = handle.downgrade();
        self.spawn_task(
            async move {
                let response = model_client.send_request(request).await;
                weak_handle
                    .send(ModelTurnFinished {
                        model_client,
                        response,
                    })
                    .ok();
            },
            handle,
        );
    }

    fn build_model_request(&self) -> ModelRequest {
        let mut messages = Vec::with_capacity(self.conversation.len() + 1);
        if !self.instruction.is_empty() {
            messages.push(ModelMessage::System(self.instruction.clone()));
        }
        messages.extend(self.conversation.items.iter().map(|i| i.msg.clone()));
        ModelRequest {
            messages,
            tools: self.tool_executor.definitions(),
        }
    }

    fn handle_model_response(
        &mut self,
        resp: ModelClientResponse,
        handle: &Actor<Self>,
    ) {
        if let Some(usage) = resp.usage {
            self.usage += usage;
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "model turn {} finished",
                self.turns
            );
        }

        let transcript = resp.transcript;
        let msg = match resp.opaque_msg {
            Some(opaque_msg) => ModelMessage::Opaque(opaque_msg),
            // Downgrade to a text-only message.
            None => ModelMessage::Assistant(transcript.clone()),
        };
        if !transcript.trim().is_empty() {
            self.emit_transcript(&transcript, TranscriptSource::Assistant);
        }
        self.conversation
            .push(msg, transcript.clone(), TranscriptSource::Assistant);

        if !resp.tool_calls.is_empty() {
            self.run_tools(resp.tool_calls, handle);
            return;
        }
        if resp.finish_reason == Some(ModelFinishReason::Length) {
            warn!("model output was truncated by the token limit");
        }
        self.finish_input(Ok(transcript), handle);
    }

    fn run_tools(&mut self, requests: Vec<ToolCallRequest>, handle: &Actor<Self>) {
        self.current_stage = AgentStage::RunningTools;
        if let Some(on_tool_call) = &self.callbacks.on_tool_call {
            for req in &requests {
                on_tool_call(req);
            }
        }
        self.pending_tool_calls = requests
            .iter()
            .map(|req| PendingToolCall {
                id: req.id.clone(),
                name: req.name.clone(),
                result: None,
            })
            .collect();

        let executor = Arc::clone(&self.tool_executor);
        executor.handle_requests(&requests, |index, fut: ToolFuture| {
            let weak_handle = handle.downgrade();
            self.spawn_task(
                async move {
                    let result = fut.await;
                    weak_handle.send(ToolFinished { index, result }).ok();
                },
                handle,
            );
        });
    }

    fn handle_tool_finished(
        &mut self,
        index: usize,
        result: ToolResult,
        handle: &Actor<Self>,
    ) {
        if self.current_stage != AgentStage::RunningTools {
            warn!("stale tool result #{index} discarded");
            return;
        }
        let Some(call) = self.pending_tool_calls.get_mut(index) else {
            warn!("unknown tool result #{index} discarded");
            return;
        };
        match &result {
            Ok(_) => debug!("tool {} ({}) succeeded", call.name, call.id),
            Err(err) => debug!("tool {} ({}) failed: {err}", call.name, call.id),
        }
        if let Some(on_tool_result) = &self.callbacks.on_tool_result {
            on_tool_result(&call.name, &result);
        }
        call.result = Some(result);

        if self.pending_tool_calls.iter().any(|c| c.result.is_none()) {
            return;
        }

        // All tools are done, append results in request order.
        for call in std::mem::take(&mut self.pending_tool_calls) {
            let content = match call.result {
                Some(Ok(output)) => output,
                Some(Err(err)) => format!("Error: {}", err.reason()),
                None => unreachable!("checked above"),
            };
            self.emit_transcript(&content, TranscriptSource::Tool);
            self.conversation.push(
                ModelMessage::Tool(ToolCallResult {
                    id: call.id,
                    content: content.clone(),
                }),
                content,
                TranscriptSource::Tool,
            );
        }
        self.request_model(handle);
    }

    fn finish_input(&mut self, result: Result<String, AgentError>, handle: &Actor<Self>) {
        self.current_stage = AgentStage::Idle;
        match self.active_input.take().and_then(|input| input.reply) {
            Some(reply) => reply.send(result),
            None => {
                if let Err(err) = result {
                    error!("{}: input failed: {err}", self.name);
                }
            }
        }
        debug!(
            prompt_tokens = self.usage.prompt_tokens,
            completion_tokens = self.usage.completion_tokens,
            "input finished"
        );
        self.process_next_input(handle);
    }

    #[inline]
    fn emit_transcript(&self, transcript: &str, source: TranscriptSource) {
        if let Some(on_transcript) = &self.callbacks.on_transcript {
            on_transcript(transcript, source);
        }
    }

    fn spawn_task<Fut>(&mut self, fut: Fut, handle: &Actor<Self>)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task_id = self.next_task_id;
        self.next_task_id += 1;

        let weak_handle = handle.downgrade();
        let task = tokio::spawn(async move {
            fut.await;
            weak_handle.send(TaskEnded(task_id)).ok();
        });
        self.running_tasks.insert(task_id, task);
    }
}

#[derive(Debug)]
pub struct EnqueueUserInput(pub PendingInput);

impl Message<AgentState> for EnqueueUserInput {
    fn handle(self, state: &mut AgentState, handle: &Actor<AgentState>) {
        state.enqueue_user_input(self.0, handle);
    }
}

#[derive(Debug)]
pub struct GetConversation(pub Reply<Conversation>);

impl Message<AgentState> for GetConversation {
    fn handle(self, state: &mut AgentState, _handle: &Actor<AgentState>) {
        self.0.send(state.conversation.clone());
    }
}

struct ModelTurnFinished {
    model_client: ModelClient,
    response: Result<ModelClientResponse, BoxedProviderError>,
}

impl Debug for ModelTurnFinished {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelTurnFinished")
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

impl Message<AgentState> for ModelTurnFinished {
    fn handle(self, state: &mut AgentState, handle: &Actor<AgentState>) {
        state.model_client = Some(self.model_client);
        match self.response {
            Ok(resp) => state.handle_model_response(resp, handle),
            Err(err) => {
                error!("{}: model request failed: {err}", state.name);
                let err = AgentError::Model {
                    kind: err.kind(),
                    message: err.to_string(),
                };
                state.finish_input(Err(err), handle);
            }
        }
    }
}

#[derive(Debug)]
struct ToolFinished {
    index: usize,
    result: ToolResult,
}

impl Message<AgentState> for ToolFinished {
    fn handle(self, state: &mut AgentState, handle: &Actor<AgentState>) {
        state.handle_tool_finished(self.index, self.result, handle);
    }
}

#[derive(Debug)]
struct TaskEnded(u64);

impl Message<AgentState> for TaskEnded {
    #[inline]
    fn handle(self, state: &mut AgentState, _handle: &Actor<AgentState>) {
        if state.running_tasks.remove(&self.0).is_none() {
            warn!("task {} ended but was not tracked", self.0);
        }
    }
}
