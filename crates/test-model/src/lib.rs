//! A local fake model for testing purpose.

mod preset;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use deck_agent_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, OpaqueMessage,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

/// The error returned by [`TestModelProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// A streamed response of [`TestModelProvider`].
pub struct TestModelResponse {
    step_idx: usize,
    events: Vec<ModelResponseEvent>,
    transcript: String,
    event_idx: usize,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl TestModelResponse {
    fn new(step_idx: usize, preset: &PresetResponse, delay: Duration) -> Self {
        let mut transcript = String::new();
        let mut events = Vec::with_capacity(preset.events.len() + 1);
        for event in &preset.events {
            events.push(match event {
                PresetEvent::MessageDelta(delta) => {
                    transcript.push_str(delta);
                    ModelResponseEvent::MessageDelta(delta.clone())
                }
                PresetEvent::ToolCall(req) => {
                    ModelResponseEvent::ToolCall(req.clone())
                }
                PresetEvent::Usage(usage) => ModelResponseEvent::Usage(*usage),
            });
        }
        events.push(ModelResponseEvent::Completed(
            preset.inferred_finish_reason(),
        ));
        Self {
            step_idx,
            events,
            transcript,
            event_idx: 0,
            delay,
            sleep: None,
        }
    }
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.event_idx >= this.events.len() {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }

        let delay = this.delay;
        let sleep = this.sleep.get_or_insert_with(|| Box::pin(sleep(delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        let event = this.events[this.event_idx].clone();
        this.event_idx += 1;
        Poll::Ready(Ok(Some(event)))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        let id = format!("msg:{}", self.step_idx);
        Some(OpaqueMessage::new(id, self.transcript.clone()))
    }
}

#[derive(Default)]
struct Inner {
    script: Vec<PresetResponse>,
    attempts: HashMap<usize, u64>,
    requests: Vec<ModelRequest>,
    delay: Option<Duration>,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the conversation script, which
/// is how the model should respond to each assistant turn. The turn is
/// selected by counting the assistant messages already in the request, so
/// the first request of a conversation gets the first preset, and the
/// request following a tool round gets the next one. If there are no
/// enough turns in the script, an error will be returned.
///
/// Clones share the script and the request log, so tests can keep a clone
/// to inspect what an agent sent.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    inner: Arc<Mutex<Inner>>,
}

impl TestModelProvider {
    /// Appends the response for the next assistant turn.
    #[inline]
    pub fn add_assistant_turn(&self, preset: PresetResponse) {
        self.lock().script.push(preset);
    }

    /// Sets the delay before each streamed event, 1ms by default.
    #[inline]
    pub fn set_delay(&self, duration: Duration) {
        self.lock().delay = Some(duration);
    }

    /// Returns every request received so far, failed ones included.
    #[inline]
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test must not hide its own failure behind poisoning.
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn respond(&self, req: &ModelRequest) -> Result<TestModelResponse, Error> {
        let mut inner = self.lock();
        inner.requests.push(req.clone());

        let step_idx = req.assistant_turns();
        let Some(preset) = inner.script.get(step_idx).cloned() else {
            return Err(Error {
                message: format!("no preset for assistant turn {step_idx}"),
                kind: ErrorKind::Other,
            });
        };

        let attempt = inner.attempts.entry(step_idx).or_default();
        *attempt += 1;
        let failing = match preset.failures {
            Some(0) => true,
            Some(failures) => *attempt <= failures,
            None => false,
        };
        if failing {
            return Err(Error {
                message: format!("injected failure on attempt {attempt}"),
                kind: preset.error_kind.unwrap_or(ErrorKind::RateLimitExceeded),
            });
        }

        let delay = inner.delay.unwrap_or(Duration::from_millis(1));
        Ok(TestModelResponse::new(step_idx, &preset, delay))
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        ready(self.respond(req))
    }
}
