use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use deck_agent_model::{
    ModelFinishReason, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent, OpaqueMessage, TokenUsage,
    ToolCallRequest,
};
use tracing::Instrument;

pub(crate) type BoxedProviderError = Box<dyn ModelProviderError>;
type SendRequestResult = Result<ModelClientResponse, BoxedProviderError>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type HandlerFn =
    Arc<dyn Fn(ModelRequest) -> BoxedSendRequestFuture + Send + Sync>;

/// How a failed model request is retried.
///
/// Only errors whose kind is retryable (rate limits, unavailable
/// providers) are retried, with exponential backoff between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Upper bound of a single delay.
    pub max_interval: Duration,
    /// Total time after which no more retries are made. `None` means no
    /// time limit.
    pub max_elapsed_time: Option<Duration>,
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[inline]
    pub fn never() -> Self {
        Self {
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            max_elapsed_time: Some(Duration::ZERO),
            max_retries: 0,
        }
    }

    fn to_backoff(self) -> impl Backoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(self.max_elapsed_time)
            .build()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            max_elapsed_time: Some(Duration::from_secs(90)),
            max_retries: 6,
        }
    }
}

/// A wrapper around a model provider that erases its type and drains
/// streamed responses into a [`ModelClientResponse`].
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    retry_policy: RetryPolicy,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // `ModelClient` has no generic parameter, so `P` is erased here.
        let handler_fn: HandlerFn = Arc::new(move |req| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {req:?}");
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self {
            handler_fn,
            retry_policy: RetryPolicy::default(),
        }
    }

    #[inline]
    pub fn set_retry_policy(&mut self, retry_policy: RetryPolicy) {
        self.retry_policy = retry_policy;
    }

    /// Sends a request and returns the complete response, retrying
    /// retryable failures according to the retry policy.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    pub async fn send_request(
        &self,
        req: ModelRequest,
    ) -> Result<ModelClientResponse, BoxedProviderError> {
        let mut backoff = self.retry_policy.to_backoff();
        let mut attempt = 1u32;
        loop {
            let err = match (self.handler_fn)(req.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(err) => err,
            };
            if !err.kind().is_retryable() {
                return Err(err);
            }
            let delay = if attempt > self.retry_policy.max_retries {
                None
            } else {
                backoff.next_backoff()
            };
            let Some(delay) = delay else {
                warn!("giving up after {attempt} attempts: {err}");
                return Err(err);
            };
            warn!("attempt {attempt} failed ({err}), retrying in {delay:?}");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug)]
pub struct ModelClientResponse {
    pub transcript: String,
    pub opaque_msg: Option<OpaqueMessage>,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
    pub usage: Option<TokenUsage>,
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            debug!("request failed: {err:?}");
            return Err(Box::new(err));
        }
    };

    let mut transcript = String::new();
    let opaque_msg;
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;
    let mut usage = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                debug!("response failed: {err:?}");
                return Err(Box::new(err));
            }
        };

        let Some(event) = event else {
            // The response ended gracefully, now the complete message is
            // available.
            opaque_msg = pinned_resp.make_opaque_message();
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(msg) => {
                transcript.push_str(&msg);
            }
            ModelResponseEvent::ToolCall(req) => {
                tool_calls.push(req);
            }
            ModelResponseEvent::Usage(u) => {
                *usage.get_or_insert_with(TokenUsage::default) += u;
            }
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");

    Ok(ModelClientResponse {
        transcript,
        opaque_msg,
        tool_calls,
        finish_reason,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use deck_agent_model::{ErrorKind, ModelMessage};
    use deck_agent_test_model::{
        PresetEvent, PresetResponse, TestModelProvider,
    };

    use super::*;

    fn hi_request() -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![],
        }
    }

    fn fast_retries() -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            max_elapsed_time: Some(Duration::from_secs(5)),
            max_retries: 5,
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let model_provider = TestModelProvider::default();
        model_provider.add_assistant_turn(PresetResponse::with_events([
            PresetEvent::MessageDelta("How ".to_owned()),
            PresetEvent::MessageDelta("are ".to_owned()),
            PresetEvent::MessageDelta("you?".to_owned()),
        ]));

        let model_client = ModelClient::new(model_provider);

        for _ in 0..3 {
            let resp = model_client.send_request(hi_request()).await.unwrap();
            assert_eq!(resp.transcript, "How are you?");
            assert!(resp.opaque_msg.is_some());
            assert!(resp.tool_calls.is_empty());
            assert_eq!(resp.finish_reason, Some(ModelFinishReason::Stop));
        }
    }

    #[tokio::test]
    async fn test_error_handling() {
        let model_provider = TestModelProvider::default();
        let model_client = ModelClient::new(model_provider);
        let err = model_client
            .send_request(hi_request())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[tokio::test]
    async fn test_retries_rate_limits() {
        let model_provider = TestModelProvider::default();
        model_provider.add_assistant_turn(
            PresetResponse::text("Recovered").with_failures(2),
        );

        let mut model_client = ModelClient::new(model_provider.clone());
        model_client.set_retry_policy(fast_retries());
        let resp = model_client.send_request(hi_request()).await.unwrap();
        assert_eq!(resp.transcript, "Recovered");
        assert_eq!(model_provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let model_provider = TestModelProvider::default();
        model_provider.add_assistant_turn(
            PresetResponse::text("never")
                .with_failures(0)
                .with_error_kind(ErrorKind::Moderated),
        );

        let mut model_client = ModelClient::new(model_provider.clone());
        model_client.set_retry_policy(fast_retries());
        let err = model_client
            .send_request(hi_request())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Moderated);
        assert_eq!(model_provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_never_policy_gives_up() {
        let model_provider = TestModelProvider::default();
        model_provider
            .add_assistant_turn(PresetResponse::text("never").with_failures(0));

        let mut model_client = ModelClient::new(model_provider.clone());
        model_client.set_retry_policy(RetryPolicy::never());
        let err = model_client
            .send_request(hi_request())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert_eq!(model_provider.requests().len(), 1);
    }
}
