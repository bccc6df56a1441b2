use deck_agent_model::{
    ErrorKind, ModelFinishReason, TokenUsage, ToolCallRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallRequest),
    #[serde(rename = "usage")]
    Usage(TokenUsage),
}

impl PresetEvent {
    /// Creates a tool call event.
    #[inline]
    pub fn tool_call(id: &str, name: &str, arguments: Value) -> Self {
        Self::ToolCall(ToolCallRequest {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments,
        })
    }
}

/// The preset response for an assistant turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request will fail in the first `failure` attempts.
    /// `Some(0)` means the request will fail infinitely.
    #[serde(default)]
    pub failures: Option<u64>,
    /// The kind of the injected failures, `RateLimitExceeded` if unset.
    #[serde(skip)]
    pub error_kind: Option<ErrorKind>,
    /// Overrides the finish reason, which is otherwise inferred from
    /// the events.
    #[serde(default)]
    pub finish_reason: Option<ModelFinishReason>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
            error_kind: None,
            finish_reason: None,
        }
    }

    /// Creates a `PresetResponse` that answers with a single message.
    #[inline]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::with_events([PresetEvent::MessageDelta(text.into())])
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Sets the kind of the injected failures.
    #[inline]
    pub fn with_error_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    /// Overrides the finish reason.
    #[inline]
    pub fn with_finish_reason(mut self, reason: ModelFinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    pub(crate) fn inferred_finish_reason(&self) -> ModelFinishReason {
        if let Some(reason) = self.finish_reason {
            return reason;
        }
        let has_tool_call = self
            .events
            .iter()
            .any(|event| matches!(event, PresetEvent::ToolCall(_)));
        if has_tool_call {
            ModelFinishReason::ToolCalls
        } else {
            ModelFinishReason::Stop
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_deserialize_script() {
        let response: PresetResponse = serde_json::from_value(json!({
            "events": [
                { "type": "message_delta", "data": "Looking it up." },
                {
                    "type": "tool_call",
                    "data": {
                        "id": "1",
                        "name": "web_search",
                        "arguments": { "query": "coral reefs" }
                    }
                }
            ]
        }))
        .unwrap();

        assert_eq!(
            response,
            PresetResponse::with_events([
                PresetEvent::MessageDelta("Looking it up.".to_owned()),
                PresetEvent::tool_call(
                    "1",
                    "web_search",
                    json!({ "query": "coral reefs" })
                ),
            ])
        );
        assert_eq!(
            response.inferred_finish_reason(),
            ModelFinishReason::ToolCalls
        );
    }

    #[test]
    fn test_finish_reason_override() {
        let response = PresetResponse::text("Cut")
            .with_finish_reason(ModelFinishReason::Length);
        assert_eq!(response.inferred_finish_reason(), ModelFinishReason::Length);
    }
}
