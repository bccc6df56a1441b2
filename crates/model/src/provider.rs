use std::error::Error;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// Errors reported by a [`ModelProvider`] and its responses.
///
/// The [`ErrorKind`] decides whether a caller retries the request.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Classifies the error.
    fn kind(&self) -> ErrorKind;
}

/// One configured model behind some API.
///
/// Providers are shared by agents and may see the same request more than
/// once when a failed attempt is retried, so they should not keep
/// per-request state.
pub trait ModelProvider: Send + Sync {
    /// Error of a failed request or a broken response.
    type Error: ModelProviderError;

    /// Streamed answer to a request.
    type Response: ModelResponse<Error = Self::Error>;

    /// Starts sampling `req`. The returned future owns everything it
    /// needs, so it can be spawned after `self` and `req` are gone.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}
