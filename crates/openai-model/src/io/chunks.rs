#[cfg(test)]
use std::collections::VecDeque;

use bytes::Bytes;
use reqwest::Response;

/// The body stream broke before it was complete.
#[derive(Debug, PartialEq, Eq)]
pub struct Error(pub String);

enum Source {
    Body(Response),
    #[cfg(test)]
    Canned(VecDeque<Bytes>),
}

/// The byte chunks of a response body, in arrival order.
pub struct Chunks {
    source: Source,
    received: usize,
}

impl Chunks {
    pub fn from_response(response: Response) -> Self {
        Self::with_source(Source::Body(response))
    }

    #[cfg(test)]
    pub fn from_vec_deque(chunks: VecDeque<Bytes>) -> Self {
        Self::with_source(Source::Canned(chunks))
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            received: 0,
        }
    }

    /// Returns the next chunk, or `None` at the end of the body.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        let chunk = match &mut self.source {
            Source::Body(response) => response.chunk().await.map_err(|err| {
                Error(format!(
                    "body broke after {} bytes: {}",
                    self.received,
                    err.without_url()
                ))
            })?,
            #[cfg(test)]
            Source::Canned(chunks) => chunks.pop_front(),
        };
        if let Some(chunk) = &chunk {
            self.received += chunk.len();
        }
        Ok(chunk)
    }
}
