//! Byte and event streams over an HTTP response body.

mod chunks;
mod sse;

pub use chunks::{Chunks, Error as ChunksError};
pub use sse::Sse;
