//! Provider-neutral types for talking to LLMs.
//!
//! Agents in this workspace never speak a vendor protocol directly. They
//! build a [`ModelRequest`], hand it to a [`ModelProvider`] and consume the
//! streamed [`ModelResponseEvent`]s. Each provider crate translates between
//! these types and its own wire format.
//!
//! Nothing here performs I/O; the types only describe the contract.

#![deny(missing_docs)]

mod error;
mod opaque;
mod provider;
mod request;
mod response;

pub use error::*;
pub use opaque::*;
pub use provider::*;
pub use request::*;
pub use response::*;
