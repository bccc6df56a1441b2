use std::error::Error;
use std::fmt;

/// Returned when a message is sent to an actor that has stopped, or when
/// the actor stops before answering a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActorDeadError;

impl fmt::Display for ActorDeadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the actor has stopped")
    }
}

impl Error for ActorDeadError {}
