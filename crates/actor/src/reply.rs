use std::fmt;

use tokio::sync::oneshot;

/// The sending half of a request made with [`crate::Actor::ask`].
///
/// Dropping a `Reply` without sending makes the asking side fail with
/// [`crate::ActorDeadError`].
pub struct Reply<R>(oneshot::Sender<R>);

impl<R> Reply<R> {
    #[inline]
    pub(crate) fn new(tx: oneshot::Sender<R>) -> Self {
        Self(tx)
    }

    /// Answers the request. Does nothing if the asker has gone away.
    #[inline]
    pub fn send(self, value: R) {
        if self.0.send(value).is_err() {
            trace!("reply receiver dropped");
        }
    }

    /// Returns `true` if the asker is no longer waiting.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

impl<R> fmt::Debug for Reply<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("closed", &self.0.is_closed())
            .finish()
    }
}
