use std::sync::{Arc, Weak};

use tokio::sync::oneshot;
use tracing::Instrument;

use crate::mailbox::{self, Envelope, Mailbox};
use crate::scheduler::run_actor;
use crate::{ActorDeadError, Message, Reply};

/// A strong handle to an actor.
///
/// The actor keeps running while at least one strong handle exists. Hand
/// a [`WeakActor`] to background tasks that only report back, so they
/// don't keep the actor alive on their own.
pub struct Actor<S> {
    mailbox: Arc<Mailbox<S>>,
}

impl<S: Send + 'static> Actor<S> {
    /// Spawns a new actor on the current tokio runtime.
    ///
    /// `label` is attached to the actor's tracing span.
    pub fn spawn(state: S, label: Option<&str>) -> Self {
        let (mailbox, inbox) = mailbox::channel();
        let mailbox = Arc::new(mailbox);
        tokio::spawn(
            run_actor(Arc::downgrade(&mailbox), state, inbox)
                .instrument(debug_span!("actor", label = label)),
        );
        Self { mailbox }
    }

    #[inline]
    pub(crate) fn from_mailbox(mailbox: Arc<Mailbox<S>>) -> Self {
        Self { mailbox }
    }

    /// Sends a message to the actor.
    #[inline]
    pub fn send<M: Message<S>>(
        &self,
        msg: M,
    ) -> Result<(), ActorDeadError> {
        self.mailbox.post(Envelope::new(msg))
    }

    /// Sends a message built around a [`Reply`] and waits for the answer.
    pub async fn ask<M, R, F>(&self, make_msg: F) -> Result<R, ActorDeadError>
    where
        F: FnOnce(Reply<R>) -> M,
        M: Message<S>,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(make_msg(Reply::new(tx)))?;
        rx.await.map_err(|_| ActorDeadError)
    }

    /// Attempts to kill the actor.
    ///
    /// The actor finishes the message it is handling, if any, and then
    /// stops without handling queued messages.
    #[inline]
    pub fn try_kill(&self) {
        self.mailbox.kill();
    }

    /// Creates a weak handle to this actor.
    #[inline]
    pub fn downgrade(&self) -> WeakActor<S> {
        WeakActor {
            mailbox: Arc::downgrade(&self.mailbox),
        }
    }
}

impl<S> Clone for Actor<S> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}

/// A handle that doesn't keep the actor alive.
pub struct WeakActor<S> {
    mailbox: Weak<Mailbox<S>>,
}

impl<S: Send + 'static> WeakActor<S> {
    /// Returns a strong handle if the actor is still reachable.
    #[inline]
    pub fn upgrade(&self) -> Option<Actor<S>> {
        self.mailbox.upgrade().map(Actor::from_mailbox)
    }

    /// Sends a message if the actor is still reachable.
    #[inline]
    pub fn send<M: Message<S>>(
        &self,
        msg: M,
    ) -> Result<(), ActorDeadError> {
        self.upgrade().ok_or(ActorDeadError)?.send(msg)
    }
}

impl<S> Clone for WeakActor<S> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            mailbox: Weak::clone(&self.mailbox),
        }
    }
}
