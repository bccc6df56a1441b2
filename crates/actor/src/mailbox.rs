use std::any::type_name;
use std::fmt;

use tokio::select;
use tokio::sync::{mpsc, watch};

use crate::{Actor, ActorDeadError};

/// A message that an actor with state `S` can handle.
pub trait Message<S>: Send + 'static {
    /// Handles the message with exclusive access to the actor's state.
    ///
    /// `handle` refers to the actor itself, so the handler can hand it to
    /// spawned tasks that report back later.
    fn handle(self, state: &mut S, handle: &Actor<S>);
}

type Handler<S> = Box<dyn FnOnce(&mut S, &Actor<S>) + Send>;

/// A type-erased message on its way to the actor.
pub struct Envelope<S> {
    kind: &'static str,
    handler: Handler<S>,
}

impl<S: 'static> Envelope<S> {
    #[inline]
    pub fn new<M: Message<S>>(msg: M) -> Self {
        Self {
            kind: type_name::<M>(),
            handler: Box::new(move |state: &mut S, handle: &Actor<S>| {
                msg.handle(state, handle)
            }),
        }
    }
}

impl<S> Envelope<S> {
    #[inline]
    pub fn open(self, state: &mut S, handle: &Actor<S>) {
        (self.handler)(state, handle)
    }
}

impl<S> fmt::Debug for Envelope<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind)
    }
}

/// The sending side shared by every strong handle of one actor.
pub struct Mailbox<S> {
    msg_tx: mpsc::UnboundedSender<Envelope<S>>,
    kill_tx: watch::Sender<bool>,
}

/// The receiving side, owned by the actor's task.
pub struct Inbox<S> {
    msg_rx: mpsc::UnboundedReceiver<Envelope<S>>,
    kill_rx: watch::Receiver<bool>,
}

/// Creates a connected mailbox and inbox.
pub fn channel<S>() -> (Mailbox<S>, Inbox<S>) {
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();
    let (kill_tx, kill_rx) = watch::channel(false);
    (Mailbox { msg_tx, kill_tx }, Inbox { msg_rx, kill_rx })
}

impl<S> Mailbox<S> {
    #[inline]
    pub fn post(&self, envelope: Envelope<S>) -> Result<(), ActorDeadError> {
        self.msg_tx.send(envelope).map_err(|_| ActorDeadError)
    }

    #[inline]
    pub fn kill(&self) {
        self.kill_tx.send_replace(true);
    }
}

impl<S> Inbox<S> {
    /// Waits for the next message. Returns `None` once the actor is killed
    /// or no sender is left. A kill wins over queued messages.
    pub async fn recv(&mut self) -> Option<Envelope<S>> {
        if *self.kill_rx.borrow() {
            return None;
        }
        select! {
            biased;

            _ = self.kill_rx.changed() => {
                debug!("killed");
                None
            }
            envelope = self.msg_rx.recv() => envelope,
        }
    }
}
