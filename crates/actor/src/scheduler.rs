use std::sync::Weak;

use crate::Actor;
use crate::mailbox::{Inbox, Mailbox};

/// The actor's main loop. Returns, dropping `state` and the inbox, once the
/// actor is killed or every strong handle is gone.
pub async fn run_actor<S: Send + 'static>(
    mailbox: Weak<Mailbox<S>>,
    mut state: S,
    mut inbox: Inbox<S>,
) {
    debug!("started");
    while let Some(envelope) = inbox.recv().await {
        trace!("received {envelope:?}");

        let Some(mailbox) = mailbox.upgrade() else {
            debug!("all handles dropped, discard {envelope:?}");
            break;
        };
        let handle = Actor::from_mailbox(mailbox);
        trace_span!("proc msg").in_scope(|| envelope.open(&mut state, &handle));
    }
    debug!("will terminate");
}
