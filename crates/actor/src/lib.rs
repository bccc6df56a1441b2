//! A lightweight actor runtime on top of tokio.
//!
//! An actor owns a piece of state and handles messages one at a time with
//! exclusive access to it. Handlers are synchronous; long-running work is
//! spawned as a task that reports back by sending another message.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod error;
mod handle;
mod mailbox;
mod reply;
mod scheduler;

pub use error::ActorDeadError;
pub use handle::{Actor, WeakActor};
pub use mailbox::Message;
pub use reply::Reply;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[derive(Default)]
    struct Tally {
        value: u32,
    }

    #[derive(Debug)]
    struct Add(u32);

    impl Message<Tally> for Add {
        fn handle(self, state: &mut Tally, _handle: &Actor<Tally>) {
            state.value += self.0;
        }
    }

    #[derive(Debug)]
    struct Get(Reply<u32>);

    impl Message<Tally> for Get {
        fn handle(self, state: &mut Tally, _handle: &Actor<Tally>) {
            self.0.send(state.value);
        }
    }

    #[derive(Debug)]
    struct Forget(Reply<u32>);

    impl Message<Tally> for Forget {
        fn handle(self, _state: &mut Tally, _handle: &Actor<Tally>) {
            drop(self.0);
        }
    }

    #[tokio::test]
    async fn test_send_and_ask() {
        let actor = Actor::spawn(Tally::default(), Some("tally"));
        actor.send(Add(40)).unwrap();
        actor.send(Add(2)).unwrap();
        assert_eq!(actor.ask(Get).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_dropped_reply() {
        let actor = Actor::spawn(Tally::default(), None);
        assert!(actor.ask(Forget).await.is_err());
    }

    #[tokio::test]
    async fn test_killed_actor_rejects_messages() {
        let actor = Actor::spawn(Tally::default(), None);
        actor.try_kill();
        timeout(Duration::from_millis(500), async {
            while actor.send(Add(1)).is_ok() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(actor.ask(Get).await.is_err());
    }

    #[tokio::test]
    async fn test_weak_handle() {
        let actor = Actor::spawn(Tally::default(), None);
        let weak = actor.downgrade();
        weak.upgrade().unwrap().send(Add(1)).unwrap();
        assert_eq!(actor.ask(Get).await.unwrap(), 1);

        drop(actor);
        assert!(weak.upgrade().is_none());
    }
}
