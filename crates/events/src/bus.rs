//! Event publishing/subscription abstraction (mechanics only).
//!
//! The event bus is the **distribution layer** for events after they have been
//! persisted: projections and external listeners subscribe, the dispatcher
//! publishes. It is intentionally lightweight and makes minimal assumptions:
//!
//! - **Transport-agnostic**: in-memory channels here, brokers elsewhere
//! - **At-least-once delivery**: consumers must be idempotent
//! - **No persistence**: the event store is the source of truth, the bus only
//!   fans out copies
//!
//! At-least-once is acceptable precisely because events are appended to the
//! store *before* publication: a consumer that missed or duplicated a message
//! can always be rebuilt from the store.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

/// A subscription to an event stream.
///
/// Each subscription gets a copy of all events published to the bus
/// (broadcast semantics). Subscriptions are designed for single-threaded
/// consumption; give each consuming thread its own subscription.
///
/// Messages arrive in publication order per publisher. Concurrent publishers
/// have no mutual ordering unless the bus implementation provides one.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// Sits between the event store and event consumers:
///
/// ```text
/// Command → Event Store (append) → Event Bus (publish) → Consumers
///                                                           ├─ Projections
///                                                           └─ External listeners
/// ```
///
/// Events are **stored first**, then **published**. If publication fails the
/// events are still in the store and can be republished, so `publish()`
/// failures are surfaced to the caller rather than swallowed.
///
/// The trait requires `Send + Sync`; multiple threads can publish
/// concurrently.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
