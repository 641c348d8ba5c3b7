//! Listener delivery.
//!
//! Results never run on the worker that produced them. Workers hand finished
//! payloads to a single delivery task, so a slow listener delays other
//! listeners but never a shard.

use crate::error::{NetMemError, Result};
use crate::model::{DeleteOutcome, Status};
use std::panic::AssertUnwindSafe;
use tokio::sync::{mpsc, oneshot};
use ulid::Ulid;

/// Callback invoked exactly once with the result of one request.
pub type Listener<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// Listener that forwards its result into a oneshot channel.
pub fn channel_listener<T: Send + 'static>() -> (Listener<T>, oneshot::Receiver<T>) {
    let (tx, rx) = oneshot::channel();
    let listener: Listener<T> = Box::new(move |value| {
        let _ = tx.send(value);
    });
    (listener, rx)
}

/// Payload types a listener can receive.
pub trait Outcome: Send + 'static {
    fn status(&self) -> Status;

    /// Payload reported when the request fails before producing one.
    fn failed(error: NetMemError) -> Self;
}

impl<T: Send + 'static> Outcome for Result<T> {
    fn status(&self) -> Status {
        match self {
            Ok(_) => Status::Success,
            Err(error) => error.status(),
        }
    }

    fn failed(error: NetMemError) -> Self {
        Err(error)
    }
}

impl Outcome for DeleteOutcome {
    fn status(&self) -> Status {
        self.status
    }

    fn failed(error: NetMemError) -> Self {
        DeleteOutcome {
            status: error.status(),
            affected: 0,
        }
    }
}

type Delivery = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl DeliveryQueue {
    /// Spawn the delivery task. It stops once every queue handle is dropped.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();

        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                if std::panic::catch_unwind(AssertUnwindSafe(delivery)).is_err() {
                    tracing::error!("Listener panicked during delivery");
                }
            }
            tracing::debug!("Delivery queue drained");
        });

        Self { tx }
    }

    fn push(&self, delivery: Delivery) {
        if self.tx.send(delivery).is_err() {
            tracing::warn!("Delivery queue closed; dropping listener callback");
        }
    }
}

/// Exactly-once completion guard for one request.
///
/// `complete` hands the payload to the delivery queue. Dropping an
/// uncompleted guard (job panic, worker gone) reports `INTERNAL` instead.
pub struct Completion<T: Outcome> {
    request_id: Ulid,
    operation: &'static str,
    listener: Option<Listener<T>>,
    queue: DeliveryQueue,
}

impl<T: Outcome> Completion<T> {
    pub fn new(operation: &'static str, listener: Option<Listener<T>>, queue: DeliveryQueue) -> Self {
        let request_id = Ulid::new();
        tracing::debug!("Accepted request {} ({})", request_id, operation);
        Self {
            request_id,
            operation,
            listener,
            queue,
        }
    }

    pub fn complete(mut self, value: T) {
        tracing::debug!(
            "Completed request {} ({}) status={}",
            self.request_id,
            self.operation,
            value.status()
        );
        self.deliver(value);
    }

    fn deliver(&mut self, value: T) {
        if let Some(listener) = self.listener.take() {
            self.queue.push(Box::new(move || listener(value)));
        }
    }
}

impl<T: Outcome> Drop for Completion<T> {
    fn drop(&mut self) {
        if self.listener.is_some() {
            tracing::error!(
                "Request {} ({}) dropped before completion",
                self.request_id,
                self.operation
            );
            let value = T::failed(NetMemError::Internal(format!(
                "{} request dropped before completion",
                self.operation
            )));
            self.deliver(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_complete_delivers_once() {
        let queue = DeliveryQueue::spawn();
        let (listener, rx) = channel_listener::<Result<u32>>();

        let completion = Completion::new("test", Some(listener), queue);
        completion.complete(Ok(7));

        assert_eq!(rx.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_drop_delivers_internal() {
        let queue = DeliveryQueue::spawn();
        let (listener, rx) = channel_listener::<DeleteOutcome>();

        drop(Completion::new("delete", Some(listener), queue));

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.status, Status::Internal);
        assert_eq!(outcome.affected, 0);
    }

    fn explode(_: Result<()>) {
        panic!("listener bug")
    }

    #[tokio::test]
    async fn test_listener_panic_does_not_stop_delivery() {
        let queue = DeliveryQueue::spawn();
        let calls = Arc::new(AtomicUsize::new(0));

        let panicking: Listener<Result<()>> = Box::new(explode);
        Completion::new("first", Some(panicking), queue.clone()).complete(Ok(()));

        let counter = calls.clone();
        let (tx, rx) = oneshot::channel();
        let counting: Listener<Result<()>> = Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        });
        Completion::new("second", Some(counting), queue).complete(Ok(()));

        rx.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_listener_is_silent() {
        let queue = DeliveryQueue::spawn();
        Completion::<Result<()>>::new("fire-and-forget", None, queue).complete(Ok(()));
    }
}
