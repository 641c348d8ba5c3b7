//! Request routing.
//!
//! Key-bound work goes to the shard owning the key, so requests for one key
//! (or one event cluster) run in submission order while different shards run
//! in parallel. Cluster-wide fan-out is coordinated from separate lanes that
//! only ever wait on shards, never the other way round.

pub mod listener;
pub mod shard;

pub use listener::{Completion, DeliveryQueue, Listener, Outcome, channel_listener};
pub use shard::shard_for_key;

use crate::error::{NetMemError, Result};
use futures_util::FutureExt;
use shard::{Job, spawn_worker};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Barrier, Mutex, mpsc, oneshot};

#[derive(Clone)]
pub struct Dispatcher {
    shards: Arc<Vec<mpsc::UnboundedSender<Job>>>,
    lanes: Arc<Vec<mpsc::UnboundedSender<Job>>>,
    delivery: DeliveryQueue,
    next_unkeyed: Arc<AtomicUsize>,
    // Held for a whole quiesce; two barriers queued in different orders on
    // different shards would wait on each other forever.
    quiesce_lock: Arc<Mutex<()>>,
}

impl Dispatcher {
    /// Spawn workers and the delivery task. Must run inside a tokio runtime.
    pub fn start(shard_count: usize, lane_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|i| spawn_worker(format!("shard-{}", i)))
            .collect();
        let lanes = (0..lane_count.max(1))
            .map(|i| spawn_worker(format!("cluster-lane-{}", i)))
            .collect();

        tracing::debug!(
            "Dispatcher started with {} shards and {} cluster lanes",
            shard_count,
            lane_count
        );

        Self {
            shards: Arc::new(shards),
            lanes: Arc::new(lanes),
            delivery: DeliveryQueue::spawn(),
            next_unkeyed: Arc::new(AtomicUsize::new(0)),
            quiesce_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn shard_for(&self, key: &str) -> usize {
        shard_for_key(key, self.shards.len())
    }

    pub fn completion<T: Outcome>(
        &self,
        operation: &'static str,
        listener: Option<Listener<T>>,
    ) -> Completion<T> {
        Completion::new(operation, listener, self.delivery.clone())
    }

    pub fn submit_to_shard<F>(&self, shard: usize, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let index = shard % self.shards.len();
        if self.shards[index].send(work.boxed()).is_err() {
            tracing::warn!("Shard {} is closed; request dropped", index);
        }
    }

    pub fn submit_keyed<F>(&self, key: &str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit_to_shard(self.shard_for(key), work);
    }

    /// Work that reads across keys; spread round-robin over the shards.
    pub fn submit_unkeyed<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shard = self.next_unkeyed.fetch_add(1, Ordering::Relaxed);
        self.submit_to_shard(shard, work);
    }

    /// Coordination work for one cluster. Serialized per cluster.
    pub fn submit_cluster<F>(&self, cluster: &str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let index = shard_for_key(cluster, self.lanes.len());
        if self.lanes[index].send(work.boxed()).is_err() {
            tracing::warn!("Cluster lane {} is closed; request dropped", index);
        }
    }

    /// Run `work` on a shard and wait for its value.
    pub fn call_on_shard<T, F>(
        &self,
        shard: usize,
        work: F,
    ) -> impl Future<Output = Result<T>> + use<T, F>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit_to_shard(shard, async move {
            let _ = tx.send(work.await);
        });

        async move {
            rx.await.map_err(|_| {
                NetMemError::Internal(format!("shard {} dropped a fan-out request", shard))
            })
        }
    }

    /// Park every shard, run `work` while nothing else touches the store, then
    /// release the shards. Concurrent calls run one after another.
    pub async fn quiesce<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        let _exclusive = self.quiesce_lock.lock().await;
        let barrier = Arc::new(Barrier::new(self.shards.len() + 1));

        for shard in 0..self.shards.len() {
            let barrier = barrier.clone();
            self.submit_to_shard(shard, async move {
                barrier.wait().await;
                barrier.wait().await;
            });
        }

        barrier.wait().await;
        let result = AssertUnwindSafe(work)
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(NetMemError::Internal("quiesced work panicked".to_string())));
        barrier.wait().await;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_call_on_shard_returns_value() {
        let dispatcher = Dispatcher::start(2, 1);
        let value = dispatcher.call_on_shard(1, async { 41 + 1 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_call_on_shard_reports_panic() {
        let dispatcher = Dispatcher::start(1, 1);
        let result: Result<u32> = dispatcher
            .call_on_shard(0, async {
                let missing: Option<u32> = None;
                missing.expect("boom")
            })
            .await;
        assert!(matches!(result, Err(NetMemError::Internal(_))));
    }

    #[tokio::test]
    async fn test_quiesce_waits_for_queued_work() {
        let dispatcher = Dispatcher::start(2, 1);
        let flag = Arc::new(AtomicUsize::new(0));

        for shard in 0..2 {
            let flag = flag.clone();
            dispatcher.submit_to_shard(shard, async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.fetch_add(1, Ordering::SeqCst);
            });
        }

        let seen = dispatcher
            .quiesce(async { Ok(flag.load(Ordering::SeqCst)) })
            .await
            .unwrap();
        assert_eq!(seen, 2);

        // Shards are released afterwards.
        let value = dispatcher.call_on_shard(0, async { 1 }).await.unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_quiesce_does_not_deadlock() {
        let dispatcher = Dispatcher::start(256, 1);
        let runs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                let runs = runs.clone();
                tokio::spawn(async move {
                    dispatcher
                        .quiesce(async {
                            runs.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await
                })
            })
            .collect();

        let all = futures_util::future::join_all(handles);
        let results = tokio::time::timeout(Duration::from_secs(30), all)
            .await
            .expect("quiesce calls deadlocked");
        for result in results {
            result.unwrap().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 20);

        let value = dispatcher.call_on_shard(255, async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }
}
