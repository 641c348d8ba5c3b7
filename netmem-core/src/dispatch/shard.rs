use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use sha2::{Digest, Sha256};
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;

pub(crate) type Job = BoxFuture<'static, ()>;

/// Stable shard index for a routing key.
pub fn shard_for_key(key: &str, shard_count: usize) -> usize {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % shard_count.max(1) as u64) as usize
}

/// Spawn a sequential worker. Jobs run one at a time in submission order.
pub(crate) fn spawn_worker(name: String) -> mpsc::UnboundedSender<Job> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                tracing::error!("Job panicked on worker {}", name);
            }
        }
        tracing::debug!("Worker {} stopped", name);
    });

    tx
}
