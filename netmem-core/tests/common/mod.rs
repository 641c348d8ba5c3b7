//! Shared helpers for the integration tests.
//!
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use async_trait::async_trait;
use netmem_core::storage::{EventBucket, KeyWipe, SweepCandidates};
use netmem_core::{
    AttributesRecord, BlobKey, BlobRecord, Listener, ManualClock, NetMemError, NetworkEvent,
    NetworkMemoryStore, RecordStore, Result, SqliteRecordStore, StoreConfig, channel_listener,
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const START: i64 = 1_700_000_000_000;

pub struct TestStore {
    pub store: NetworkMemoryStore,
    pub clock: Arc<ManualClock>,
    pub faults: Arc<FaultyStore>,
    pub db_path: PathBuf,
    _dir: TempDir,
}

pub fn test_config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        sweep_interval_ms: 0,
        tombstone_retention_ms: 60_000,
        ..StoreConfig::with_db_path(dir.path().join("netmem.db"))
    }
}

pub fn open_store() -> TestStore {
    open_store_with(|config| config)
}

pub fn open_store_with(tune: impl FnOnce(StoreConfig) -> StoreConfig) -> TestStore {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = tune(test_config(&dir));
    let db_path = config.db_path.clone();
    let sqlite = SqliteRecordStore::new(&config.db_path)
        .expect("Failed to open sqlite store")
        .with_deadline(config.io_timeout());
    let faults = Arc::new(FaultyStore::new(sqlite));
    let clock = Arc::new(ManualClock::new(START));

    let store = NetworkMemoryStore::with_record_store(config, faults.clone(), clock.clone())
        .expect("Failed to build store");

    TestStore {
        store,
        clock,
        faults,
        db_path,
        _dir: dir,
    }
}

/// Issue one request and wait for its listener.
pub async fn call<T: Send + 'static>(issue: impl FnOnce(Listener<T>)) -> T {
    let (listener, rx) = channel_listener();
    issue(listener);
    tokio::time::timeout(Duration::from_secs(10), rx)
        .await
        .expect("listener not invoked in time")
        .expect("listener dropped")
}

/// A key routed to a different shard than `other`.
pub fn key_on_other_shard(store: &NetworkMemoryStore, other: &str) -> String {
    (0..)
        .map(|i| format!("other-{}", i))
        .find(|key| store.shard_of(key) != store.shard_of(other))
        .expect("no key on another shard")
}

/// Record store wrapper that can delay or fail calls for chosen L2 keys.
pub struct FaultyStore {
    inner: SqliteRecordStore,
    slow: Mutex<HashMap<String, Duration>>,
    failing: Mutex<HashSet<String>>,
}

impl FaultyStore {
    pub fn new(inner: SqliteRecordStore) -> Self {
        Self {
            inner,
            slow: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn slow_down(&self, l2_key: &str, delay: Duration) {
        self.slow.lock().unwrap().insert(l2_key.to_string(), delay);
    }

    pub fn fail(&self, l2_key: &str) {
        self.failing.lock().unwrap().insert(l2_key.to_string());
    }

    pub fn heal(&self, l2_key: &str) {
        self.failing.lock().unwrap().remove(l2_key);
        self.slow.lock().unwrap().remove(l2_key);
    }

    async fn intercept(&self, l2_key: &str) -> Result<()> {
        let delay = self.slow.lock().unwrap().get(l2_key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(l2_key) {
            return Err(NetMemError::Io(std::io::Error::other(format!(
                "injected failure for {}",
                l2_key
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn load_attributes(&self, l2_key: &str) -> Result<Option<AttributesRecord>> {
        self.intercept(l2_key).await?;
        self.inner.load_attributes(l2_key).await
    }

    async fn save_attributes(&self, record: &AttributesRecord) -> Result<()> {
        self.intercept(&record.l2_key).await?;
        self.inner.save_attributes(record).await
    }

    async fn cluster_members(&self, cluster: &str) -> Result<Vec<String>> {
        self.inner.cluster_members(cluster).await
    }

    async fn live_attributes(&self, now: i64) -> Result<Vec<AttributesRecord>> {
        self.inner.live_attributes(now).await
    }

    async fn remove_attributes(&self, l2_key: &str) -> Result<bool> {
        self.intercept(l2_key).await?;
        self.inner.remove_attributes(l2_key).await
    }

    async fn wipe_key(&self, l2_key: &str) -> Result<KeyWipe> {
        self.intercept(l2_key).await?;
        self.inner.wipe_key(l2_key).await
    }

    async fn put_blob(&self, record: &BlobRecord) -> Result<()> {
        self.intercept(&record.key.l2_key).await?;
        self.inner.put_blob(record).await
    }

    async fn get_blob(&self, key: &BlobKey) -> Result<Option<BlobRecord>> {
        self.intercept(&key.l2_key).await?;
        self.inner.get_blob(key).await
    }

    async fn remove_expired_blobs(&self, l2_key: &str, now: i64) -> Result<u64> {
        self.intercept(l2_key).await?;
        self.inner.remove_expired_blobs(l2_key, now).await
    }

    async fn append_event(&self, event: &NetworkEvent) -> Result<()> {
        self.inner.append_event(event).await
    }

    async fn count_events(
        &self,
        cluster: &str,
        buckets: &[EventBucket],
        now: i64,
    ) -> Result<Vec<u32>> {
        self.inner.count_events(cluster, buckets, now).await
    }

    async fn remove_expired_events(&self, cluster: &str, now: i64) -> Result<u64> {
        self.inner.remove_expired_events(cluster, now).await
    }

    async fn sweep_candidates(&self, now: i64) -> Result<SweepCandidates> {
        self.inner.sweep_candidates(now).await
    }

    async fn wipe_all(&self) -> Result<()> {
        self.inner.wipe_all().await
    }
}
