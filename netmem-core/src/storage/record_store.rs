use crate::error::Result;
use crate::model::{AttributesRecord, BlobKey, BlobRecord, EventType, NetworkEvent};
use async_trait::async_trait;
use bytes::Bytes;

/// What a hard wipe of one L2 key removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyWipe {
    pub attributes: bool,
    pub blobs: u64,
}

/// Records the sweeper should look at. Eligibility is re-checked per key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepCandidates {
    pub attribute_keys: Vec<String>,
    pub blob_keys: Vec<String>,
    pub event_clusters: Vec<String>,
}

/// One lower-bound/type pair of an event count query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventBucket {
    pub since: i64,
    pub event_type: EventType,
}

/// Durable keyed storage for attributes, blobs and events.
///
/// Implementations are plain storage: visibility rules, merging and ordering
/// live above this trait. Only shard workers call it.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Raw row for the key, tombstoned or expired rows included.
    async fn load_attributes(&self, l2_key: &str) -> Result<Option<AttributesRecord>>;

    async fn save_attributes(&self, record: &AttributesRecord) -> Result<()>;

    /// Every key whose stored cluster matches, tombstoned rows included.
    async fn cluster_members(&self, cluster: &str) -> Result<Vec<String>>;

    /// Rows that are neither tombstoned nor expired at `now`.
    async fn live_attributes(&self, now: i64) -> Result<Vec<AttributesRecord>>;

    async fn remove_attributes(&self, l2_key: &str) -> Result<bool>;

    /// Remove the attributes row and every blob under the key.
    async fn wipe_key(&self, l2_key: &str) -> Result<KeyWipe>;

    async fn put_blob(&self, record: &BlobRecord) -> Result<()>;

    async fn get_blob(&self, key: &BlobKey) -> Result<Option<BlobRecord>>;

    async fn remove_expired_blobs(&self, l2_key: &str, now: i64) -> Result<u64>;

    async fn append_event(&self, event: &NetworkEvent) -> Result<()>;

    /// Non-expired events per bucket, in bucket order.
    async fn count_events(
        &self,
        cluster: &str,
        buckets: &[EventBucket],
        now: i64,
    ) -> Result<Vec<u32>>;

    async fn remove_expired_events(&self, cluster: &str, now: i64) -> Result<u64>;

    async fn sweep_candidates(&self, now: i64) -> Result<SweepCandidates>;

    /// Drop every record of every kind.
    async fn wipe_all(&self) -> Result<()>;
}
