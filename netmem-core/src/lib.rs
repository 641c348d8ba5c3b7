//! Netmem Core - asynchronous per-network memory store
//!
//! Remembers what was learned about each layer-2 network so it can be reused
//! the next time the network is seen:
//! - attribute records keyed by L2 key, merged field by field on every write
//! - opaque per-client blobs under the same key
//! - an append-only event log per cluster with windowed counts
//! - soft delete with a recovery window, plus a background sweeper
//! - hash-sharded workers: per-key ordering, exactly-once listener delivery
//! - SQLite for local persistence

pub mod clock;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod merge;
pub mod model;
pub mod operations;
pub mod similarity;
pub mod storage;
pub mod store;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{ATTRIBUTES_SCHEMA_VERSION, decode_attributes, encode_attributes};
pub use config::StoreConfig;
pub use dispatch::{Listener, channel_listener, shard_for_key};
pub use error::{NetMemError, Result};
pub use merge::merge_attributes;
pub use model::{
    AttributesRecord, BlobKey, BlobRecord, DeleteOutcome, EventType, Field, Ipv6Prefix,
    NetworkAttributes, NetworkEvent, NetworkSameness, SameL3NetworkResponse, Status, Tombstone,
};
pub use operations::SweepReport;
pub use similarity::{Assessment, assess};
pub use storage::{RecordStore, SqliteRecordStore};
pub use store::NetworkMemoryStore;
