//! Storage modules for Netmem
//!
//! Provides the record store seam and its SQLite implementation.

pub mod record_store;
pub mod sqlite_store;

pub use record_store::{EventBucket, KeyWipe, RecordStore, SweepCandidates};
pub use sqlite_store::SqliteRecordStore;
