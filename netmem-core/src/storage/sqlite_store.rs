use super::record_store::{EventBucket, KeyWipe, RecordStore, SweepCandidates};
use crate::codec::{decode_attributes, encode_attributes};
use crate::error::{NetMemError, Result};
use crate::model::{AttributesRecord, BlobKey, BlobRecord, Field, NetworkEvent, Tombstone};
use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::oneshot;

const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);
const INTERRUPT_RETRY: Duration = Duration::from_millis(10);

/// SQLite-backed record store.
///
/// Each call opens its own connection on the blocking pool, so a slow query
/// only holds up the shard that issued it. A call that overruns its deadline
/// is interrupted and then awaited: it never keeps running behind the caller.
pub struct SqliteRecordStore {
    db_path: PathBuf,
    deadline: Duration,
}

impl SqliteRecordStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            db_path,
            deadline: DEFAULT_DEADLINE,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Bound every call, lock waits included, by `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn get_conn(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(busy_timeout)?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = Self::get_conn(&self.db_path, self.deadline)?;

        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        // One row per L2 key; `attributes` holds a versioned envelope
        conn.execute(
            "CREATE TABLE IF NOT EXISTS network_attributes (
                l2_key TEXT PRIMARY KEY,
                cluster TEXT,
                attributes BLOB NOT NULL,
                expiry INTEGER NOT NULL,
                tombstoned_at INTEGER,
                purge_after INTEGER
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_network_attributes_cluster
             ON network_attributes(cluster)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_network_attributes_expiry
             ON network_attributes(expiry, tombstoned_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blobs (
                l2_key TEXT NOT NULL,
                client_id TEXT NOT NULL,
                name TEXT NOT NULL,
                data BLOB NOT NULL,
                expiry INTEGER NOT NULL,
                PRIMARY KEY (l2_key, client_id, name)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_blobs_expiry ON blobs(expiry)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS network_events (
                pk INTEGER PRIMARY KEY AUTOINCREMENT,
                cluster TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                expiry INTEGER NOT NULL,
                event_type INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_network_events_cluster
             ON network_events(cluster, event_type, timestamp)",
            [],
        )?;

        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();
        let deadline = self.deadline;
        let (handle_tx, handle_rx) = oneshot::channel();
        let mut task = tokio::task::spawn_blocking(move || {
            let mut conn = Self::get_conn(&db_path, deadline)?;
            let _ = handle_tx.send(conn.get_interrupt_handle());
            f(&mut conn)
        });

        let joined = match tokio::time::timeout(deadline, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!("Storage call exceeded {:?}, interrupting", deadline);
                match handle_rx.await {
                    // Interrupting between two statements is a no-op, so keep
                    // at it until the call returns.
                    Ok(handle) => loop {
                        handle.interrupt();
                        if let Ok(joined) = tokio::time::timeout(INTERRUPT_RETRY, &mut task).await
                        {
                            break joined;
                        }
                    },
                    Err(_) => task.await,
                }
            }
        };

        let result =
            joined.map_err(|e| NetMemError::Internal(format!("storage task failed: {}", e)))?;
        result.map_err(|error| overrun_as_timeout(error, deadline))
    }
}

fn overrun_as_timeout(error: NetMemError, deadline: Duration) -> NetMemError {
    match error {
        NetMemError::Database(rusqlite::Error::SqliteFailure(failure, _))
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::OperationInterrupted
            ) =>
        {
            NetMemError::Timeout(format!("{} after {:?}", failure, deadline))
        }
        other => other,
    }
}

type AttributesRow = (String, Vec<u8>, i64, Option<i64>, Option<i64>);

const ATTRIBUTES_COLUMNS: &str = "l2_key, attributes, expiry, tombstoned_at, purge_after";

fn read_attributes_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttributesRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_attributes_row(row: AttributesRow) -> Result<AttributesRecord> {
    let (l2_key, payload, expiry, tombstoned_at, purge_after) = row;
    let mut attributes = decode_attributes(&payload)?;
    attributes.expiry = Field::Present(expiry);

    let tombstone = match (tombstoned_at, purge_after) {
        (Some(deleted_at), Some(purge_after)) => Some(Tombstone {
            deleted_at,
            purge_after,
        }),
        (None, None) => None,
        _ => {
            return Err(NetMemError::Codec(format!(
                "inconsistent tombstone columns for {}",
                l2_key
            )));
        }
    };

    Ok(AttributesRecord {
        l2_key,
        attributes,
        tombstone,
    })
}

fn query_strings(conn: &Connection, sql: &str, now: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([now], |row| row.get::<_, String>(0))?;

    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn load_attributes(&self, l2_key: &str) -> Result<Option<AttributesRecord>> {
        let l2_key = l2_key.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM network_attributes WHERE l2_key = ?1",
                        ATTRIBUTES_COLUMNS
                    ),
                    [&l2_key],
                    read_attributes_row,
                )
                .optional()?;
            row.map(decode_attributes_row).transpose()
        })
        .await
    }

    async fn save_attributes(&self, record: &AttributesRecord) -> Result<()> {
        let payload = encode_attributes(&record.attributes)?;
        let l2_key = record.l2_key.clone();
        let cluster = record.cluster().map(str::to_string);
        let expiry = record.expiry();
        let tombstone = record.tombstone;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO network_attributes (
                    l2_key, cluster, attributes, expiry, tombstoned_at, purge_after
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    l2_key,
                    cluster,
                    payload,
                    expiry,
                    tombstone.map(|t| t.deleted_at),
                    tombstone.map(|t| t.purge_after),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn cluster_members(&self, cluster: &str) -> Result<Vec<String>> {
        let cluster = cluster.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT l2_key FROM network_attributes WHERE cluster = ?1 ORDER BY l2_key",
            )?;
            let rows = stmt.query_map([&cluster], |row| row.get::<_, String>(0))?;

            let mut keys = Vec::new();
            for row in rows {
                keys.push(row?);
            }
            Ok(keys)
        })
        .await
    }

    async fn live_attributes(&self, now: i64) -> Result<Vec<AttributesRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM network_attributes
                 WHERE tombstoned_at IS NULL AND expiry > ?1
                 ORDER BY l2_key",
                ATTRIBUTES_COLUMNS
            ))?;
            let rows = stmt.query_map([now], read_attributes_row)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(decode_attributes_row(row?)?);
            }
            Ok(records)
        })
        .await
    }

    async fn remove_attributes(&self, l2_key: &str) -> Result<bool> {
        let l2_key = l2_key.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM network_attributes WHERE l2_key = ?1",
                [&l2_key],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn wipe_key(&self, l2_key: &str) -> Result<KeyWipe> {
        let l2_key = l2_key.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let attributes = tx.execute(
                "DELETE FROM network_attributes WHERE l2_key = ?1",
                [&l2_key],
            )?;
            let blobs = tx.execute("DELETE FROM blobs WHERE l2_key = ?1", [&l2_key])?;
            tx.commit()?;

            Ok(KeyWipe {
                attributes: attributes > 0,
                blobs: blobs as u64,
            })
        })
        .await
    }

    async fn put_blob(&self, record: &BlobRecord) -> Result<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO blobs (l2_key, client_id, name, data, expiry)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.key.l2_key,
                    record.key.client_id,
                    record.key.name,
                    &record.data[..],
                    record.expiry,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_blob(&self, key: &BlobKey) -> Result<Option<BlobRecord>> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let row: Option<(Vec<u8>, i64)> = conn
                .query_row(
                    "SELECT data, expiry FROM blobs
                     WHERE l2_key = ?1 AND client_id = ?2 AND name = ?3",
                    [&key.l2_key, &key.client_id, &key.name],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            Ok(row.map(|(data, expiry)| BlobRecord {
                key,
                data: Bytes::from(data),
                expiry,
            }))
        })
        .await
    }

    async fn remove_expired_blobs(&self, l2_key: &str, now: i64) -> Result<u64> {
        let l2_key = l2_key.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM blobs WHERE l2_key = ?1 AND expiry <= ?2",
                params![l2_key, now],
            )?;
            Ok(removed as u64)
        })
        .await
    }

    async fn append_event(&self, event: &NetworkEvent) -> Result<()> {
        let event = event.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO network_events (cluster, timestamp, expiry, event_type)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    event.cluster,
                    event.timestamp,
                    event.expiry,
                    event.event_type.code(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn count_events(
        &self,
        cluster: &str,
        buckets: &[EventBucket],
        now: i64,
    ) -> Result<Vec<u32>> {
        let cluster = cluster.to_string();
        let buckets = buckets.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT COUNT(*) FROM network_events
                 WHERE cluster = ?1 AND event_type = ?2 AND timestamp >= ?3 AND expiry > ?4",
            )?;

            let mut counts = Vec::with_capacity(buckets.len());
            for bucket in &buckets {
                let count: i64 = stmt.query_row(
                    params![cluster, bucket.event_type.code(), bucket.since, now],
                    |row| row.get(0),
                )?;
                counts.push(count as u32);
            }
            Ok(counts)
        })
        .await
    }

    async fn remove_expired_events(&self, cluster: &str, now: i64) -> Result<u64> {
        let cluster = cluster.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM network_events WHERE cluster = ?1 AND expiry <= ?2",
                params![cluster, now],
            )?;
            Ok(removed as u64)
        })
        .await
    }

    async fn sweep_candidates(&self, now: i64) -> Result<SweepCandidates> {
        self.with_conn(move |conn| {
            let attribute_keys = query_strings(
                conn,
                "SELECT l2_key FROM network_attributes
                 WHERE (tombstoned_at IS NULL AND expiry <= ?1)
                    OR (tombstoned_at IS NOT NULL AND purge_after <= ?1)
                 ORDER BY l2_key",
                now,
            )?;
            let blob_keys = query_strings(
                conn,
                "SELECT DISTINCT l2_key FROM blobs WHERE expiry <= ?1 ORDER BY l2_key",
                now,
            )?;
            let event_clusters = query_strings(
                conn,
                "SELECT DISTINCT cluster FROM network_events WHERE expiry <= ?1 ORDER BY cluster",
                now,
            )?;

            Ok(SweepCandidates {
                attribute_keys,
                blob_keys,
                event_clusters,
            })
        })
        .await
    }

    async fn wipe_all(&self) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM network_attributes", [])?;
            tx.execute("DELETE FROM blobs", [])?;
            tx.execute("DELETE FROM network_events", [])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventType, NetworkAttributes};

    fn open_store(dir: &tempfile::TempDir) -> SqliteRecordStore {
        SqliteRecordStore::new(dir.path().join("netmem.db")).unwrap()
    }

    fn record(l2_key: &str, cluster: &str, expiry: i64) -> AttributesRecord {
        AttributesRecord {
            l2_key: l2_key.to_string(),
            attributes: NetworkAttributes::default()
                .with_mtu(1500)
                .with_cluster(cluster)
                .with_expiry(expiry),
            tombstone: None,
        }
    }

    #[tokio::test]
    async fn test_attributes_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        assert!(store.load_attributes("k1").await.unwrap().is_none());

        let original = record("k1", "home", 1_000);
        store.save_attributes(&original).await.unwrap();
        assert_eq!(store.load_attributes("k1").await.unwrap(), Some(original.clone()));

        let tombstoned = AttributesRecord {
            tombstone: Some(Tombstone {
                deleted_at: 10,
                purge_after: 20,
            }),
            ..original
        };
        store.save_attributes(&tombstoned).await.unwrap();
        assert_eq!(store.load_attributes("k1").await.unwrap(), Some(tombstoned));
        assert!(store.live_attributes(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cluster_members_and_live_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.save_attributes(&record("b", "home", 1_000)).await.unwrap();
        store.save_attributes(&record("a", "home", 50)).await.unwrap();
        store.save_attributes(&record("c", "work", 1_000)).await.unwrap();

        assert_eq!(store.cluster_members("home").await.unwrap(), vec!["a", "b"]);

        let live: Vec<String> = store
            .live_attributes(100)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.l2_key)
            .collect();
        assert_eq!(live, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_hint_only_record_listed_under_current_hint() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let mut hinted = AttributesRecord {
            l2_key: "k".to_string(),
            attributes: NetworkAttributes::default()
                .with_group_hint("old-ssid")
                .with_expiry(1_000),
            tombstone: None,
        };
        store.save_attributes(&hinted).await.unwrap();
        assert_eq!(store.cluster_members("old-ssid").await.unwrap(), vec!["k"]);

        hinted.attributes = hinted.attributes.clone().with_group_hint("new-ssid");
        store.save_attributes(&hinted).await.unwrap();
        assert!(store.cluster_members("old-ssid").await.unwrap().is_empty());
        assert_eq!(store.cluster_members("new-ssid").await.unwrap(), vec!["k"]);
    }

    #[tokio::test]
    async fn test_locked_database_times_out_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).with_deadline(Duration::from_millis(100));
        store.save_attributes(&record("k", "home", 1_000)).await.unwrap();

        let lock = Connection::open(store.db_path()).unwrap();
        lock.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let error = store
            .save_attributes(&record("k", "work", 2_000))
            .await
            .unwrap_err();
        assert!(matches!(error, NetMemError::Timeout(_)));

        lock.execute_batch("ROLLBACK").unwrap();
        let stored = store.load_attributes("k").await.unwrap().unwrap();
        assert_eq!(stored.cluster(), Some("home"));
        assert_eq!(stored.expiry(), 1_000);
    }

    #[tokio::test]
    async fn test_wipe_key_removes_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.save_attributes(&record("k", "home", 1_000)).await.unwrap();
        for name in ["one", "two"] {
            store
                .put_blob(&BlobRecord {
                    key: BlobKey::new("k", "client", name),
                    data: Bytes::from_static(b"payload"),
                    expiry: 1_000,
                })
                .await
                .unwrap();
        }

        let wipe = store.wipe_key("k").await.unwrap();
        assert_eq!(wipe, KeyWipe { attributes: true, blobs: 2 });
        assert!(store.load_attributes("k").await.unwrap().is_none());
        assert!(store
            .get_blob(&BlobKey::new("k", "client", "one"))
            .await
            .unwrap()
            .is_none());

        assert_eq!(store.wipe_key("k").await.unwrap(), KeyWipe::default());
    }

    #[tokio::test]
    async fn test_blob_replace() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let key = BlobKey::new("k", "client", "name");

        for data in [&b"first"[..], &b"second"[..]] {
            store
                .put_blob(&BlobRecord {
                    key: key.clone(),
                    data: Bytes::copy_from_slice(data),
                    expiry: 500,
                })
                .await
                .unwrap();
        }

        let blob = store.get_blob(&key).await.unwrap().unwrap();
        assert_eq!(blob.data, Bytes::from_static(b"second"));
        assert_eq!(store.remove_expired_blobs("k", 499).await.unwrap(), 0);
        assert_eq!(store.remove_expired_blobs("k", 500).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_event_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        for (timestamp, event_type, expiry) in [
            (10, EventType::NudFailureRoam, 1_000),
            (20, EventType::NudFailureRoam, 1_000),
            (30, EventType::NudFailureRoam, 1_000),
            (30, EventType::NudFailureOrganic, 1_000),
            (40, EventType::NudFailureRoam, 5),
        ] {
            store
                .append_event(&NetworkEvent {
                    cluster: "c".to_string(),
                    timestamp,
                    expiry,
                    event_type,
                })
                .await
                .unwrap();
        }

        let counts = store
            .count_events(
                "c",
                &[
                    EventBucket { since: 15, event_type: EventType::NudFailureRoam },
                    EventBucket { since: 0, event_type: EventType::NudFailureOrganic },
                    EventBucket { since: 0, event_type: EventType::NudFailureConfirm },
                ],
                100,
            )
            .await
            .unwrap();
        assert_eq!(counts, vec![2, 1, 0]);

        assert_eq!(store.remove_expired_events("c", 100).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweep_candidates_and_wipe_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.save_attributes(&record("expired", "x", 10)).await.unwrap();
        store.save_attributes(&record("fresh", "x", 1_000)).await.unwrap();
        let mut deleted = record("deleted", "x", 1_000);
        deleted.tombstone = Some(Tombstone {
            deleted_at: 5,
            purge_after: 50,
        });
        store.save_attributes(&deleted).await.unwrap();

        let candidates = store.sweep_candidates(100).await.unwrap();
        assert_eq!(candidates.attribute_keys, vec!["deleted", "expired"]);
        assert!(candidates.blob_keys.is_empty());
        assert!(candidates.event_clusters.is_empty());

        store.wipe_all().await.unwrap();
        assert!(store.load_attributes("fresh").await.unwrap().is_none());
    }
}
