//! The public facade.
//!
//! Every call returns as soon as the request is queued. The result reaches the
//! caller only through the listener passed with the call, exactly once. Calls
//! for one L2 key (or one event cluster) run in submission order.

use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::dispatch::{Dispatcher, Listener, Outcome};
use crate::error::{NetMemError, Result};
use crate::model::{
    BlobKey, DeleteOutcome, EventType, NetworkAttributes, SameL3NetworkResponse,
};
use crate::operations::{
    BlobOperation, BlobOperationOutcome, CountNetworkEventsOperationRequest,
    DeleteClusterOperation, DeleteClusterOperationRequest, DeleteOperation,
    DeleteOperationRequest, FactoryResetOperation, FindL2KeyOperation, IsSameNetworkOperation,
    IsSameNetworkOperationRequest, NetworkEventOperation, OperationContext,
    PutBlobOperationRequest, RetrieveAttributesOperation, RetrieveAttributesOperationOutcome,
    StoreAttributesOperation, StoreAttributesOperationRequest, StoreNetworkEventOperationRequest,
    SweepOperation, SweepReport,
};
use crate::storage::{RecordStore, SqliteRecordStore};
use crate::sweeper::spawn_sweeper;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct NetworkMemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: OperationContext,
    dispatcher: Dispatcher,
    sweeper: Option<JoinHandle<()>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl NetworkMemoryStore {
    /// Open the SQLite store at `config.db_path`. Must run inside a tokio runtime.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let store = SqliteRecordStore::new(&config.db_path)?.with_deadline(config.io_timeout());
        tracing::info!("Opened network memory store at {:?}", store.db_path());
        Self::with_record_store(config, Arc::new(store), Arc::new(SystemClock))
    }

    pub fn with_record_store(
        config: StoreConfig,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let ctx = OperationContext::new(&config, store, clock);
        let dispatcher = Dispatcher::start(config.shards, config.cluster_lanes);
        let sweeper = config.sweep_interval().map(|interval| {
            tracing::debug!("Background sweep every {:?}", interval);
            spawn_sweeper(
                SweepOperation::new(ctx.clone(), dispatcher.clone()),
                interval,
            )
        });

        Ok(Self {
            inner: Arc::new(Inner {
                ctx,
                dispatcher,
                sweeper,
            }),
        })
    }

    /// Shard that serializes requests for `key`.
    pub fn shard_of(&self, key: &str) -> usize {
        self.inner.dispatcher.shard_for(key)
    }

    pub fn store_network_attributes(
        &self,
        l2_key: impl Into<String>,
        attributes: NetworkAttributes,
        listener: Option<Listener<Result<()>>>,
    ) {
        let l2_key = l2_key.into();
        let operation = StoreAttributesOperation::new(self.ctx());
        let request = StoreAttributesOperationRequest {
            l2_key: l2_key.clone(),
            attributes,
        };
        self.run_keyed(&l2_key, "store_network_attributes", listener, async move {
            operation.run(request).await
        });
    }

    pub fn store_blob(
        &self,
        l2_key: impl Into<String>,
        client_id: impl Into<String>,
        name: impl Into<String>,
        data: Bytes,
        listener: Option<Listener<Result<()>>>,
    ) {
        let key = BlobKey::new(l2_key, client_id, name);
        let shard_key = key.l2_key.clone();
        let operation = BlobOperation::new(self.ctx());
        self.run_keyed(&shard_key, "store_blob", listener, async move {
            operation
                .run_put(PutBlobOperationRequest { key, data })
                .await
        });
    }

    /// Best matching live L2 key for a partial attribute set, if any.
    pub fn find_l2_key(
        &self,
        attributes: NetworkAttributes,
        listener: Option<Listener<Result<Option<String>>>>,
    ) {
        let operation = FindL2KeyOperation::new(self.ctx());
        self.run_unkeyed("find_l2_key", listener, async move {
            operation.run(&attributes).await
        });
    }

    pub fn is_same_network(
        &self,
        l2_key1: impl Into<String>,
        l2_key2: impl Into<String>,
        listener: Option<Listener<Result<SameL3NetworkResponse>>>,
    ) {
        let operation = IsSameNetworkOperation::new(self.ctx());
        let request = IsSameNetworkOperationRequest {
            l2_key1: l2_key1.into(),
            l2_key2: l2_key2.into(),
        };
        self.run_unkeyed("is_same_network", listener, async move {
            operation.run(request).await
        });
    }

    /// Delivers `NOT_FOUND` when the key is unknown, expired or soft-deleted.
    pub fn retrieve_network_attributes(
        &self,
        l2_key: impl Into<String>,
        listener: Option<Listener<Result<NetworkAttributes>>>,
    ) {
        let l2_key = l2_key.into();
        let operation = RetrieveAttributesOperation::new(self.ctx());
        let shard_key = l2_key.clone();
        self.run_keyed(&shard_key, "retrieve_network_attributes", listener, async move {
            match operation.run(&l2_key).await? {
                RetrieveAttributesOperationOutcome::Found(attributes) => Ok(attributes),
                RetrieveAttributesOperationOutcome::NotFound => {
                    Err(NetMemError::NotFound(format!("attributes for {}", l2_key)))
                }
            }
        });
    }

    pub fn retrieve_blob(
        &self,
        l2_key: impl Into<String>,
        client_id: impl Into<String>,
        name: impl Into<String>,
        listener: Option<Listener<Result<Bytes>>>,
    ) {
        let key = BlobKey::new(l2_key, client_id, name);
        let shard_key = key.l2_key.clone();
        let operation = BlobOperation::new(self.ctx());
        self.run_keyed(&shard_key, "retrieve_blob", listener, async move {
            match operation.run_get(&key).await? {
                BlobOperationOutcome::Found(data) => Ok(data),
                BlobOperationOutcome::NotFound => Err(NetMemError::NotFound(format!(
                    "blob {}/{}/{}",
                    key.l2_key, key.client_id, key.name
                ))),
            }
        });
    }

    /// Discard every record once all earlier requests have finished.
    pub fn factory_reset(&self, listener: Option<Listener<Result<()>>>) {
        let completion = self.inner.dispatcher.completion("factory_reset", listener);
        let operation = FactoryResetOperation::new(self.ctx(), self.inner.dispatcher.clone());
        tokio::spawn(async move {
            completion.complete(operation.run().await);
        });
    }

    pub fn delete(
        &self,
        l2_key: impl Into<String>,
        need_wipe: bool,
        listener: Option<Listener<DeleteOutcome>>,
    ) {
        let l2_key = l2_key.into();
        let operation = DeleteOperation::new(self.ctx());
        let request = DeleteOperationRequest {
            l2_key: l2_key.clone(),
            need_wipe,
        };
        self.run_keyed(&l2_key, "delete", listener, async move {
            match operation.run(request).await {
                Ok(affected) => DeleteOutcome::succeeded(affected),
                Err(error) => DeleteOutcome::failed(error),
            }
        });
    }

    pub fn delete_cluster(
        &self,
        cluster: impl Into<String>,
        need_wipe: bool,
        listener: Option<Listener<DeleteOutcome>>,
    ) {
        let cluster = cluster.into();
        let completion = self.inner.dispatcher.completion("delete_cluster", listener);
        let operation = DeleteClusterOperation::new(self.ctx(), self.inner.dispatcher.clone());
        let request = DeleteClusterOperationRequest {
            cluster: cluster.clone(),
            need_wipe,
        };
        self.inner.dispatcher.submit_cluster(&cluster, async move {
            completion.complete(operation.run(request).await);
        });
    }

    pub fn store_network_event(
        &self,
        cluster: impl Into<String>,
        timestamp: i64,
        expiry: i64,
        event_type: EventType,
        listener: Option<Listener<Result<()>>>,
    ) {
        let cluster = cluster.into();
        let operation = NetworkEventOperation::new(self.ctx());
        let request = StoreNetworkEventOperationRequest {
            cluster: cluster.clone(),
            timestamp,
            expiry,
            event_type,
        };
        self.run_keyed(&cluster, "store_network_event", listener, async move {
            operation.run_store(request).await
        });
    }

    /// One count per `(since_times[i], event_types[i])` pair, in input order.
    pub fn retrieve_network_event_count(
        &self,
        cluster: impl Into<String>,
        since_times: Vec<i64>,
        event_types: Vec<EventType>,
        listener: Option<Listener<Result<Vec<u32>>>>,
    ) {
        let cluster = cluster.into();
        let operation = NetworkEventOperation::new(self.ctx());
        let request = CountNetworkEventsOperationRequest {
            cluster: cluster.clone(),
            since_times,
            event_types,
        };
        self.run_keyed(&cluster, "retrieve_network_event_count", listener, async move {
            operation.run_count(request).await
        });
    }

    /// Run one sweep now instead of waiting for the background schedule.
    pub fn sweep(&self, listener: Option<Listener<Result<SweepReport>>>) {
        let completion = self.inner.dispatcher.completion("sweep", listener);
        let operation = SweepOperation::new(self.ctx(), self.inner.dispatcher.clone());
        tokio::spawn(async move {
            completion.complete(operation.run().await);
        });
    }

    fn ctx(&self) -> OperationContext {
        self.inner.ctx.clone()
    }

    fn run_keyed<T, F>(
        &self,
        key: &str,
        operation: &'static str,
        listener: Option<Listener<T>>,
        work: F,
    ) where
        T: Outcome,
        F: Future<Output = T> + Send + 'static,
    {
        let completion = self.inner.dispatcher.completion(operation, listener);
        self.inner.dispatcher.submit_keyed(key, async move {
            completion.complete(work.await);
        });
    }

    fn run_unkeyed<T, F>(&self, operation: &'static str, listener: Option<Listener<T>>, work: F)
    where
        T: Outcome,
        F: Future<Output = T> + Send + 'static,
    {
        let completion = self.inner.dispatcher.completion(operation, listener);
        self.inner.dispatcher.submit_unkeyed(async move {
            completion.complete(work.await);
        });
    }
}
