pub mod blob;
pub mod delete;
pub mod factory_reset;
pub mod find_l2_key;
pub mod is_same_network;
pub mod network_event;
pub mod retrieve_attributes;
pub mod store_attributes;
pub mod sweep;

pub use blob::{BlobOperation, BlobOperationOutcome, PutBlobOperationRequest};
pub use delete::{
    DeleteClusterOperation, DeleteClusterOperationRequest, DeleteOperation,
    DeleteOperationRequest,
};
pub use factory_reset::FactoryResetOperation;
pub use find_l2_key::FindL2KeyOperation;
pub use is_same_network::{IsSameNetworkOperation, IsSameNetworkOperationRequest};
pub use network_event::{
    CountNetworkEventsOperationRequest, NetworkEventOperation, StoreNetworkEventOperationRequest,
};
pub use retrieve_attributes::{RetrieveAttributesOperation, RetrieveAttributesOperationOutcome};
pub use store_attributes::{StoreAttributesOperation, StoreAttributesOperationRequest};
pub use sweep::{SweepOperation, SweepReport};

use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::storage::RecordStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Everything an operation needs to touch the record store.
#[derive(Clone)]
pub struct OperationContext {
    pub store: Arc<dyn RecordStore>,
    pub clock: Arc<dyn Clock>,
    pub default_lease_ms: i64,
    pub tombstone_retention_ms: i64,
    pub io_timeout: Duration,
}

impl OperationContext {
    pub fn new(config: &StoreConfig, store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            default_lease_ms: config.default_lease_ms,
            tombstone_retention_ms: config.tombstone_retention_ms,
            io_timeout: config.io_timeout(),
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Await one storage call. Past the configured timeout the call is logged
    /// but still awaited, so nothing later on this shard overtakes it. The
    /// record store enforces the deadline itself.
    pub async fn io<T, F>(&self, what: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::pin!(call);
        match tokio::time::timeout(self.io_timeout, &mut call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("{} still running after {:?}", what, self.io_timeout);
                call.await
            }
        }
    }
}
