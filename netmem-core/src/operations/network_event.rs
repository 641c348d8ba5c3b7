use super::OperationContext;
use crate::error::{NetMemError, Result};
use crate::model::{EventType, NetworkEvent, validate_cluster};
use crate::storage::EventBucket;

#[derive(Clone)]
pub struct NetworkEventOperation {
    ctx: OperationContext,
}

#[derive(Debug, Clone)]
pub struct StoreNetworkEventOperationRequest {
    pub cluster: String,
    pub timestamp: i64,
    pub expiry: i64,
    pub event_type: EventType,
}

#[derive(Debug, Clone)]
pub struct CountNetworkEventsOperationRequest {
    pub cluster: String,
    pub since_times: Vec<i64>,
    pub event_types: Vec<EventType>,
}

impl NetworkEventOperation {
    pub fn new(ctx: OperationContext) -> Self {
        Self { ctx }
    }

    /// Append one event. Identical events are kept as separate entries.
    pub async fn run_store(&self, request: StoreNetworkEventOperationRequest) -> Result<()> {
        let StoreNetworkEventOperationRequest {
            cluster,
            timestamp,
            expiry,
            event_type,
        } = request;
        validate_cluster(&cluster)?;

        let event = NetworkEvent {
            cluster,
            timestamp,
            expiry,
            event_type,
        };

        self.ctx
            .io("append event", self.ctx.store.append_event(&event))
            .await
    }

    /// Count per (since, type) bucket. Types match strictly; there is no
    /// wildcard type.
    pub async fn run_count(
        &self,
        request: CountNetworkEventsOperationRequest,
    ) -> Result<Vec<u32>> {
        let CountNetworkEventsOperationRequest {
            cluster,
            since_times,
            event_types,
        } = request;
        validate_cluster(&cluster)?;

        if since_times.len() != event_types.len() {
            return Err(NetMemError::InvalidArgument(format!(
                "since_times has {} entries but event_types has {}",
                since_times.len(),
                event_types.len()
            )));
        }
        if since_times.is_empty() {
            return Ok(Vec::new());
        }

        let buckets: Vec<EventBucket> = since_times
            .into_iter()
            .zip(event_types)
            .map(|(since, event_type)| EventBucket { since, event_type })
            .collect();

        let now = self.ctx.now();
        self.ctx
            .io(
                "count events",
                self.ctx.store.count_events(&cluster, &buckets, now),
            )
            .await
    }
}
