use super::OperationContext;
use crate::dispatch::{Dispatcher, Outcome};
use crate::error::Result;
use crate::model::{DeleteOutcome, Status, Tombstone, validate_cluster, validate_l2_key};
use futures_util::future::join_all;
use std::collections::BTreeMap;

#[derive(Clone)]
pub struct DeleteOperation {
    ctx: OperationContext,
}

#[derive(Debug, Clone)]
pub struct DeleteOperationRequest {
    pub l2_key: String,
    pub need_wipe: bool,
}

impl DeleteOperation {
    pub fn new(ctx: OperationContext) -> Self {
        Self { ctx }
    }

    /// Delete one key. Returns 1 when a visible record went away, else 0.
    /// Must run on the key's shard.
    pub async fn run(&self, request: DeleteOperationRequest) -> Result<u32> {
        let DeleteOperationRequest { l2_key, need_wipe } = request;
        validate_l2_key(&l2_key)?;
        self.delete_key(&l2_key, None, need_wipe).await
    }

    /// Delete a key found by a cluster lookup. Skipped if the record no longer
    /// belongs to `cluster` by the time the shard gets to it.
    pub async fn run_cluster_member(
        &self,
        l2_key: &str,
        cluster: &str,
        need_wipe: bool,
    ) -> Result<u32> {
        self.delete_key(l2_key, Some(cluster), need_wipe).await
    }

    async fn delete_key(&self, l2_key: &str, cluster: Option<&str>, need_wipe: bool) -> Result<u32> {
        let now = self.ctx.now();
        let record = self
            .ctx
            .io("load attributes", self.ctx.store.load_attributes(l2_key))
            .await?;

        if let Some(cluster) = cluster {
            if record.as_ref().and_then(|r| r.cluster()) != Some(cluster) {
                return Ok(0);
            }
        }

        let was_live = record.as_ref().is_some_and(|r| r.is_live(now));

        if need_wipe {
            let wipe = self
                .ctx
                .io("wipe key", self.ctx.store.wipe_key(l2_key))
                .await?;
            tracing::debug!(
                "Wiped {} attributes={} blobs={}",
                l2_key,
                wipe.attributes,
                wipe.blobs
            );
            return Ok(u32::from(was_live));
        }

        let Some(mut record) = record.filter(|_| was_live) else {
            return Ok(0);
        };

        record.tombstone = Some(Tombstone {
            deleted_at: now,
            purge_after: now.saturating_add(self.ctx.tombstone_retention_ms),
        });
        self.ctx
            .io("save tombstone", self.ctx.store.save_attributes(&record))
            .await?;

        tracing::debug!("Soft-deleted {}", l2_key);
        Ok(1)
    }
}

#[derive(Clone)]
pub struct DeleteClusterOperation {
    ctx: OperationContext,
    dispatcher: Dispatcher,
}

#[derive(Debug, Clone)]
pub struct DeleteClusterOperationRequest {
    pub cluster: String,
    pub need_wipe: bool,
}

#[derive(Debug, Default)]
struct ShardTally {
    affected: u32,
    failed: bool,
}

impl DeleteClusterOperation {
    pub fn new(ctx: OperationContext, dispatcher: Dispatcher) -> Self {
        Self { ctx, dispatcher }
    }

    /// Fan the delete out to every shard owning a member key and fold the
    /// results into one outcome. Any failed key makes the status
    /// `IO_FAILURE` and drops its shard from `affected`.
    /// Must run on a cluster lane, never on a shard.
    pub async fn run(&self, request: DeleteClusterOperationRequest) -> DeleteOutcome {
        let DeleteClusterOperationRequest { cluster, need_wipe } = request;
        if let Err(error) = validate_cluster(&cluster) {
            return DeleteOutcome::failed(error);
        }

        let members = match self
            .ctx
            .io("list cluster members", self.ctx.store.cluster_members(&cluster))
            .await
        {
            Ok(members) => members,
            Err(error) => {
                tracing::warn!("Failed to list members of cluster {}: {}", cluster, error);
                return DeleteOutcome::failed(error);
            }
        };

        let mut by_shard: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for l2_key in members {
            by_shard
                .entry(self.dispatcher.shard_for(&l2_key))
                .or_default()
                .push(l2_key);
        }

        let pending: Vec<_> = by_shard
            .into_iter()
            .map(|(shard, keys)| {
                let operation = DeleteOperation::new(self.ctx.clone());
                let cluster = cluster.clone();
                self.dispatcher.call_on_shard(shard, async move {
                    let mut tally = ShardTally::default();
                    for l2_key in keys {
                        match operation
                            .run_cluster_member(&l2_key, &cluster, need_wipe)
                            .await
                        {
                            Ok(affected) => tally.affected += affected,
                            Err(error) => {
                                tracing::warn!(
                                    "Failed to delete {} from cluster {}: {}",
                                    l2_key,
                                    cluster,
                                    error
                                );
                                tally.failed = true;
                            }
                        }
                    }
                    tally
                })
            })
            .collect();

        let mut affected = 0;
        let mut failed = false;
        for result in join_all(pending).await {
            match result {
                Ok(tally) if tally.failed => failed = true,
                Ok(tally) => affected += tally.affected,
                Err(error) => {
                    tracing::warn!("Cluster {} fan-out lost a shard: {}", cluster, error);
                    failed = true;
                }
            }
        }

        tracing::debug!(
            "Deleted cluster {} need_wipe={} affected={} failed={}",
            cluster,
            need_wipe,
            affected,
            failed
        );

        DeleteOutcome {
            status: if failed {
                Status::IoFailure
            } else {
                Status::Success
            },
            affected,
        }
    }
}
