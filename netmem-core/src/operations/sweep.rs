use super::OperationContext;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::AddAssign;

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub attributes_purged: u64,
    pub blobs_purged: u64,
    pub events_purged: u64,
    /// Keys or clusters whose purge failed; they are retried next sweep.
    pub failures: u64,
}

impl AddAssign for SweepReport {
    fn add_assign(&mut self, other: Self) {
        self.attributes_purged += other.attributes_purged;
        self.blobs_purged += other.blobs_purged;
        self.events_purged += other.events_purged;
        self.failures += other.failures;
    }
}

#[derive(Default)]
struct ShardWork {
    keys: BTreeSet<String>,
    clusters: BTreeSet<String>,
}

#[derive(Clone)]
pub struct SweepOperation {
    ctx: OperationContext,
    dispatcher: Dispatcher,
}

impl SweepOperation {
    pub fn new(ctx: OperationContext, dispatcher: Dispatcher) -> Self {
        Self { ctx, dispatcher }
    }

    /// Physically remove expired and retention-elapsed records.
    ///
    /// Candidates are listed up front, then each purge runs on the shard that
    /// owns the key (or event cluster) and re-checks eligibility there, so a
    /// record refreshed in the meantime survives.
    pub async fn run(&self) -> Result<SweepReport> {
        let now = self.ctx.now();
        let candidates = self
            .ctx
            .io("list sweep candidates", self.ctx.store.sweep_candidates(now))
            .await?;

        let mut by_shard: BTreeMap<usize, ShardWork> = BTreeMap::new();
        for l2_key in candidates
            .attribute_keys
            .into_iter()
            .chain(candidates.blob_keys)
        {
            by_shard
                .entry(self.dispatcher.shard_for(&l2_key))
                .or_default()
                .keys
                .insert(l2_key);
        }
        for cluster in candidates.event_clusters {
            by_shard
                .entry(self.dispatcher.shard_for(&cluster))
                .or_default()
                .clusters
                .insert(cluster);
        }

        let pending: Vec<_> = by_shard
            .into_iter()
            .map(|(shard, work)| {
                let ctx = self.ctx.clone();
                self.dispatcher.call_on_shard(shard, purge_shard(ctx, work))
            })
            .collect();

        let mut report = SweepReport::default();
        for result in join_all(pending).await {
            match result {
                Ok(partial) => report += partial,
                Err(error) => {
                    tracing::warn!("Sweep lost a shard: {}", error);
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }
}

async fn purge_shard(ctx: OperationContext, work: ShardWork) -> SweepReport {
    let mut report = SweepReport::default();

    for l2_key in work.keys {
        match purge_key(&ctx, &l2_key).await {
            Ok(partial) => report += partial,
            Err(error) => {
                tracing::warn!("Failed to sweep {}: {}", l2_key, error);
                report.failures += 1;
            }
        }
    }

    for cluster in work.clusters {
        let now = ctx.now();
        match ctx
            .io(
                "remove expired events",
                ctx.store.remove_expired_events(&cluster, now),
            )
            .await
        {
            Ok(removed) => report.events_purged += removed,
            Err(error) => {
                tracing::warn!("Failed to sweep events of cluster {}: {}", cluster, error);
                report.failures += 1;
            }
        }
    }

    report
}

async fn purge_key(ctx: &OperationContext, l2_key: &str) -> Result<SweepReport> {
    let now = ctx.now();
    let mut report = SweepReport::default();

    let record = ctx
        .io("load attributes", ctx.store.load_attributes(l2_key))
        .await?;

    if let Some(record) = record.filter(|r| r.is_purgeable(now)) {
        if record.tombstone.is_some() {
            // Blobs go with a purged tombstone.
            let wipe = ctx.io("wipe key", ctx.store.wipe_key(l2_key)).await?;
            report.attributes_purged += u64::from(wipe.attributes);
            report.blobs_purged += wipe.blobs;
        } else if ctx
            .io("remove attributes", ctx.store.remove_attributes(l2_key))
            .await?
        {
            report.attributes_purged += 1;
        }
    }

    report.blobs_purged += ctx
        .io(
            "remove expired blobs",
            ctx.store.remove_expired_blobs(l2_key, now),
        )
        .await?;

    Ok(report)
}
