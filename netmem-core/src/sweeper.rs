//! Background task that runs a sweep on a fixed interval.

use crate::operations::SweepOperation;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub fn spawn_sweeper(operation: SweepOperation, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match operation.run().await {
                Ok(report) => {
                    tracing::info!(
                        "Sweep finished: attributes={} blobs={} events={} failures={}",
                        report.attributes_purged,
                        report.blobs_purged,
                        report.events_purged,
                        report.failures
                    );
                }
                Err(error) => {
                    tracing::warn!("Sweep failed: {}", error);
                }
            }
        }
    })
}
