use super::OperationContext;
use crate::dispatch::Dispatcher;
use crate::error::{NetMemError, Result};

#[derive(Clone)]
pub struct FactoryResetOperation {
    ctx: OperationContext,
    dispatcher: Dispatcher,
}

impl FactoryResetOperation {
    pub fn new(ctx: OperationContext, dispatcher: Dispatcher) -> Self {
        Self { ctx, dispatcher }
    }

    /// Wipe every record once all previously queued shard work has drained.
    /// A failure here is `INTERNAL`: the store can no longer be trusted.
    pub async fn run(&self) -> Result<()> {
        let ctx = &self.ctx;
        let result = self
            .dispatcher
            .quiesce(async { ctx.io("factory reset", ctx.store.wipe_all()).await })
            .await;

        match result {
            Ok(()) => {
                tracing::info!("Factory reset discarded every record");
                Ok(())
            }
            Err(error) => {
                tracing::error!("Factory reset failed, store is unreliable: {}", error);
                Err(NetMemError::Internal(format!(
                    "factory reset failed: {}",
                    error
                )))
            }
        }
    }
}
