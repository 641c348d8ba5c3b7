use super::OperationContext;
use crate::error::Result;
use crate::model::{BlobKey, BlobRecord};
use bytes::Bytes;

#[derive(Clone)]
pub struct BlobOperation {
    ctx: OperationContext,
}

#[derive(Debug, Clone)]
pub struct PutBlobOperationRequest {
    pub key: BlobKey,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub enum BlobOperationOutcome {
    Found(Bytes),
    NotFound,
}

impl BlobOperation {
    pub fn new(ctx: OperationContext) -> Self {
        Self { ctx }
    }

    /// Replace the blob under the key. No merge.
    pub async fn run_put(&self, request: PutBlobOperationRequest) -> Result<()> {
        let PutBlobOperationRequest { key, data } = request;
        key.validate()?;

        let record = BlobRecord {
            key,
            data,
            expiry: self.ctx.now().saturating_add(self.ctx.default_lease_ms),
        };

        self.ctx
            .io("put blob", self.ctx.store.put_blob(&record))
            .await
    }

    pub async fn run_get(&self, key: &BlobKey) -> Result<BlobOperationOutcome> {
        key.validate()?;

        let now = self.ctx.now();
        let record = self.ctx.io("get blob", self.ctx.store.get_blob(key)).await?;

        match record {
            Some(record) if record.expiry > now => Ok(BlobOperationOutcome::Found(record.data)),
            _ => Ok(BlobOperationOutcome::NotFound),
        }
    }
}
