use super::OperationContext;
use crate::error::Result;
use crate::merge::merge_attributes;
use crate::model::{AttributesRecord, NetworkAttributes, validate_l2_key};

#[derive(Clone)]
pub struct StoreAttributesOperation {
    ctx: OperationContext,
}

#[derive(Debug, Clone)]
pub struct StoreAttributesOperationRequest {
    pub l2_key: String,
    pub attributes: NetworkAttributes,
}

impl StoreAttributesOperation {
    pub fn new(ctx: OperationContext) -> Self {
        Self { ctx }
    }

    /// Merge the write into whatever is still recallable under the key.
    /// Must run on the key's shard.
    pub async fn run(&self, request: StoreAttributesOperationRequest) -> Result<()> {
        let StoreAttributesOperationRequest { l2_key, attributes } = request;
        validate_l2_key(&l2_key)?;

        let now = self.ctx.now();
        let existing = self
            .ctx
            .io("load attributes", self.ctx.store.load_attributes(&l2_key))
            .await?
            .filter(|record| record.is_recallable(now));

        if let Some(record) = &existing {
            if record.tombstone.is_some() {
                tracing::debug!("Reviving soft-deleted record for {}", l2_key);
            }
        }

        let merged = merge_attributes(
            existing.as_ref().map(|record| &record.attributes),
            attributes,
            now,
            self.ctx.default_lease_ms,
        );

        let record = AttributesRecord {
            l2_key,
            attributes: merged,
            tombstone: None,
        };

        self.ctx
            .io("save attributes", self.ctx.store.save_attributes(&record))
            .await
    }
}
