use super::OperationContext;
use crate::error::Result;
use crate::model::{NetworkAttributes, validate_l2_key};

#[derive(Clone)]
pub struct RetrieveAttributesOperation {
    ctx: OperationContext,
}

#[derive(Debug, Clone)]
pub enum RetrieveAttributesOperationOutcome {
    Found(NetworkAttributes),
    NotFound,
}

impl RetrieveAttributesOperation {
    pub fn new(ctx: OperationContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, l2_key: &str) -> Result<RetrieveAttributesOperationOutcome> {
        validate_l2_key(l2_key)?;

        let now = self.ctx.now();
        let record = self
            .ctx
            .io("load attributes", self.ctx.store.load_attributes(l2_key))
            .await?;

        match record {
            Some(record) if record.is_live(now) => {
                Ok(RetrieveAttributesOperationOutcome::Found(record.attributes))
            }
            _ => Ok(RetrieveAttributesOperationOutcome::NotFound),
        }
    }
}
