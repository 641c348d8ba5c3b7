use super::OperationContext;
use crate::error::Result;
use crate::model::NetworkAttributes;
use crate::similarity::assess;

#[derive(Clone)]
pub struct FindL2KeyOperation {
    ctx: OperationContext,
}

impl FindL2KeyOperation {
    pub fn new(ctx: OperationContext) -> Self {
        Self { ctx }
    }

    /// Key of the live record most likely to be the network described by
    /// `attributes`. Ties go to the later expiry, then the smaller key.
    pub async fn run(&self, attributes: &NetworkAttributes) -> Result<Option<String>> {
        if attributes.is_empty() {
            return Ok(None);
        }

        let now = self.ctx.now();
        let records = self
            .ctx
            .io("list live attributes", self.ctx.store.live_attributes(now))
            .await?;

        let mut best: Option<(f32, i64, String)> = None;
        for record in records {
            let assessment = assess(attributes, &record.attributes);
            if !assessment.is_same() {
                continue;
            }

            let candidate = (assessment.confidence, record.expiry(), record.l2_key);
            let better = match &best {
                None => true,
                Some((confidence, expiry, key)) => {
                    candidate.0 > *confidence
                        || (candidate.0 == *confidence
                            && (candidate.1 > *expiry
                                || (candidate.1 == *expiry && candidate.2 < *key)))
                }
            };
            if better {
                best = Some(candidate);
            }
        }

        Ok(best.map(|(_, _, l2_key)| l2_key))
    }
}
