use super::OperationContext;
use crate::error::Result;
use crate::model::{NetworkSameness, SameL3NetworkResponse, validate_l2_key};
use crate::similarity::{Assessment, assess};

#[derive(Clone)]
pub struct IsSameNetworkOperation {
    ctx: OperationContext,
}

#[derive(Debug, Clone)]
pub struct IsSameNetworkOperationRequest {
    pub l2_key1: String,
    pub l2_key2: String,
}

impl IsSameNetworkOperation {
    pub fn new(ctx: OperationContext) -> Self {
        Self { ctx }
    }

    pub async fn run(
        &self,
        request: IsSameNetworkOperationRequest,
    ) -> Result<SameL3NetworkResponse> {
        let IsSameNetworkOperationRequest { l2_key1, l2_key2 } = request;
        validate_l2_key(&l2_key1)?;
        validate_l2_key(&l2_key2)?;

        let now = self.ctx.now();
        let first = self
            .ctx
            .io("load attributes", self.ctx.store.load_attributes(&l2_key1))
            .await?
            .filter(|record| record.is_recallable(now));
        let second = self
            .ctx
            .io("load attributes", self.ctx.store.load_attributes(&l2_key2))
            .await?
            .filter(|record| record.is_recallable(now));

        let assessment = match (&first, &second) {
            (Some(_), Some(_)) if l2_key1 == l2_key2 => Assessment {
                sameness: NetworkSameness::Same,
                confidence: 1.0,
            },
            (Some(a), Some(b)) => assess(&a.attributes, &b.attributes),
            _ => Assessment::unknown(),
        };

        Ok(SameL3NetworkResponse {
            l2_key1,
            l2_key2,
            sameness: assessment.sameness,
            confidence: assessment.confidence,
        })
    }
}
