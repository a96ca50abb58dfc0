//! In-memory issuers backed by [`MemoryTx`] staging.

use async_trait::async_trait;
use chrono::{Duration, Utc};

use super::{order_number, redemption_code, ArtifactError, ArtifactIssuer, ArtifactRequest};
use crate::domain::aggregates::{ArtifactKind, ArtifactRef, ResourceKind};
use crate::domain::value_objects::ArtifactId;
use crate::ledger::{MemoryTx, StoredArtifact};

/// Takes one coupon from the rush's template and stages an instance for the actor.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryCouponIssuer;

#[async_trait]
impl ArtifactIssuer<MemoryTx> for MemoryCouponIssuer {
    fn kind(&self) -> ArtifactKind { ArtifactKind::CouponInstance }

    async fn issue(&self, tx: &mut MemoryTx, request: &ArtifactRequest<'_>) -> Result<ArtifactRef, ArtifactError> {
        let &ResourceKind::Coupon { template_id } = request.resource.kind() else {
            return Err(ArtifactError::Rejected("not a coupon rush".into()));
        };
        let valid_days = tx.take_template_stock(template_id).await?.ok_or(ArtifactError::Exhausted)?;

        let coupon = StoredArtifact {
            id: ArtifactId::new(),
            kind: ArtifactKind::CouponInstance,
            reference: redemption_code(),
            resource_id: request.resource.id(),
            actor_id: request.actor,
            group_id: request.group,
            valid_until: Some(Utc::now() + Duration::days(i64::from(valid_days))),
        };
        Ok(tx.stage_artifact(coupon).await?)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryOrderCreator;

#[async_trait]
impl ArtifactIssuer<MemoryTx> for MemoryOrderCreator {
    fn kind(&self) -> ArtifactKind { ArtifactKind::Order }

    async fn issue(&self, tx: &mut MemoryTx, request: &ArtifactRequest<'_>) -> Result<ArtifactRef, ArtifactError> {
        let ResourceKind::GroupBuy { .. } = request.resource.kind() else {
            return Err(ArtifactError::Rejected("not a group-buy item".into()));
        };
        let details = request.order.ok_or_else(|| ArtifactError::Rejected("order details are required".into()))?;
        let address = details.address_id.ok_or_else(|| ArtifactError::Rejected("a delivery address is required".into()))?;
        match tx.find_address(address).await {
            Some(found) if found.actor_id == request.actor => {}
            _ => return Err(ArtifactError::Rejected("delivery address not found".into())),
        }
        if let Some(coupon) = details.coupon_id {
            if !tx.redeem_coupon(coupon, request.actor).await? {
                return Err(ArtifactError::Rejected("coupon cannot be used".into()));
            }
        }

        let order = StoredArtifact {
            id: ArtifactId::new(),
            kind: ArtifactKind::Order,
            reference: order_number(),
            resource_id: request.resource.id(),
            actor_id: request.actor,
            group_id: request.group,
            valid_until: None,
        };
        Ok(tx.stage_artifact(order).await?)
    }
}
