//! Issuers writing coupon instances and orders through a [`PgTx`].

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{query, query_scalar};

use super::{order_number, redemption_code, ArtifactError, ArtifactIssuer, ArtifactRequest};
use crate::domain::aggregates::{ArtifactKind, ArtifactRef, ResourceKind};
use crate::domain::value_objects::ArtifactId;
use crate::ledger::PgTx;

const TAKE_TEMPLATE_STOCK_SQL: &str = "UPDATE coupon_templates SET quantity = quantity - 1, updated_at = NOW() \
     WHERE id = $1 AND status = 'active' AND quantity > 0 RETURNING valid_days";

const INSERT_COUPON_INSTANCE_SQL: &str = "INSERT INTO coupon_instances (id, template_id, actor_id, code, status, valid_from, valid_until, created_at) \
     VALUES ($1, $2, $3, $4, 'unused', $5, $6, $5)";

const REDEEM_COUPON_SQL: &str = "UPDATE coupon_instances ci SET status = 'used', used_at = NOW() FROM coupon_templates t \
     WHERE ci.id = $1 AND ci.actor_id = $2 AND ci.status = 'unused' AND ci.valid_until > NOW() AND t.id = ci.template_id \
     RETURNING t.reduce_cost";

const INSERT_ORDER_SQL: &str = "INSERT INTO orders (id, order_no, actor_id, resource_id, group_id, quantity, total_amount, discount_amount, \
     address_id, pay_type, delivery_type, invoice_type, invoice_title, invoice_content, message, coupon_instance_id, status, created_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, 'pending', NOW())";

/// Takes one unit of the coupon template's stock and mints an instance for the actor.
#[derive(Clone, Copy, Debug, Default)]
pub struct PgCouponIssuer;

#[async_trait]
impl ArtifactIssuer<PgTx> for PgCouponIssuer {
    fn kind(&self) -> ArtifactKind { ArtifactKind::CouponInstance }

    async fn issue(&self, tx: &mut PgTx, request: &ArtifactRequest<'_>) -> Result<ArtifactRef, ArtifactError> {
        let &ResourceKind::Coupon { template_id } = request.resource.kind() else {
            return Err(ArtifactError::Rejected("not a coupon rush".into()));
        };

        let valid_days: Option<i32> = query_scalar(TAKE_TEMPLATE_STOCK_SQL)
            .bind(template_id)
            .fetch_optional(tx.conn())
            .await?;
        let valid_days = valid_days.ok_or(ArtifactError::Exhausted)?;

        let id = ArtifactId::new();
        let code = redemption_code();
        let now = Utc::now();
        query(INSERT_COUPON_INSTANCE_SQL)
            .bind(id)
            .bind(template_id)
            .bind(request.actor)
            .bind(&code)
            .bind(now)
            .bind(now + Duration::days(i64::from(valid_days)))
            .execute(tx.conn())
            .await?;
        Ok(ArtifactRef { kind: ArtifactKind::CouponInstance, id, reference: code })
    }
}

/// Creates a pending order at the group-buy unit price, optionally redeeming one of the
/// actor's coupons against it.
#[derive(Clone, Copy, Debug, Default)]
pub struct PgOrderCreator;

#[async_trait]
impl ArtifactIssuer<PgTx> for PgOrderCreator {
    fn kind(&self) -> ArtifactKind { ArtifactKind::Order }

    async fn issue(&self, tx: &mut PgTx, request: &ArtifactRequest<'_>) -> Result<ArtifactRef, ArtifactError> {
        let &ResourceKind::GroupBuy { unit_price, .. } = request.resource.kind() else {
            return Err(ArtifactError::Rejected("not a group-buy item".into()));
        };
        let details = request.order.ok_or_else(|| ArtifactError::Rejected("order details are required".into()))?;
        let address = details.address_id.ok_or_else(|| ArtifactError::Rejected("a delivery address is required".into()))?;

        let owned: Option<i32> = query_scalar("SELECT 1 FROM addresses WHERE id = $1 AND actor_id = $2")
            .bind(address)
            .bind(request.actor)
            .fetch_optional(tx.conn())
            .await?;
        if owned.is_none() {
            return Err(ArtifactError::Rejected("delivery address not found".into()));
        }

        let total = unit_price.times(request.quantity).value();
        let discount = match details.coupon_id {
            Some(coupon) => {
                let reduce: Option<i64> = query_scalar(REDEEM_COUPON_SQL)
                    .bind(coupon)
                    .bind(request.actor)
                    .fetch_optional(tx.conn())
                    .await?;
                reduce.ok_or_else(|| ArtifactError::Rejected("coupon cannot be used".into()))?.clamp(0, total)
            }
            None => 0,
        };

        let id = ArtifactId::new();
        let number = order_number();
        query(INSERT_ORDER_SQL)
            .bind(id)
            .bind(&number)
            .bind(request.actor)
            .bind(request.resource.id())
            .bind(request.group)
            .bind(i64::from(request.quantity.value()))
            .bind(total - discount)
            .bind(discount)
            .bind(address)
            .bind(details.pay_type)
            .bind(details.delivery_type)
            .bind(details.invoice_type)
            .bind(&details.invoice_title)
            .bind(&details.invoice_content)
            .bind(&details.message)
            .bind(details.coupon_id)
            .execute(tx.conn())
            .await?;
        Ok(ArtifactRef { kind: ArtifactKind::Order, id, reference: number })
    }
}
