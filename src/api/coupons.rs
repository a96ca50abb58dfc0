//! Coupon rush endpoints

use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{ApiError, AppState, CurrentActor, Envelope, Params, Payload};
use crate::claims::{ClaimContext, ClaimFailure, ClaimResult};
use crate::domain::aggregates::ResourceKind;
use crate::domain::value_objects::{ResourceId, TemplateId};
use crate::ledger::Ledger;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub order: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CouponRushView {
    pub id: ResourceId,
    pub title: String,
    pub template_id: TemplateId,
    /// `None` when unlimited
    pub quantity: Option<u32>,
    pub claimed_count: u32,
    pub remaining: Option<u32>,
    pub created_at: DateTime<Utc>,
    /// Whether the caller already holds a coupon from this rush
    pub claimed: bool,
}

/// Active coupon rushes that still have stock, newest first unless `order=asc`.
pub async fn list<L: Ledger>(
    State(state): State<AppState<L>>,
    actor: Option<CurrentActor>,
    Params(params): Params<ListParams>,
) -> Result<Envelope<Vec<CouponRushView>>, ApiError> {
    let ascending = match params.order.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("desc") => false,
        Some("asc") => true,
        Some(_) => return Err(ApiError::Invalid("unsupported sort order".into())),
    };

    let ledger = state.claims.ledger();
    let mine = match actor {
        Some(CurrentActor(actor)) => ledger.claims_by_actor(actor).await?,
        None => Vec::new(),
    };

    let mut rushes: Vec<CouponRushView> = ledger
        .active_resources()
        .await?
        .into_iter()
        .filter(|r| !r.is_exhausted())
        .filter_map(|r| {
            let &ResourceKind::Coupon { template_id } = r.kind() else { return None };
            Some(CouponRushView {
                id: r.id(),
                title: r.title().to_owned(),
                template_id,
                quantity: r.capacity(),
                claimed_count: r.claimed_count(),
                remaining: r.remaining(),
                created_at: r.created_at(),
                claimed: mine.iter().any(|c| c.resource_id == r.id()),
            })
        })
        .collect();
    if !ascending {
        rushes.reverse();
    }
    Ok(Envelope::ok(rushes))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReceiveRequest {
    #[validate(length(min = 1, max = 64))]
    pub id: String,
}

pub async fn receive<L: Ledger>(
    State(state): State<AppState<L>>,
    CurrentActor(actor): CurrentActor,
    Payload(request): Payload<ReceiveRequest>,
) -> Result<Envelope<ClaimResult>, ApiError> {
    request.validate()?;
    let resource: ResourceId = request.id.parse().map_err(|_| ClaimFailure::NotFound)?;
    let result = state.claims.claim(resource, actor, state.coupons.as_ref(), &ClaimContext::default()).await?;
    Ok(Envelope::ok(result))
}
