//! Group-buy ("spell") endpoints

use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

use super::{ApiError, AppState, CurrentActor, Envelope, Params, Payload};
use crate::claims::{ClaimFailure, OrderDetails};
use crate::domain::aggregates::{GroupIntent, GroupStatus};
use crate::domain::value_objects::{ActorId, AddressId, ArtifactId, GroupId, ResourceId};
use crate::ledger::Ledger;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSpellRequest {
    #[validate(length(min = 1, max = 64))]
    pub bulk_sku_id: String,
    /// Absent, empty or `"0"` opens a new group
    #[serde(default)]
    pub spell_id: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0, max = 16))]
    pub pay_type: i32,
    #[serde(default)]
    #[validate(range(min = 0, max = 16))]
    pub delivery_type: i32,
    #[serde(default)]
    #[validate(range(min = 0, max = 16))]
    pub invoice_type: i32,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub invoice_title: String,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub invoice_content: String,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub message: String,
    #[serde(default)]
    pub address_id: Option<String>,
    /// Coupon instance to redeem against the order
    #[serde(default)]
    pub ticket_detail_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateSpellView {
    /// Order number
    pub number: String,
    pub order_id: ArtifactId,
    pub spell_id: GroupId,
    pub state: GroupStatus,
}

/// `None` for a missing reference, an error for one that does not parse.
fn reference<T: FromStr>(raw: Option<&str>) -> Result<Option<T>, ()> {
    match raw.map(str::trim) {
        None | Some("" | "0") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| ()),
    }
}

pub async fn create_spell<L: Ledger>(
    State(state): State<AppState<L>>,
    CurrentActor(actor): CurrentActor,
    Payload(request): Payload<CreateSpellRequest>,
) -> Result<Envelope<CreateSpellView>, ApiError> {
    request.validate()?;
    let sku: ResourceId = request.bulk_sku_id.trim().parse().map_err(|_| ClaimFailure::NotFound)?;
    let group: Option<GroupId> = reference(request.spell_id.as_deref()).map_err(|_| ClaimFailure::NotFound)?;
    let address_id: Option<AddressId> = reference(request.address_id.as_deref())
        .map_err(|_| ClaimFailure::Rejected("delivery address not found".into()))?;
    let coupon_id: Option<ArtifactId> = reference(request.ticket_detail_id.as_deref())
        .map_err(|_| ClaimFailure::Rejected("coupon cannot be used".into()))?;

    let order = OrderDetails {
        address_id,
        pay_type: request.pay_type,
        delivery_type: request.delivery_type,
        invoice_type: request.invoice_type,
        invoice_title: request.invoice_title,
        invoice_content: request.invoice_content,
        message: request.message,
        coupon_id,
    };
    let join = state.groups.join_or_create(sku, GroupIntent::from(group), actor, state.orders.as_ref(), order).await?;

    Ok(Envelope::ok(CreateSpellView {
        number: join.claim.reference().to_owned(),
        order_id: join.claim.artifact_id(),
        spell_id: join.group_id,
        state: join.state,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SpellDetailParams {
    #[serde(rename = "spellId")]
    pub spell_id: String,
}

#[derive(Debug, Serialize)]
pub struct ParticipantView {
    pub actor_id: ActorId,
    pub order_id: ArtifactId,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SpellDetailView {
    pub spell_id: GroupId,
    pub bulk_sku_id: ResourceId,
    pub state: GroupStatus,
    pub target_count: u32,
    pub current_count: u32,
    /// Participants still needed
    pub missing: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub participants: Vec<ParticipantView>,
    /// Whether the caller is one of the participants; always false without a token
    pub joined: bool,
}

pub async fn spell_detail<L: Ledger>(
    State(state): State<AppState<L>>,
    actor: Option<CurrentActor>,
    Params(params): Params<SpellDetailParams>,
) -> Result<Envelope<SpellDetailView>, ApiError> {
    let id: GroupId = params.spell_id.parse().map_err(|_| ClaimFailure::NotFound)?;
    let detail = state.groups.group_detail(id).await?;
    let joined = actor.is_some_and(|CurrentActor(actor)| detail.includes(actor));

    let group = &detail.group;
    Ok(Envelope::ok(SpellDetailView {
        spell_id: group.id(),
        bulk_sku_id: group.resource_id(),
        state: detail.status,
        target_count: group.target_count(),
        current_count: group.current_count(),
        missing: group.target_count().saturating_sub(group.current_count()),
        created_at: group.created_at(),
        expires_at: group.expires_at(),
        participants: detail
            .participants
            .iter()
            .map(|c| ParticipantView { actor_id: c.actor_id, order_id: c.artifact.id, joined_at: c.created_at })
            .collect(),
        joined,
    }))
}

const SPELL_ORDER_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellOrderParams {
    pub status: String,
    pub page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SpellOrderView {
    pub number: String,
    pub order_id: ArtifactId,
    pub spell_id: GroupId,
    pub bulk_sku_id: ResourceId,
    pub state: GroupStatus,
    pub target_count: u32,
    pub current_count: u32,
    pub joined_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// The caller's group-buy orders whose group is in `status`, newest first.
pub async fn spell_orders<L: Ledger>(
    State(state): State<AppState<L>>,
    CurrentActor(actor): CurrentActor,
    Params(params): Params<SpellOrderParams>,
) -> Result<Envelope<Vec<SpellOrderView>>, ApiError> {
    let status: GroupStatus = params.status.trim().parse().map_err(|_| ApiError::Invalid("unsupported group status".into()))?;
    let limit = params.page_size.unwrap_or(SPELL_ORDER_PAGE_SIZE).clamp(1, SPELL_ORDER_PAGE_SIZE);

    let orders = state.groups.orders_of(actor, status, limit).await?;
    Ok(Envelope::ok(
        orders
            .into_iter()
            .map(|order| SpellOrderView {
                number: order.claim.artifact.reference,
                order_id: order.claim.artifact.id,
                spell_id: order.group.id(),
                bulk_sku_id: order.group.resource_id(),
                state: order.status,
                target_count: order.group.target_count(),
                current_count: order.group.current_count(),
                joined_at: order.claim.created_at,
                expires_at: order.group.expires_at(),
            })
            .collect(),
    ))
}
