//! Artifact collaborators
//!
//! A successful claim produces something the actor keeps: a coupon instance for a coupon
//! rush, an order for a group-buy. Issuers write through the claim's open transaction and
//! never commit on their own.

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::claims::OrderDetails;
use crate::domain::aggregates::{ArtifactKind, ArtifactRef, ClaimableResource};
use crate::domain::value_objects::{ActorId, GroupId, Quantity};
use crate::ledger::StoreError;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryCouponIssuer, MemoryOrderCreator};
pub use postgres::{PgCouponIssuer, PgOrderCreator};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("no stock left to issue from")]
    Exhausted,

    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for ArtifactError {
    fn from(error: sqlx::Error) -> Self { Self::Store(error.into()) }
}

/// Everything an issuer knows about the claim it is serving.
#[derive(Clone, Copy, Debug)]
pub struct ArtifactRequest<'a> {
    /// Locked and already reserved within the current transaction
    pub resource: &'a ClaimableResource,
    pub actor: ActorId,
    pub group: Option<GroupId>,
    pub quantity: Quantity,
    pub order: Option<&'a OrderDetails>,
}

#[async_trait]
pub trait ArtifactIssuer<Tx: Send + 'static>: Send + Sync {
    fn kind(&self) -> ArtifactKind;

    /// Writes the artifact and returns it with the reference shown to the actor.
    async fn issue(&self, tx: &mut Tx, request: &ArtifactRequest<'_>) -> Result<ArtifactRef, ArtifactError>;
}

/// Coupon redemption code.
pub(crate) fn redemption_code() -> String {
    format!("{:016X}", rand::random::<u64>())
}

/// Human-readable order number, `ORD-<date>-<8 digits>`.
pub(crate) fn order_number() -> String {
    format!("ORD-{}-{:08}", Utc::now().format("%Y%m%d"), rand::random::<u32>() % 100_000_000)
}
