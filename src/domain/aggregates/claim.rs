//! Claim record

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;
use crate::domain::value_objects::{ActorId, ArtifactId, ClaimId, GroupId, ResourceId};

/// One actor's successful acquisition of one unit of a resource. Insert-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Claim {
    pub id: ClaimId,
    pub resource_id: ResourceId,
    pub actor_id: ActorId,
    pub artifact: ArtifactRef,
    pub group_id: Option<GroupId>,
    pub created_at: DateTime<Utc>,
}

/// What the claim produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub id: ArtifactId,
    /// Coupon redemption code or order number shown to the actor
    pub reference: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind { CouponInstance, Order }

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self { Self::CouponInstance => "coupon_instance", Self::Order => "order" }
    }
}

impl FromStr for ArtifactKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coupon_instance" => Ok(Self::CouponInstance),
            "order" => Ok(Self::Order),
            other => Err(format!("unknown artifact kind {other:?}")),
        }
    }
}

impl Claim {
    pub fn record(resource_id: ResourceId, actor_id: ActorId, artifact: ArtifactRef, group_id: Option<GroupId>, now: DateTime<Utc>) -> Self {
        Self { id: ClaimId::new(), resource_id, actor_id, artifact, group_id, created_at: now }
    }

    pub fn key(&self) -> (ResourceId, ActorId) { (self.resource_id, self.actor_id) }
}
