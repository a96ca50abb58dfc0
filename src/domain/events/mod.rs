//! Domain events
use crate::domain::aggregates::ArtifactRef;
use crate::domain::value_objects::{ActorId, AddressId, ClaimId, GroupId, ResourceId};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DomainEvent {
    Claim(ClaimEvent),
    Group(GroupEvent),
    Address(AddressEvent),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClaimEvent {
    Recorded { claim_id: ClaimId, resource_id: ResourceId, actor_id: ActorId, artifact: ArtifactRef, group_id: Option<GroupId> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GroupEvent {
    Succeeded { group_id: GroupId, resource_id: ResourceId, participants: u32 },
    Failed { group_id: GroupId, participants: u32 },
    Expired { group_id: GroupId, participants: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AddressEvent {
    DefaultChanged { actor_id: ActorId, address_id: AddressId },
}

impl DomainEvent {
    /// NATS subject the event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Claim(ClaimEvent::Recorded { .. }) => "storefront.claims.recorded",
            Self::Group(GroupEvent::Succeeded { .. }) => "storefront.groups.succeeded",
            Self::Group(GroupEvent::Failed { .. }) => "storefront.groups.failed",
            Self::Group(GroupEvent::Expired { .. }) => "storefront.groups.expired",
            Self::Address(AddressEvent::DefaultChanged { .. }) => "storefront.addresses.default_changed",
        }
    }
}
