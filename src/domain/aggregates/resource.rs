//! Claimable Resource Aggregate

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::str::FromStr;
use crate::domain::aggregates::ArtifactKind;
use crate::domain::value_objects::{Cents, Quantity, ResourceId, TemplateId};

/// A finite (or unlimited) stock that each actor may claim from at most once.
#[derive(Clone, Debug, Serialize)]
pub struct ClaimableResource {
    pub(crate) id: ResourceId,
    pub(crate) title: String,
    pub(crate) kind: ResourceKind,
    pub(crate) capacity: Option<u32>,
    pub(crate) claimed_count: u32,
    pub(crate) status: ResourceStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceKind {
    /// Coupon rush handing out instances of a coupon template
    Coupon { template_id: TemplateId },
    /// Group-buy SKU; each claim is one participant's order
    GroupBuy {
        group_size: u32,
        #[serde(with = "window_secs")]
        group_window: Duration,
        unit_price: Cents,
    },
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Coupon { .. } => "coupon", Self::GroupBuy { .. } => "group_buy" }
    }

    /// What a claim on this kind of resource produces.
    pub fn artifact_kind(&self) -> ArtifactKind {
        match self { Self::Coupon { .. } => ArtifactKind::CouponInstance, Self::GroupBuy { .. } => ArtifactKind::Order }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus { #[default] Active, Inactive, Deleted }

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Active => "active", Self::Inactive => "inactive", Self::Deleted => "deleted" }
    }
}

impl FromStr for ResourceStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown resource status {other:?}")),
        }
    }
}

impl ClaimableResource {
    pub fn coupon(title: impl Into<String>, template_id: TemplateId, capacity: Option<u32>) -> Self {
        Self::create(title, ResourceKind::Coupon { template_id }, capacity)
    }

    pub fn group_buy(title: impl Into<String>, group_size: u32, group_window: Duration, unit_price: Cents, capacity: Option<u32>) -> Self {
        Self::create(title, ResourceKind::GroupBuy { group_size: group_size.max(1), group_window, unit_price }, capacity)
    }

    fn create(title: impl Into<String>, kind: ResourceKind, capacity: Option<u32>) -> Self {
        let now = Utc::now();
        Self {
            id: ResourceId::new(), title: title.into(), kind, capacity, claimed_count: 0,
            status: ResourceStatus::Active, created_at: now, updated_at: now,
        }
    }

    pub fn id(&self) -> ResourceId { self.id }
    pub fn title(&self) -> &str { &self.title }
    pub fn kind(&self) -> &ResourceKind { &self.kind }
    pub fn capacity(&self) -> Option<u32> { self.capacity }
    pub fn claimed_count(&self) -> u32 { self.claimed_count }
    pub fn status(&self) -> ResourceStatus { self.status }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn is_active(&self) -> bool { self.status == ResourceStatus::Active }

    /// Units left; `None` when the resource is unlimited.
    pub fn remaining(&self) -> Option<u32> {
        self.capacity.map(|c| c.saturating_sub(self.claimed_count))
    }

    pub fn is_exhausted(&self) -> bool { self.remaining() == Some(0) }

    pub fn deactivate(&mut self) { self.status = ResourceStatus::Inactive; self.touch(); }

    /// Takes `quantity` units. The caller must hold the row lock.
    pub fn reserve(&mut self, quantity: Quantity) -> Result<(), ResourceError> {
        if !self.is_active() { return Err(ResourceError::Inactive); }
        let next = self.claimed_count.checked_add(quantity.value()).ok_or(ResourceError::InsufficientCapacity)?;
        if let Some(capacity) = self.capacity {
            if next > capacity { return Err(ResourceError::InsufficientCapacity); }
        }
        self.claimed_count = next;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ResourceError { Inactive, InsufficientCapacity }
impl std::error::Error for ResourceError {}
impl std::fmt::Display for ResourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self { Self::Inactive => write!(f, "Resource inactive"), Self::InsufficientCapacity => write!(f, "Insufficient capacity") }
    }
}

mod window_secs {
    use chrono::Duration;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(window: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(window.num_seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_until_capacity() {
        let mut r = ClaimableResource::coupon("10 off", TemplateId::new(), Some(2));
        r.reserve(Quantity::ONE).unwrap();
        r.reserve(Quantity::ONE).unwrap();
        assert_eq!(r.reserve(Quantity::ONE), Err(ResourceError::InsufficientCapacity));
        assert_eq!(r.claimed_count(), 2);
        assert!(r.is_exhausted());
    }

    #[test]
    fn test_reserve_rejects_partial_overflow() {
        let mut r = ClaimableResource::coupon("10 off", TemplateId::new(), Some(3));
        r.reserve(Quantity::new(2).unwrap()).unwrap();
        assert_eq!(r.reserve(Quantity::new(2).unwrap()), Err(ResourceError::InsufficientCapacity));
        assert_eq!(r.remaining(), Some(1));
    }

    #[test]
    fn test_unlimited_and_inactive() {
        let mut r = ClaimableResource::group_buy("tee", 3, Duration::hours(24), Cents::new(990), None);
        for _ in 0..100 { r.reserve(Quantity::ONE).unwrap(); }
        assert_eq!(r.remaining(), None);
        r.deactivate();
        assert_eq!(r.reserve(Quantity::ONE), Err(ResourceError::Inactive));
        assert_eq!(r.claimed_count(), 100);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("deleted".parse::<ResourceStatus>(), Ok(ResourceStatus::Deleted));
        assert!("gone".parse::<ResourceStatus>().is_err());
    }
}
