//! Group-buy Aggregate

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::str::FromStr;
use crate::domain::events::{DomainEvent, GroupEvent};
use crate::domain::value_objects::{GroupId, ResourceId};

#[derive(Clone, Debug, Serialize)]
pub struct Group {
    pub(crate) id: GroupId,
    pub(crate) resource_id: ResourceId,
    pub(crate) target_count: u32,
    pub(crate) current_count: u32,
    pub(crate) status: GroupStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) events: Vec<DomainEvent>,
}

/// Forming is the only non-terminal state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus { #[default] Forming, Succeeded, Failed, Expired }

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Forming => "forming", Self::Succeeded => "succeeded", Self::Failed => "failed", Self::Expired => "expired" }
    }
    pub fn is_terminal(&self) -> bool { *self != Self::Forming }
}

impl FromStr for GroupStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forming" => Ok(Self::Forming),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown group status {other:?}")),
        }
    }
}

/// Whether a group-buy request opens a new group or joins an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupIntent {
    CreateNew,
    JoinExisting(GroupId),
}

impl From<Option<GroupId>> for GroupIntent {
    fn from(group: Option<GroupId>) -> Self {
        group.map_or(Self::CreateNew, Self::JoinExisting)
    }
}

impl Group {
    /// Opens a group with its founder already counted.
    pub fn open(resource_id: ResourceId, target_count: u32, window: Duration, now: DateTime<Utc>) -> Self {
        let mut group = Self {
            id: GroupId::new(), resource_id, target_count: target_count.max(1), current_count: 1,
            status: GroupStatus::Forming, created_at: now, expires_at: now + window, events: vec![],
        };
        group.settle();
        group
    }

    pub fn id(&self) -> GroupId { self.id }
    pub fn resource_id(&self) -> ResourceId { self.resource_id }
    pub fn target_count(&self) -> u32 { self.target_count }
    pub fn current_count(&self) -> u32 { self.current_count }
    pub fn status(&self) -> GroupStatus { self.status }
    pub fn expires_at(&self) -> DateTime<Utc> { self.expires_at }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool { now >= self.expires_at }

    /// Status as a reader should see it; a forming group past its deadline reads as expired.
    pub fn effective_status(&self, now: DateTime<Utc>) -> GroupStatus {
        if self.status == GroupStatus::Forming && self.is_past_deadline(now) { GroupStatus::Expired } else { self.status }
    }

    pub fn ensure_joinable(&self, now: DateTime<Utc>) -> Result<(), GroupError> {
        match self.effective_status(now) {
            GroupStatus::Forming if self.current_count < self.target_count => Ok(()),
            GroupStatus::Forming => Err(GroupError::Full),
            GroupStatus::Expired => Err(GroupError::Expired),
            _ => Err(GroupError::Closed(self.status)),
        }
    }

    /// Counts one more participant; reaching the target closes the group as succeeded.
    pub fn admit(&mut self, now: DateTime<Utc>) -> Result<GroupStatus, GroupError> {
        self.ensure_joinable(now)?;
        self.current_count += 1;
        self.settle();
        Ok(self.status)
    }

    pub fn fail(&mut self) -> Result<(), GroupError> {
        if self.status.is_terminal() { return Err(GroupError::Closed(self.status)); }
        self.status = GroupStatus::Failed;
        self.raise_event(DomainEvent::Group(GroupEvent::Failed { group_id: self.id, participants: self.current_count }));
        Ok(())
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), GroupError> {
        if self.status.is_terminal() { return Err(GroupError::Closed(self.status)); }
        if !self.is_past_deadline(now) { return Err(GroupError::NotYetExpired); }
        self.status = GroupStatus::Expired;
        self.raise_event(DomainEvent::Group(GroupEvent::Expired { group_id: self.id, participants: self.current_count }));
        Ok(())
    }

    fn settle(&mut self) {
        if self.status == GroupStatus::Forming && self.current_count >= self.target_count {
            self.status = GroupStatus::Succeeded;
            self.raise_event(DomainEvent::Group(GroupEvent::Succeeded { group_id: self.id, resource_id: self.resource_id, participants: self.current_count }));
        }
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum GroupError { Full, Expired, NotYetExpired, Closed(GroupStatus) }
impl std::error::Error for GroupError {}
impl std::fmt::Display for GroupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "Group is full"),
            Self::Expired => write!(f, "Group has expired"),
            Self::NotYetExpired => write!(f, "Group deadline has not passed"),
            Self::Closed(status) => write!(f, "Group is {}", status.as_str()),
        }
    }
}
