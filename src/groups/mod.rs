//! Group Formation Tracker
//!
//! Group-buy specialization of the claim protocol. Opening a group and joining one are
//! both claims against the SKU's resource row; the group row is locked after the resource
//! row, never before, so two joins can not deadlock each other.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, instrument};

use crate::claims::orchestrator::{finish, log_failure, recorded};
use crate::claims::{with_retry, Abort, ArtifactIssuer, ClaimContext, ClaimFailure, ClaimOrchestrator, ClaimResult, OrderDetails, ResourceCounter};
use crate::domain::aggregates::{Claim, Group, GroupError, GroupIntent, GroupStatus, ResourceKind};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{ActorId, GroupId, Quantity, ResourceId};
use crate::ledger::{Ledger, LedgerTx, StoreError};

/// Outcome of a successful open or join.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupJoin {
    pub group_id: GroupId,
    pub state: GroupStatus,
    pub claim: ClaimResult,
}

/// A group as readers see it, with its participants in join order.
#[derive(Clone, Debug, Serialize)]
pub struct GroupDetail {
    pub group: Group,
    /// `group.status` with the deadline applied
    pub status: GroupStatus,
    pub participants: Vec<Claim>,
}

impl GroupDetail {
    pub fn includes(&self, actor: ActorId) -> bool {
        self.participants.iter().any(|c| c.actor_id == actor)
    }
}

/// One of an actor's group-buy orders with the status its group reads as now.
#[derive(Clone, Debug, Serialize)]
pub struct GroupOrder {
    pub claim: Claim,
    pub group: Group,
    pub status: GroupStatus,
}

pub struct GroupTracker<L: Ledger> {
    claims: ClaimOrchestrator<L>,
}

impl<L: Ledger> Clone for GroupTracker<L> {
    fn clone(&self) -> Self { Self { claims: self.claims.clone() } }
}

impl<L: Ledger> GroupTracker<L> {
    pub fn new(claims: ClaimOrchestrator<L>) -> Self { Self { claims } }

    /// Opens a new group or joins an existing one, placing the actor's order in the same
    /// transaction.
    #[instrument(skip_all, fields(%resource, ?intent, %actor))]
    pub async fn join_or_create(
        &self,
        resource: ResourceId,
        intent: GroupIntent,
        actor: ActorId,
        orders: &dyn ArtifactIssuer<L::Tx>,
        order: OrderDetails,
    ) -> Result<GroupJoin, ClaimFailure> {
        let order = &Some(order);
        let outcome = with_retry(self.claims.retry(), "join_or_create", move || async move {
            let mut tx = self.claims.ledger().begin().await?;
            let staged = self.stage_join(&mut tx, resource, intent, actor, orders, order).await;
            finish(tx, staged).await
        })
        .await;

        match outcome {
            Ok((join, claim, events)) => {
                info!(group_id = %join.group_id, state = join.state.as_str(), "group joined");
                let mut published = vec![recorded(&claim)];
                published.extend(events);
                self.claims.publish(published).await;
                Ok(join)
            }
            Err(failure) => {
                log_failure(&failure);
                Err(failure)
            }
        }
    }

    async fn stage_join(
        &self,
        tx: &mut L::Tx,
        resource_id: ResourceId,
        intent: GroupIntent,
        actor: ActorId,
        orders: &dyn ArtifactIssuer<L::Tx>,
        order: &Option<OrderDetails>,
    ) -> Result<(GroupJoin, Claim, Vec<DomainEvent>), Abort> {
        let now = self.claims.clock().now();
        let mut resource = ResourceCounter::lock_active(tx, resource_id).await?.ok_or(ClaimFailure::NotFound)?;
        let &ResourceKind::GroupBuy { group_size, group_window, .. } = resource.kind() else {
            return Err(ClaimFailure::NotFound.into());
        };

        let mut group = match intent {
            GroupIntent::CreateNew => {
                let group = Group::open(resource_id, group_size, group_window, now);
                tx.insert_group(&group).await?;
                group
            }
            GroupIntent::JoinExisting(id) => {
                let group = tx.lock_group(id).await?.ok_or(ClaimFailure::NotFound)?;
                if group.resource_id() != resource_id || group.ensure_joinable(now).is_err() {
                    return Err(ClaimFailure::GroupUnavailable.into());
                }
                group
            }
        };

        let ctx = ClaimContext { quantity: Quantity::ONE, group: Some(group.id()), order: order.clone() };
        let claim = self.claims.reserve_and_record(tx, &mut resource, actor, orders, &ctx).await?;

        if let GroupIntent::JoinExisting(_) = intent {
            group.admit(now).map_err(|_| ClaimFailure::GroupUnavailable)?;
            tx.save_group(&group).await?;
        }

        let join = GroupJoin { group_id: group.id(), state: group.status(), claim: ClaimResult::from(&claim) };
        Ok((join, claim, group.take_events()))
    }

    /// Explicitly fails a forming group.
    #[instrument(skip(self))]
    pub async fn fail_group(&self, id: GroupId) -> Result<GroupStatus, ClaimFailure> {
        self.resolve(id, "fail_group", |group, _| group.fail()).await
    }

    /// Moves a forming group past its deadline to expired.
    #[instrument(skip(self))]
    pub async fn expire_group(&self, id: GroupId) -> Result<GroupStatus, ClaimFailure> {
        self.resolve(id, "expire_group", |group, now| group.expire(now)).await
    }

    async fn resolve<F>(&self, id: GroupId, operation: &'static str, transition: F) -> Result<GroupStatus, ClaimFailure>
    where
        F: Fn(&mut Group, DateTime<Utc>) -> Result<(), GroupError> + Send + Sync,
    {
        let transition = &transition;
        let (status, events) = with_retry(self.claims.retry(), operation, move || async move {
            let mut tx = self.claims.ledger().begin().await?;
            let staged = async {
                let mut group = tx.lock_group(id).await?.ok_or(ClaimFailure::NotFound)?;
                transition(&mut group, self.claims.clock().now()).map_err(|_| ClaimFailure::GroupUnavailable)?;
                tx.save_group(&group).await?;
                Ok::<_, Abort>((group.status(), group.take_events()))
            }
            .await;
            finish(tx, staged).await
        })
        .await
        .inspect_err(log_failure)?;

        info!(group_id = %id, status = status.as_str(), "group resolved");
        self.claims.publish(events).await;
        Ok(status)
    }

    /// The group with its deadline applied, plus its participants.
    pub async fn group_detail(&self, id: GroupId) -> Result<GroupDetail, ClaimFailure> {
        let ledger = self.claims.ledger();
        let group = ledger.group(id).await.map_err(read_failure)?.ok_or(ClaimFailure::NotFound)?;
        let participants = ledger.group_claims(id).await.map_err(read_failure)?;
        let status = group.effective_status(self.claims.clock().now());
        Ok(GroupDetail { group, status, participants })
    }

    /// `actor`'s group orders whose group currently reads as `status`, newest first.
    pub async fn orders_of(&self, actor: ActorId, status: GroupStatus, limit: usize) -> Result<Vec<GroupOrder>, ClaimFailure> {
        let ledger = self.claims.ledger();
        let claims: Vec<Claim> = ledger.claims_by_actor(actor).await.map_err(read_failure)?.into_iter().filter(|c| c.group_id.is_some()).collect();
        let ids: Vec<GroupId> = claims.iter().filter_map(|c| c.group_id).collect();
        let groups: HashMap<GroupId, Group> = ledger.groups(&ids).await.map_err(read_failure)?.into_iter().map(|g| (g.id(), g)).collect();

        let now = self.claims.clock().now();
        let mut orders: Vec<GroupOrder> = claims
            .into_iter()
            .filter_map(|claim| {
                let group = groups.get(&claim.group_id?)?.clone();
                let current = group.effective_status(now);
                (current == status).then_some(GroupOrder { claim, group, status: current })
            })
            .collect();
        orders.reverse();
        orders.truncate(limit);
        Ok(orders)
    }
}

fn read_failure(error: StoreError) -> ClaimFailure {
    if error.is_transient() { ClaimFailure::TransientStoreFailure(error.to_string()) } else { ClaimFailure::Internal(error.to_string()) }
}
