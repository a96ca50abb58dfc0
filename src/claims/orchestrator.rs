//! Claim Orchestrator

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{with_retry, Abort, ArtifactIssuer, ArtifactRequest, ClaimContext, ClaimFailure, IdempotencyGuard, Reservation, ResourceCounter, RetryPolicy};
use crate::clock::Clock;
use crate::domain::aggregates::{ArtifactRef, Claim, ClaimableResource};
use crate::domain::events::{ClaimEvent, DomainEvent};
use crate::domain::value_objects::{ActorId, ArtifactId, ClaimId, GroupId, ResourceId};
use crate::ledger::{Ledger, LedgerTx};
use crate::publisher::{publish_all, EventPublisher};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClaimResult {
    pub claim_id: ClaimId,
    pub resource_id: ResourceId,
    pub artifact: ArtifactRef,
    pub group_id: Option<GroupId>,
}

impl ClaimResult {
    pub fn artifact_id(&self) -> ArtifactId { self.artifact.id }
    pub fn reference(&self) -> &str { &self.artifact.reference }
}

impl From<&Claim> for ClaimResult {
    fn from(claim: &Claim) -> Self {
        Self { claim_id: claim.id, resource_id: claim.resource_id, artifact: claim.artifact.clone(), group_id: claim.group_id }
    }
}

pub(crate) fn recorded(claim: &Claim) -> DomainEvent {
    DomainEvent::Claim(ClaimEvent::Recorded {
        claim_id: claim.id,
        resource_id: claim.resource_id,
        actor_id: claim.actor_id,
        artifact: claim.artifact.clone(),
        group_id: claim.group_id,
    })
}

pub struct ClaimOrchestrator<L: Ledger> {
    ledger: L,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn EventPublisher>,
    retry: RetryPolicy,
}

impl<L: Ledger> Clone for ClaimOrchestrator<L> {
    fn clone(&self) -> Self {
        Self { ledger: self.ledger.clone(), clock: Arc::clone(&self.clock), publisher: Arc::clone(&self.publisher), retry: self.retry }
    }
}

impl<L: Ledger> ClaimOrchestrator<L> {
    pub fn new(ledger: L, clock: Arc<dyn Clock>, publisher: Arc<dyn EventPublisher>, retry: RetryPolicy) -> Self {
        Self { ledger, clock, publisher, retry }
    }

    pub fn ledger(&self) -> &L { &self.ledger }
    pub fn clock(&self) -> &dyn Clock { self.clock.as_ref() }
    pub fn retry(&self) -> RetryPolicy { self.retry }

    pub(crate) async fn publish(&self, events: Vec<DomainEvent>) {
        publish_all(self.publisher.as_ref(), events).await;
    }

    /// Claims one unit of `resource` for `actor`, producing the issuer's artifact.
    ///
    /// Either everything commits (counter, artifact, claim record) or nothing does.
    /// Transient store failures are retried from the top up to the configured attempts.
    #[instrument(skip_all, fields(%resource, %actor))]
    pub async fn claim(&self, resource: ResourceId, actor: ActorId, issuer: &dyn ArtifactIssuer<L::Tx>, ctx: &ClaimContext) -> Result<ClaimResult, ClaimFailure> {
        let outcome = with_retry(self.retry, "claim", move || self.attempt(resource, actor, issuer, ctx)).await;
        match outcome {
            Ok(claim) => {
                info!(claim_id = %claim.id, artifact_id = %claim.artifact.id, "claim recorded");
                let result = ClaimResult::from(&claim);
                self.publish(vec![recorded(&claim)]).await;
                Ok(result)
            }
            Err(failure) => {
                log_failure(&failure);
                Err(failure)
            }
        }
    }

    async fn attempt(&self, id: ResourceId, actor: ActorId, issuer: &dyn ArtifactIssuer<L::Tx>, ctx: &ClaimContext) -> Result<Claim, Abort> {
        let mut tx = self.ledger.begin().await?;
        let staged = self.stage_claim(&mut tx, id, actor, issuer, ctx).await;
        finish(tx, staged).await
    }

    async fn stage_claim(&self, tx: &mut L::Tx, id: ResourceId, actor: ActorId, issuer: &dyn ArtifactIssuer<L::Tx>, ctx: &ClaimContext) -> Result<Claim, Abort> {
        let mut resource = ResourceCounter::lock_active(tx, id)
            .await?
            .filter(|r| r.kind().artifact_kind() == issuer.kind())
            .ok_or(ClaimFailure::NotFound)?;
        self.reserve_and_record(tx, &mut resource, actor, issuer, ctx).await
    }

    /// Guard, reservation, artifact and claim record against a resource already locked by `tx`.
    pub(crate) async fn reserve_and_record(
        &self,
        tx: &mut L::Tx,
        resource: &mut ClaimableResource,
        actor: ActorId,
        issuer: &dyn ArtifactIssuer<L::Tx>,
        ctx: &ClaimContext,
    ) -> Result<Claim, Abort> {
        if IdempotencyGuard::has_claimed(tx, resource.id(), actor).await? {
            return Err(ClaimFailure::AlreadyClaimed.into());
        }
        match ResourceCounter::try_reserve(tx, resource, ctx.quantity).await? {
            Reservation::Reserved => {}
            Reservation::InsufficientCapacity => return Err(ClaimFailure::Exhausted.into()),
            Reservation::NotFound => return Err(ClaimFailure::NotFound.into()),
        }

        let request = ArtifactRequest { resource: &*resource, actor, group: ctx.group, quantity: ctx.quantity, order: ctx.order.as_ref() };
        let artifact = issuer.issue(tx, &request).await?;

        let claim = Claim::record(resource.id(), actor, artifact, ctx.group, self.clock.now());
        tx.insert_claim(&claim).await?;
        Ok(claim)
    }
}

/// Commits on success and rolls back otherwise.
pub(crate) async fn finish<Tx: LedgerTx, T>(tx: Tx, staged: Result<T, Abort>) -> Result<T, Abort> {
    match staged {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(abort) => {
            if let Err(error) = tx.rollback().await {
                warn!(%error, "rollback failed");
            }
            Err(abort)
        }
    }
}

pub(crate) fn log_failure(failure: &ClaimFailure) {
    if failure.is_business() {
        info!(code = failure.code(), "claim refused");
    } else {
        warn!(code = failure.code(), detail = ?failure, "claim failed");
    }
}
