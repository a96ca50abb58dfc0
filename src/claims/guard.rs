//! Idempotency Guard

use crate::domain::value_objects::{ActorId, ResourceId};
use crate::ledger::{LedgerTx, StoreError};

#[derive(Clone, Copy, Debug, Default)]
pub struct IdempotencyGuard;

impl IdempotencyGuard {
    /// Must run after the resource row is locked and before capacity is reserved, so two
    /// requests from the same actor are serialized on that lock.
    pub async fn has_claimed<Tx: LedgerTx>(tx: &mut Tx, resource: ResourceId, actor: ActorId) -> Result<bool, StoreError> {
        Ok(tx.find_claim(resource, actor).await?.is_some())
    }
}
