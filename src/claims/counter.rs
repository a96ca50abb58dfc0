//! Resource Counter

use crate::domain::aggregates::{ClaimableResource, ResourceError};
use crate::domain::value_objects::{Quantity, ResourceId};
use crate::ledger::{LedgerTx, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reservation {
    Reserved,
    InsufficientCapacity,
    NotFound,
}

/// Capacity bookkeeping for claimable resources. The only writer of `claimed_count`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResourceCounter;

impl ResourceCounter {
    /// Locks the resource row for the rest of the transaction. Missing and inactive
    /// resources come back as `None`.
    pub async fn lock_active<Tx: LedgerTx>(tx: &mut Tx, id: ResourceId) -> Result<Option<ClaimableResource>, StoreError> {
        Ok(tx.lock_resource(id).await?.filter(ClaimableResource::is_active))
    }

    /// Takes `quantity` units from a resource locked by `tx`. Does not commit.
    pub async fn try_reserve<Tx: LedgerTx>(tx: &mut Tx, resource: &mut ClaimableResource, quantity: Quantity) -> Result<Reservation, StoreError> {
        match resource.reserve(quantity) {
            Ok(()) => {
                tx.save_resource(resource).await?;
                Ok(Reservation::Reserved)
            }
            Err(ResourceError::InsufficientCapacity) => Ok(Reservation::InsufficientCapacity),
            Err(ResourceError::Inactive) => Ok(Reservation::NotFound),
        }
    }
}
