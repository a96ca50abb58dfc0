//! Ledger Store
//!
//! The transactional store that owns resource counters, groups, claim records and
//! address books. Every mutation goes through a [`LedgerTx`] obtained from
//! [`Ledger::begin`]; rows are locked on read (`SELECT ... FOR UPDATE` semantics) and
//! nothing becomes visible to other transactions before [`LedgerTx::commit`].

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::aggregates::{Address, Claim, ClaimableResource, Group};
use crate::domain::value_objects::{ActorId, GroupId, ResourceId};

pub mod memory;
pub mod postgres;

pub use memory::{CouponTemplate, FailPoint, MemoryLedger, MemoryTx, StoredArtifact};
pub use postgres::{PgLedger, PgTx};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("timed out waiting for a row lock")]
    LockTimeout,

    #[error("transaction aborted by the store: {0}")]
    Transient(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("row {0} written without holding its lock")]
    Unlocked(String),

    #[error("stored row is malformed: {0}")]
    Corrupt(String),

    #[error("storage error")]
    Sql(#[source] sqlx::Error),
}

impl StoreError {
    /// Safe to retry the whole transaction from the top.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockTimeout | Self::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => return Self::Transient(error.to_string()),
            sqlx::Error::Database(db) => {
                // lock_not_available, serialization_failure, deadlock_detected
                match db.code().as_deref() {
                    Some("55P03") => return Self::LockTimeout,
                    Some("40001" | "40P01") => return Self::Transient(db.message().to_string()),
                    _ => {}
                }
                if db.is_unique_violation() {
                    return Self::UniqueViolation(db.constraint().unwrap_or("unique").to_string());
                }
            }
            _ => {}
        }
        Self::Sql(error)
    }
}

/// An open store transaction. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait LedgerTx: Send {
    /// Locks and loads a resource row regardless of status.
    async fn lock_resource(&mut self, id: ResourceId) -> Result<Option<ClaimableResource>, StoreError>;
    async fn find_claim(&mut self, resource: ResourceId, actor: ActorId) -> Result<Option<Claim>, StoreError>;
    /// Persists `claimed_count` and `status`; the row must be locked by this transaction.
    async fn save_resource(&mut self, resource: &ClaimableResource) -> Result<(), StoreError>;
    async fn insert_claim(&mut self, claim: &Claim) -> Result<(), StoreError>;

    async fn lock_group(&mut self, id: GroupId) -> Result<Option<Group>, StoreError>;
    async fn insert_group(&mut self, group: &Group) -> Result<(), StoreError>;
    async fn save_group(&mut self, group: &Group) -> Result<(), StoreError>;

    /// Locks every address row of `actor`.
    async fn lock_addresses(&mut self, actor: ActorId) -> Result<Vec<Address>, StoreError>;
    async fn save_address(&mut self, address: &Address) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;
    async fn rollback(self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait Ledger: Clone + Send + Sync + 'static {
    type Tx: LedgerTx + 'static;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Active resources that can still issue, oldest first. Coupon rushes whose template
    /// is inactive or out of stock are left out.
    async fn active_resources(&self) -> Result<Vec<ClaimableResource>, StoreError>;
    /// Claims of `actor`, oldest first.
    async fn claims_by_actor(&self, actor: ActorId) -> Result<Vec<Claim>, StoreError>;
    async fn group(&self, id: GroupId) -> Result<Option<Group>, StoreError>;
    /// Groups among `ids`, in no particular order; unknown ids are skipped.
    async fn groups(&self, ids: &[GroupId]) -> Result<Vec<Group>, StoreError>;
    /// Claims of a group in join order.
    async fn group_claims(&self, id: GroupId) -> Result<Vec<Claim>, StoreError>;
}

/// Maps request credentials to a stable actor id.
#[async_trait]
pub trait ActorResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Option<ActorId>, StoreError>;
}
