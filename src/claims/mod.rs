//! Claim protocol
//!
//! Many callers race to consume a limited resource, at most once per actor. Every
//! attempt runs in one ledger transaction:
//!
//! 1. lock the resource row ([`ResourceCounter::lock_active`])
//! 2. reject actors that already hold a claim ([`IdempotencyGuard`])
//! 3. reserve capacity ([`ResourceCounter::try_reserve`])
//! 4. create the artifact through an [`ArtifactIssuer`] inside the same transaction
//! 5. insert the claim record and commit
//!
//! Any failure rolls the whole transaction back. Transient store failures (lock
//! timeouts, deadlock victims, serialization failures) are retried from the top.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::domain::value_objects::{AddressId, ArtifactId, GroupId, Quantity};
use crate::ledger::StoreError;

pub mod artifacts;
pub mod counter;
pub mod guard;
pub mod orchestrator;

pub use artifacts::{ArtifactError, ArtifactIssuer, ArtifactRequest, MemoryCouponIssuer, MemoryOrderCreator, PgCouponIssuer, PgOrderCreator};
pub use counter::{Reservation, ResourceCounter};
pub use guard::IdempotencyGuard;
pub use orchestrator::{ClaimOrchestrator, ClaimResult};

/// Typed outcome of a failed claim. Nothing else escapes the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimFailure {
    #[error("the requested item does not exist or is no longer available")]
    NotFound,

    #[error("you have already claimed this item")]
    AlreadyClaimed,

    #[error("sorry, this item has run out")]
    Exhausted,

    #[error("this group is no longer accepting participants")]
    GroupUnavailable,

    #[error("{0}")]
    Rejected(String),

    #[error("the service is busy, please try again")]
    TransientStoreFailure(String),

    #[error("internal error")]
    Internal(String),
}

impl ClaimFailure {
    /// Stable machine-readable code for API envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyClaimed => "ALREADY_CLAIMED",
            Self::Exhausted => "EXHAUSTED",
            Self::GroupUnavailable => "GROUP_UNAVAILABLE",
            Self::Rejected(_) => "REJECTED",
            Self::TransientStoreFailure(_) => "TRANSIENT_STORE_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Expected business outcome as opposed to a fault.
    pub fn is_business(&self) -> bool {
        !matches!(self, Self::TransientStoreFailure(_) | Self::Internal(_))
    }
}

/// Why a transaction was abandoned, before retry policy is applied.
#[derive(Debug)]
pub(crate) enum Abort {
    Failure(ClaimFailure),
    Store(StoreError),
}

impl Abort {
    fn into_failure(self) -> ClaimFailure {
        match self {
            Self::Failure(failure) => failure,
            // the (resource, actor) constraint caught a race the guard could not see
            Self::Store(StoreError::UniqueViolation(_)) => ClaimFailure::AlreadyClaimed,
            Self::Store(error) if error.is_transient() => ClaimFailure::TransientStoreFailure(error.to_string()),
            Self::Store(error) => ClaimFailure::Internal(error.to_string()),
        }
    }
}

impl From<ClaimFailure> for Abort {
    fn from(failure: ClaimFailure) -> Self { Self::Failure(failure) }
}

impl From<StoreError> for Abort {
    fn from(error: StoreError) -> Self { Self::Store(error) }
}

impl From<ArtifactError> for Abort {
    fn from(error: ArtifactError) -> Self {
        match error {
            ArtifactError::Exhausted => Self::Failure(ClaimFailure::Exhausted),
            ArtifactError::Rejected(reason) => Self::Failure(ClaimFailure::Rejected(reason)),
            ArtifactError::Store(error) => Self::Store(error),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Multiplied by the attempt number before each retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self { max_attempts: 3, backoff: Duration::from_millis(50) } }
}

impl RetryPolicy {
    pub fn no_retry() -> Self { Self { max_attempts: 1, backoff: Duration::ZERO } }
}

pub(crate) async fn with_retry<T, F, Fut>(policy: RetryPolicy, operation: &'static str, mut attempt: F) -> Result<T, ClaimFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Abort>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(Abort::Store(error)) if error.is_transient() && tries < policy.max_attempts.max(1) => {
                warn!(operation, attempt = tries, %error, "transient store failure, retrying");
                tokio::time::sleep(policy.backoff * tries).await;
            }
            Err(abort) => return Err(abort.into_failure()),
        }
    }
}

/// Order parameters for the group-buy order collaborator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub address_id: Option<AddressId>,
    pub pay_type: i32,
    pub delivery_type: i32,
    pub invoice_type: i32,
    pub invoice_title: String,
    pub invoice_content: String,
    pub message: String,
    /// Coupon instance to redeem against this order
    pub coupon_id: Option<ArtifactId>,
}

/// Extra inputs carried through one claim.
#[derive(Clone, Debug, Default)]
pub struct ClaimContext {
    pub quantity: Quantity,
    pub group: Option<GroupId>,
    pub order: Option<OrderDetails>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { max_attempts: 3, backoff: Duration::ZERO };
        let result: Result<(), _> = with_retry(policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Abort::Store(StoreError::LockTimeout))
        })
        .await;
        assert!(matches!(result, Err(ClaimFailure::TransientStoreFailure(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_business_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(RetryPolicy::default(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Abort::Failure(ClaimFailure::Exhausted))
        })
        .await;
        assert_eq!(result, Err(ClaimFailure::Exhausted));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unique_violation_reads_as_already_claimed() {
        let failure = Abort::Store(StoreError::UniqueViolation("claims_one_per_actor".into())).into_failure();
        assert_eq!(failure, ClaimFailure::AlreadyClaimed);
        assert!(failure.is_business());
        assert!(!ClaimFailure::Internal("x".into()).is_business());
    }

    #[test]
    fn test_artifact_errors_map_to_claim_failures() {
        assert_eq!(Abort::from(ArtifactError::Exhausted).into_failure(), ClaimFailure::Exhausted);
        assert_eq!(
            Abort::from(ArtifactError::Rejected("coupon cannot be used".into())).into_failure(),
            ClaimFailure::Rejected("coupon cannot be used".into())
        );
        assert!(matches!(
            Abort::from(ArtifactError::Store(StoreError::LockTimeout)).into_failure(),
            ClaimFailure::TransientStoreFailure(_)
        ));
    }
}
