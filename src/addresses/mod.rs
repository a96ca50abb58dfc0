//! Address book
//!
//! Keeps exactly one default address per actor. The switch locks the whole book and is
//! applied in one transaction, so a failure part-way leaves the previous default intact.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::claims::orchestrator::{finish, log_failure};
use crate::claims::{with_retry, Abort, ClaimFailure, RetryPolicy};
use crate::clock::Clock;
use crate::domain::aggregates::promote_default;
use crate::domain::events::{AddressEvent, DomainEvent};
use crate::domain::value_objects::{ActorId, AddressId};
use crate::ledger::{Ledger, LedgerTx};
use crate::publisher::{publish_all, EventPublisher};

pub struct AddressBook<L: Ledger> {
    ledger: L,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn EventPublisher>,
    retry: RetryPolicy,
}

impl<L: Ledger> Clone for AddressBook<L> {
    fn clone(&self) -> Self {
        Self { ledger: self.ledger.clone(), clock: Arc::clone(&self.clock), publisher: Arc::clone(&self.publisher), retry: self.retry }
    }
}

impl<L: Ledger> AddressBook<L> {
    pub fn new(ledger: L, clock: Arc<dyn Clock>, publisher: Arc<dyn EventPublisher>, retry: RetryPolicy) -> Self {
        Self { ledger, clock, publisher, retry }
    }

    /// Makes `address` the actor's only default. `NotFound` unless the actor owns it.
    #[instrument(skip(self))]
    pub async fn set_default(&self, actor: ActorId, address: AddressId) -> Result<(), ClaimFailure> {
        let changed = with_retry(self.retry, "set_default", move || async move {
            let mut tx = self.ledger.begin().await?;
            let staged = async {
                let mut book = tx.lock_addresses(actor).await?;
                let changed = promote_default(&mut book, address, self.clock.now()).ok_or(ClaimFailure::NotFound)?;
                for row in &changed {
                    tx.save_address(row).await?;
                }
                Ok::<_, Abort>(!changed.is_empty())
            }
            .await;
            finish(tx, staged).await
        })
        .await
        .inspect_err(log_failure)?;

        if changed {
            info!("default address changed");
            let event = DomainEvent::Address(AddressEvent::DefaultChanged { actor_id: actor, address_id: address });
            publish_all(self.publisher.as_ref(), vec![event]).await;
        }
        Ok(())
    }
}
