//! HTTP surface

use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::addresses::AddressBook;
use crate::claims::{ArtifactIssuer, ClaimOrchestrator, RetryPolicy};
use crate::clock::Clock;
use crate::groups::GroupTracker;
use crate::ledger::{ActorResolver, Ledger};
use crate::publisher::EventPublisher;

pub mod addresses;
pub mod auth;
pub mod bulk;
pub mod coupons;
pub mod envelope;
pub mod extract;

pub use auth::CurrentActor;
pub use envelope::{ApiError, Envelope};
pub use extract::{Params, Payload};

pub struct AppState<L: Ledger> {
    pub claims: ClaimOrchestrator<L>,
    pub groups: GroupTracker<L>,
    pub addresses: AddressBook<L>,
    pub actors: Arc<dyn ActorResolver>,
    pub coupons: Arc<dyn ArtifactIssuer<L::Tx>>,
    pub orders: Arc<dyn ArtifactIssuer<L::Tx>>,
}

impl<L: Ledger> Clone for AppState<L> {
    fn clone(&self) -> Self {
        Self {
            claims: self.claims.clone(),
            groups: self.groups.clone(),
            addresses: self.addresses.clone(),
            actors: Arc::clone(&self.actors),
            coupons: Arc::clone(&self.coupons),
            orders: Arc::clone(&self.orders),
        }
    }
}

impl<L: Ledger> AppState<L> {
    /// Wires every service over one ledger.
    pub fn new(
        ledger: L,
        actors: Arc<dyn ActorResolver>,
        coupons: Arc<dyn ArtifactIssuer<L::Tx>>,
        orders: Arc<dyn ArtifactIssuer<L::Tx>>,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn EventPublisher>,
        retry: RetryPolicy,
    ) -> Self {
        let claims = ClaimOrchestrator::new(ledger.clone(), Arc::clone(&clock), Arc::clone(&publisher), retry);
        Self {
            groups: GroupTracker::new(claims.clone()),
            addresses: AddressBook::new(ledger, clock, publisher, retry),
            claims,
            actors,
            coupons,
            orders,
        }
    }
}

pub fn router<L: Ledger>(state: AppState<L>) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-storefront"})) }))
        .route("/api/ticket-rush", get(coupons::list::<L>))
        .route("/api/ticket-rush/receive", post(coupons::receive::<L>))
        .route("/api/bulk/create-spell", post(bulk::create_spell::<L>))
        .route("/api/bulk/spell-detail", get(bulk::spell_detail::<L>))
        .route("/api/bulk/spell-order", get(bulk::spell_orders::<L>))
        .route("/api/address/change-default-address", post(addresses::change_default::<L>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
