//! Address book endpoints

use axum::extract::State;
use serde::Deserialize;
use validator::Validate;

use super::{ApiError, AppState, CurrentActor, Envelope, Payload};
use crate::claims::ClaimFailure;
use crate::domain::value_objects::AddressId;
use crate::ledger::Ledger;

#[derive(Debug, Deserialize, Validate)]
pub struct ChangeDefaultRequest {
    #[validate(length(min = 1, max = 64))]
    pub id: String,
}

pub async fn change_default<L: Ledger>(
    State(state): State<AppState<L>>,
    CurrentActor(actor): CurrentActor,
    Payload(request): Payload<ChangeDefaultRequest>,
) -> Result<Envelope<&'static str>, ApiError> {
    request.validate()?;
    let address: AddressId = request.id.parse().map_err(|_| ClaimFailure::NotFound)?;
    state.addresses.set_default(actor, address).await?;
    Ok(Envelope::ok("default address updated"))
}
