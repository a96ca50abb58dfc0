//! Actor resolution from request credentials

use axum::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::Deserialize;

use super::envelope::ApiError;
use super::AppState;
use crate::domain::value_objects::ActorId;
use crate::ledger::Ledger;

/// The signed-in actor. Rejects with 401 when the token is missing or unknown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CurrentActor(pub ActorId);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// `?token=` wins over `Authorization: Bearer`.
fn token(parts: &Parts) -> Option<String> {
    let from_query = Query::<TokenQuery>::try_from_uri(&parts.uri).ok().and_then(|q| q.0.token);
    from_query
        .or_else(|| {
            let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
            header.strip_prefix("Bearer ").map(str::to_owned)
        })
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl<L: Ledger> FromRequestParts<AppState<L>> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState<L>) -> Result<Self, Self::Rejection> {
        let token = token(parts).ok_or(ApiError::Unauthorized)?;
        let actor = state.actors.resolve(&token).await?.ok_or(ApiError::Unauthorized)?;
        Ok(Self(actor))
    }
}
