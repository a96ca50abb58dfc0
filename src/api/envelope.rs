//! Response envelope and error mapping

use axum::extract::rejection::{FormRejection, JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::claims::ClaimFailure;
use crate::ledger::StoreError;

const SUCCESS_CODE: &str = "0";

/// `{status, data, code}`; `data` carries the payload or a readable failure reason.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: bool,
    pub data: T,
    pub code: &'static str,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self { Self { status: true, data, code: SUCCESS_CODE } }
}

impl Envelope<String> {
    pub fn refused(reason: impl Into<String>, code: &'static str) -> Self {
        Self { status: false, data: reason.into(), code }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response { Json(self).into_response() }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("please sign in first")]
    Unauthorized,

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Claim(#[from] ClaimFailure),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let fields: Vec<&str> = errors.field_errors().keys().copied().collect();
        Self::Invalid(format!("invalid fields: {}", fields.join(", ")))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self { Self::Invalid(rejection.body_text()) }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self { Self::Invalid(rejection.body_text()) }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self { Self::Invalid(rejection.body_text()) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, envelope) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, Envelope::refused(ApiError::Unauthorized.to_string(), "UNAUTHORIZED")),
            Self::Invalid(reason) => (StatusCode::OK, Envelope::refused(reason, "INVALID_REQUEST")),
            Self::Claim(failure) if failure.is_business() => (StatusCode::OK, Envelope::refused(failure.to_string(), failure.code())),
            Self::Claim(failure @ ClaimFailure::TransientStoreFailure(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, Envelope::refused(failure.to_string(), failure.code()))
            }
            Self::Claim(failure) => {
                error!(detail = ?failure, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, Envelope::refused(failure.to_string(), failure.code()))
            }
            Self::Store(store) if store.is_transient() => {
                let failure = ClaimFailure::TransientStoreFailure(store.to_string());
                (StatusCode::SERVICE_UNAVAILABLE, Envelope::refused(failure.to_string(), failure.code()))
            }
            Self::Store(store) => {
                error!(error = %store, "store read failed");
                let failure = ClaimFailure::Internal(store.to_string());
                (StatusCode::INTERNAL_SERVER_ERROR, Envelope::refused(failure.to_string(), failure.code()))
            }
        };
        (status, envelope).into_response()
    }
}
