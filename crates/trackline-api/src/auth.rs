//! Caller identity.
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! user id in the `x-user-id` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use trackline_core::AppError;
use uuid::Uuid;

use crate::error::HttpAppError;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub Uuid);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = HttpAppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized(format!("Missing {} header", USER_ID_HEADER)))?;

        raw.to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(CallerId)
            .ok_or_else(|| {
                HttpAppError(AppError::Unauthorized(format!(
                    "Malformed {} header",
                    USER_ID_HEADER
                )))
            })
    }
}
