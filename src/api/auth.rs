use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::ledger::models::UserId;

/// Header carrying the caller's id, set by the authenticating gateway in
/// front of this service.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity; rejects the request with 401 when absent or malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .map(|id| AuthenticatedUser(UserId(id)))
            .ok_or(AppError::Unauthorized)
    }
}
