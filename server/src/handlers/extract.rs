use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::config::CUSTOMER_ID_HEADER;
use crate::utils::error::AppError;

/// Caller identity, taken from the header the upstream auth layer sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(CUSTOMER_ID_HEADER)
            .ok_or_else(|| AppError::AuthError("missing X-Customer-Id header".to_string()))?;

        raw.to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(CallerId)
            .ok_or_else(|| AppError::AuthError("invalid X-Customer-Id header".to_string()))
    }
}
