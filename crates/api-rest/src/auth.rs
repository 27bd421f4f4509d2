use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

/// Header carrying the shared API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header carrying the caller's user identifier.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Validates the provided API key against the key configured at startup.
///
/// Returns `Ok(())` if the key matches, an internal error if no key was configured and
/// `Unauthorized` otherwise.
pub fn validate_api_key(expected_key: Option<&str>, provided_key: &str) -> Result<(), ApiError> {
    let expected_key = expected_key.ok_or(ApiError::Internal("API_KEY not configured"))?;

    if provided_key == expected_key {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("Invalid API key"))
    }
}

/// Middleware rejecting requests without a valid `x-api-key` header.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthorized("Missing x-api-key header"))?;
    validate_api_key(state.api_key.as_deref(), api_key)?;

    Ok(next.run(request).await)
}

/// The caller's user identifier from `x-user-id`.
pub fn caller(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| ApiError::BadRequest("Missing x-user-id header".into()))
}
