//! Caller identity
//!
//! Authentication happens upstream. The gateway forwards the authenticated
//! user id in `x-user-id`; these extractors only parse it.
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// User id for endpoints that need one. Missing header is a 401.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub i64);

/// User id for endpoints that personalise when one is present
#[derive(Debug, Clone, Copy)]
pub struct MaybeUser(pub Option<i64>);

fn parse_user_header(parts: &Parts) -> Result<Option<i64>, AppError> {
    let Some(value) = parts.headers.get(USER_ID_HEADER) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .map(Some)
        .ok_or_else(|| AppError::InvalidInput(format!("{} must be an integer", USER_ID_HEADER)))
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parse_user_header(parts)?
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized("User not authenticated".to_string()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parse_user_header(parts).map(MaybeUser)
    }
}
