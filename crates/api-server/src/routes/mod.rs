//! Route handlers

pub mod audit;
pub mod auth;
pub mod health;
pub mod invites;
pub mod orgs;
pub mod workspaces;

use axum::{
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;

use cb_core::audit::RequestContext;
use cb_core::identity::User;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

pub type RouteError = (StatusCode, Json<ErrorResponse>);

pub fn map_core_error(err: cb_core::Error) -> RouteError {
    use cb_core::Error;

    let status = match &err {
        Error::NotFound(_) | Error::InvalidToken => StatusCode::NOT_FOUND,
        Error::InviteExpired | Error::InviteRevoked => StatusCode::GONE,
        Error::InviteAlreadyResolved | Error::DuplicateMembership(_) | Error::Conflict(_) => {
            StatusCode::CONFLICT
        }
        Error::EmailMismatch
        | Error::InsufficientRole(_)
        | Error::NotAMember(_)
        | Error::CannotModifyOwner => StatusCode::FORBIDDEN,
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        Error::Io(_) | Error::Serialization(_) | Error::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: err.code().to_string(),
        }),
    )
}

pub fn unauthorized(message: impl Into<String>) -> RouteError {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: message.into(),
            code: "UNAUTHORIZED".to_string(),
        }),
    )
}

pub fn internal_error(message: impl std::fmt::Display) -> RouteError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: message.to_string(),
            code: "STORAGE_ERROR".to_string(),
        }),
    )
}

/// Resolve the acting user from the bearer token, confirming the account
/// still exists.
pub async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<User, RouteError> {
    let authed = crate::auth::resolve_user(headers).map_err(unauthorized)?;
    state
        .identity()
        .get(authed.id)
        .await
        .ok_or_else(|| unauthorized("User not found"))
}

/// Transport metadata forwarded into the audit trail.
pub fn request_context(headers: &HeaderMap) -> RequestContext {
    RequestContext {
        ip_address: headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_string()),
        user_agent: headers
            .get("user-agent")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    }
}
