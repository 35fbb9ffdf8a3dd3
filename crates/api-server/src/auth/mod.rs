//! Bearer-token authentication for the REST API.

mod jwt;

pub use jwt::{issue_user_jwt, verify_user_jwt, UserClaims};

use axum::http::HeaderMap;
use uuid::Uuid;

/// Identity established from a verified bearer token.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub id: Uuid,
    pub email: String,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

pub fn resolve_user(headers: &HeaderMap) -> Result<AuthedUser, String> {
    let token = bearer_token(headers).ok_or_else(|| "Missing bearer token".to_string())?;
    let claims = verify_user_jwt(token)?;
    let id = Uuid::parse_str(&claims.sub).map_err(|_| "Invalid token subject".to_string())?;
    Ok(AuthedUser {
        id,
        email: claims.email,
    })
}
