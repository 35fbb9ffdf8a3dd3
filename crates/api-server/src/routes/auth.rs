//! Registration, login and current-user routes.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cb_core::identity::User;
use cb_core::membership::OrgRole;
use cb_core::tenant::Organization;

use crate::auth::issue_user_jwt;
use crate::state::AppState;

use super::{internal_error, map_core_error, require_user, unauthorized, RouteError};

fn token_ttl_hours() -> i64 {
    std::env::var("CB_TOKEN_TTL_HOURS")
        .ok()
        .and_then(|raw| raw.parse::<i64>().ok())
        .filter(|hours| *hours > 0)
        .unwrap_or(24)
}

fn format_expiry(exp: usize) -> String {
    DateTime::<Utc>::from_timestamp(exp as i64, 0)
        .map(|value| value.to_rfc3339())
        .unwrap_or_else(|| Utc::now().to_rfc3339())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    name: String,
    email: String,
    password: String,
    #[serde(default)]
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    token: String,
    expires_at: String,
    user: User,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MembershipSummary {
    organization: Organization,
    role: OrgRole,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    user: User,
    organizations: Vec<MembershipSummary>,
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), RouteError> {
    let user = state
        .identity()
        .register(&req.name, &req.email, &req.password, req.avatar_url)
        .await
        .map_err(map_core_error)?;

    let (token, exp) =
        issue_user_jwt(user.id, &user.email, token_ttl_hours()).map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            expires_at: format_expiry(exp),
            user,
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, RouteError> {
    let user = state
        .identity()
        .authenticate(&req.email, &req.password)
        .await
        .ok_or_else(|| unauthorized("Invalid email or password"))?;

    let (token, exp) =
        issue_user_jwt(user.id, &user.email, token_ttl_hours()).map_err(internal_error)?;

    Ok(Json(AuthResponse {
        token,
        expires_at: format_expiry(exp),
        user,
    }))
}

async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, RouteError> {
    let user = require_user(&state, &headers).await?;

    let memberships = state.ledger().organizations_for_user(user.id).await;
    let ids: Vec<_> = memberships
        .iter()
        .map(|member| member.organization_id)
        .collect();
    let organizations = state.tenants().list_organizations(&ids).await;

    let summaries = organizations
        .into_iter()
        .filter_map(|organization| {
            memberships
                .iter()
                .find(|member| member.organization_id == organization.id)
                .map(|member| MembershipSummary {
                    organization,
                    role: member.role,
                })
        })
        .collect();

    Ok(Json(MeResponse {
        user,
        organizations: summaries,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/auth/register", post(register))
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/me", get(me))
}
