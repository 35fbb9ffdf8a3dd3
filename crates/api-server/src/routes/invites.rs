//! Invite routes for organizations and workspaces.
//!
//! Preview is token-gated but otherwise unauthenticated; everything else
//! resolves the acting user from the bearer token.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cb_core::invite::{CreatedInvite, InvitePreview, InviteSummary, WorkspaceAcceptance};
use cb_core::membership::{OrgRole, OrganizationMember, WorkspaceRole};

use crate::state::AppState;

use super::{map_core_error, request_context, require_user, RouteError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrgInviteRequest {
    email: String,
    role: OrgRole,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWorkspaceInviteRequest {
    email: String,
    role: WorkspaceRole,
}

#[derive(Debug, Deserialize)]
struct PreviewQuery {
    token: String,
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeclineResponse {
    ok: bool,
    invite: InviteSummary,
}

async fn create_org_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<Uuid>,
    Json(req): Json<CreateOrgInviteRequest>,
) -> Result<(StatusCode, Json<CreatedInvite>), RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    let created = state
        .invites()
        .create_organization_invite(user.id, org_id, &req.email, req.role, &context)
        .await
        .map_err(map_core_error)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_org_invites(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Vec<InviteSummary>>, RouteError> {
    let user = require_user(&state, &headers).await?;
    let invites = state
        .invites()
        .list_organization_invites(user.id, org_id)
        .await
        .map_err(map_core_error)?;
    Ok(Json(invites))
}

async fn preview_org_invite(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<InvitePreview>, RouteError> {
    let preview = state
        .invites()
        .preview_organization_invite(org_id, &query.token)
        .await
        .map_err(map_core_error)?;
    Ok(Json(preview))
}

async fn accept_org_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<Uuid>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<OrganizationMember>, RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    let member = state
        .invites()
        .accept_organization_invite(user.id, org_id, &req.token, &context)
        .await
        .map_err(map_core_error)?;
    Ok(Json(member))
}

async fn decline_org_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<Uuid>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<DeclineResponse>, RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    let invite = state
        .invites()
        .decline_organization_invite(user.id, org_id, &req.token, &context)
        .await
        .map_err(map_core_error)?;
    Ok(Json(DeclineResponse { ok: true, invite }))
}

async fn revoke_org_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, invite_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<InviteSummary>, RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    let invite = state
        .invites()
        .revoke_organization_invite(user.id, org_id, invite_id, &context)
        .await
        .map_err(map_core_error)?;
    Ok(Json(invite))
}

async fn resend_org_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, invite_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CreatedInvite>, RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    let created = state
        .invites()
        .resend_organization_invite(user.id, org_id, invite_id, &context)
        .await
        .map_err(map_core_error)?;
    Ok(Json(created))
}

async fn create_workspace_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<CreateWorkspaceInviteRequest>,
) -> Result<(StatusCode, Json<CreatedInvite>), RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    let created = state
        .invites()
        .create_workspace_invite(user.id, workspace_id, &req.email, req.role, &context)
        .await
        .map_err(map_core_error)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_workspace_invites(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<Vec<InviteSummary>>, RouteError> {
    let user = require_user(&state, &headers).await?;
    let invites = state
        .invites()
        .list_workspace_invites(user.id, workspace_id)
        .await
        .map_err(map_core_error)?;
    Ok(Json(invites))
}

async fn preview_workspace_invite(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<InvitePreview>, RouteError> {
    let preview = state
        .invites()
        .preview_workspace_invite(workspace_id, &query.token)
        .await
        .map_err(map_core_error)?;
    Ok(Json(preview))
}

async fn accept_workspace_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<WorkspaceAcceptance>, RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    let acceptance = state
        .invites()
        .accept_workspace_invite(user.id, workspace_id, &req.token, &context)
        .await
        .map_err(map_core_error)?;
    Ok(Json(acceptance))
}

async fn decline_workspace_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<DeclineResponse>, RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    let invite = state
        .invites()
        .decline_workspace_invite(user.id, workspace_id, &req.token, &context)
        .await
        .map_err(map_core_error)?;
    Ok(Json(DeclineResponse { ok: true, invite }))
}

async fn revoke_workspace_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((workspace_id, invite_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<InviteSummary>, RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    let invite = state
        .invites()
        .revoke_workspace_invite(user.id, workspace_id, invite_id, &context)
        .await
        .map_err(map_core_error)?;
    Ok(Json(invite))
}

async fn resend_workspace_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((workspace_id, invite_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CreatedInvite>, RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    let created = state
        .invites()
        .resend_workspace_invite(user.id, workspace_id, invite_id, &context)
        .await
        .map_err(map_core_error)?;
    Ok(Json(created))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/orgs/{org_id}/invites",
            get(list_org_invites).post(create_org_invite),
        )
        .route(
            "/api/v1/orgs/{org_id}/invites/preview",
            get(preview_org_invite),
        )
        .route("/api/v1/orgs/{org_id}/invites/accept", post(accept_org_invite))
        .route(
            "/api/v1/orgs/{org_id}/invites/decline",
            post(decline_org_invite),
        )
        .route(
            "/api/v1/orgs/{org_id}/invites/{invite_id}",
            delete(revoke_org_invite),
        )
        .route(
            "/api/v1/orgs/{org_id}/invites/{invite_id}/resend",
            post(resend_org_invite),
        )
        .route(
            "/api/v1/workspaces/{workspace_id}/invites",
            get(list_workspace_invites).post(create_workspace_invite),
        )
        .route(
            "/api/v1/workspaces/{workspace_id}/invites/preview",
            get(preview_workspace_invite),
        )
        .route(
            "/api/v1/workspaces/{workspace_id}/invites/accept",
            post(accept_workspace_invite),
        )
        .route(
            "/api/v1/workspaces/{workspace_id}/invites/decline",
            post(decline_workspace_invite),
        )
        .route(
            "/api/v1/workspaces/{workspace_id}/invites/{invite_id}",
            delete(revoke_workspace_invite),
        )
        .route(
            "/api/v1/workspaces/{workspace_id}/invites/{invite_id}/resend",
            post(resend_workspace_invite),
        )
}
