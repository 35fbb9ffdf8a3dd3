//! Workspace and workspace-member routes.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use cb_core::audit::{AuditAction, AuditEvent};
use cb_core::authz::Action;
use cb_core::identity::User;
use cb_core::membership::{WorkspaceMember, WorkspaceRole};
use cb_core::tenant::{CreateWorkspaceRequest, UpdateWorkspaceRequest, Workspace};

use crate::state::AppState;

use super::{map_core_error, request_context, require_user, RouteError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MemberWithUser {
    member: WorkspaceMember,
    user: Option<User>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateMemberRoleRequest {
    role: WorkspaceRole,
}

async fn create_workspace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<Uuid>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Result<(StatusCode, Json<Workspace>), RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    state
        .authority()
        .require(user.id, &Action::CreateWorkspace { organization_id: org_id })
        .await
        .map_err(map_core_error)?;

    let workspace = state
        .tenants()
        .create_workspace(org_id, req)
        .await
        .map_err(map_core_error)?;
    state
        .audit()
        .record(
            AuditEvent::new(
                AuditAction::WorkspaceCreate,
                "workspace",
                workspace.id.to_string(),
            )
            .in_organization(org_id)
            .in_workspace(workspace.id)
            .by_user(user.id)
            .with_details(json!({ "name": workspace.name, "slug": workspace.slug }))
            .with_context(&context),
        )
        .await
        .map_err(map_core_error)?;

    Ok((StatusCode::CREATED, Json(workspace)))
}

async fn list_workspaces(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Vec<Workspace>>, RouteError> {
    let user = require_user(&state, &headers).await?;
    state
        .authority()
        .require(user.id, &Action::ViewOrganizationMembers { organization_id: org_id })
        .await
        .map_err(map_core_error)?;

    Ok(Json(state.tenants().list_workspaces(org_id).await))
}

async fn get_workspace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<Workspace>, RouteError> {
    let user = require_user(&state, &headers).await?;
    state
        .authority()
        .require(user.id, &Action::ViewWorkspaceMembers { workspace_id })
        .await
        .map_err(map_core_error)?;

    let workspace = state
        .tenants()
        .get_workspace(workspace_id)
        .await
        .ok_or_else(|| {
            map_core_error(cb_core::Error::NotFound(format!(
                "Workspace {} not found",
                workspace_id
            )))
        })?;
    Ok(Json(workspace))
}

async fn update_workspace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<UpdateWorkspaceRequest>,
) -> Result<Json<Workspace>, RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    state
        .authority()
        .require(user.id, &Action::UpdateWorkspaceProfile { workspace_id })
        .await
        .map_err(map_core_error)?;

    let workspace = state
        .tenants()
        .update_workspace(workspace_id, req)
        .await
        .map_err(map_core_error)?;
    state
        .audit()
        .record(
            AuditEvent::new(
                AuditAction::WorkspaceUpdate,
                "workspace",
                workspace.id.to_string(),
            )
            .in_organization(workspace.organization_id)
            .in_workspace(workspace.id)
            .by_user(user.id)
            .with_details(json!({ "name": workspace.name }))
            .with_context(&context),
        )
        .await
        .map_err(map_core_error)?;

    Ok(Json(workspace))
}

async fn delete_workspace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<Workspace>, RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    state
        .authority()
        .require(user.id, &Action::DeleteWorkspace { workspace_id })
        .await
        .map_err(map_core_error)?;

    let workspace = state
        .tenants()
        .delete_workspace(workspace_id)
        .await
        .map_err(map_core_error)?
        .ok_or_else(|| {
            map_core_error(cb_core::Error::NotFound(format!(
                "Workspace {} not found",
                workspace_id
            )))
        })?;
    state
        .ledger()
        .purge_workspace(workspace_id)
        .await
        .map_err(map_core_error)?;
    state
        .audit()
        .record(
            AuditEvent::new(
                AuditAction::WorkspaceDelete,
                "workspace",
                workspace.id.to_string(),
            )
            .in_organization(workspace.organization_id)
            .in_workspace(workspace.id)
            .by_user(user.id)
            .with_context(&context),
        )
        .await
        .map_err(map_core_error)?;

    Ok(Json(workspace))
}

async fn list_members(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<Vec<MemberWithUser>>, RouteError> {
    let user = require_user(&state, &headers).await?;
    state
        .authority()
        .require(user.id, &Action::ViewWorkspaceMembers { workspace_id })
        .await
        .map_err(map_core_error)?;

    let members = state.ledger().list_workspace_members(workspace_id).await;
    let mut entries = Vec::with_capacity(members.len());
    for member in members {
        let user = state.identity().get(member.user_id).await;
        entries.push(MemberWithUser { member, user });
    }
    Ok(Json(entries))
}

async fn update_member_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((workspace_id, user_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateMemberRoleRequest>,
) -> Result<Json<WorkspaceMember>, RouteError> {
    let actor = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    state
        .authority()
        .require(actor.id, &Action::UpdateWorkspaceMemberRole { workspace_id })
        .await
        .map_err(map_core_error)?;

    let previous = state.ledger().workspace_role(workspace_id, user_id).await;
    let member = state
        .ledger()
        .update_workspace_member_role(workspace_id, user_id, req.role)
        .await
        .map_err(map_core_error)?;
    state
        .audit()
        .record(
            AuditEvent::new(
                AuditAction::WorkspaceMemberRoleUpdate,
                "workspace_member",
                member.id.to_string(),
            )
            .in_organization(member.organization_id)
            .in_workspace(workspace_id)
            .by_user(actor.id)
            .with_details(json!({
                "targetUserId": user_id,
                "previousRole": previous.map(WorkspaceRole::as_str),
                "role": member.role.as_str(),
            }))
            .with_context(&context),
        )
        .await
        .map_err(map_core_error)?;

    Ok(Json(member))
}

async fn remove_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((workspace_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<WorkspaceMember>, RouteError> {
    let actor = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    state
        .authority()
        .require(actor.id, &Action::RemoveWorkspaceMember { workspace_id })
        .await
        .map_err(map_core_error)?;

    let member = state
        .ledger()
        .remove_workspace_member(workspace_id, user_id)
        .await
        .map_err(map_core_error)?;
    state
        .audit()
        .record(
            AuditEvent::new(
                AuditAction::WorkspaceMemberRemove,
                "workspace_member",
                member.id.to_string(),
            )
            .in_organization(member.organization_id)
            .in_workspace(workspace_id)
            .by_user(actor.id)
            .with_details(json!({ "targetUserId": user_id }))
            .with_context(&context),
        )
        .await
        .map_err(map_core_error)?;

    Ok(Json(member))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/orgs/{org_id}/workspaces",
            get(list_workspaces).post(create_workspace),
        )
        .route(
            "/api/v1/workspaces/{workspace_id}",
            get(get_workspace)
                .patch(update_workspace)
                .delete(delete_workspace),
        )
        .route(
            "/api/v1/workspaces/{workspace_id}/members",
            get(list_members),
        )
        .route(
            "/api/v1/workspaces/{workspace_id}/members/{user_id}",
            axum::routing::patch(update_member_role).delete(remove_member),
        )
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::state::AppState;

    async fn build_app() -> (axum::Router, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let state = AppState::new(temp_dir.path().to_path_buf()).await.unwrap();
        let app = super::router()
            .merge(crate::routes::auth::router())
            .merge(crate::routes::orgs::router())
            .with_state(state);
        (app, temp_dir)
    }

    async fn register(app: &axum::Router, email: &str) -> String {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/auth/register")
                    .header("Content-Type", "application/json")
                    .body(Body::from(
                        json!({
                            "name": "User",
                            "email": email,
                            "password": "verysecurepw"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        payload["token"].as_str().unwrap().to_string()
    }

    async fn create_org(app: &axum::Router, token: &str) -> String {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/orgs")
                    .header("Authorization", format!("Bearer {}", token))
                    .header("Content-Type", "application/json")
                    .body(Body::from(json!({ "name": "Acme" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        payload["organization"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn owner_creates_and_reads_workspaces() {
        let (app, _tmp) = build_app().await;
        let token = register(&app, "owner@example.com").await;
        let org_id = create_org(&app, &token).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/orgs/{}/workspaces", org_id))
                    .header("Authorization", format!("Bearer {}", token))
                    .header("Content-Type", "application/json")
                    .body(Body::from(json!({ "name": "Platform" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let workspace: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(workspace["slug"], "platform");

        let workspace_id = workspace["id"].as_str().unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(format!("/api/v1/workspaces/{}", workspace_id))
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn workspace_creation_requires_org_admin() {
        let (app, _tmp) = build_app().await;
        let owner_token = register(&app, "owner@example.com").await;
        let org_id = create_org(&app, &owner_token).await;

        let other_token = register(&app, "other@example.com").await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/orgs/{}/workspaces", org_id))
                    .header("Authorization", format!("Bearer {}", other_token))
                    .header("Content-Type", "application/json")
                    .body(Body::from(json!({ "name": "Platform" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
