//! Audit-log read routes.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cb_core::audit::{AuditAction, AuditEvent, AuditListQuery};
use cb_core::authz::Action;

use crate::state::AppState;

use super::{map_core_error, require_user, RouteError};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuditLogQuery {
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    entity_type: Option<String>,
    #[serde(default)]
    entity_id: Option<String>,
    #[serde(default)]
    user_id: Option<Uuid>,
    #[serde(default)]
    from: Option<DateTime<Utc>>,
    #[serde(default)]
    to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditLogResponse {
    items: Vec<AuditEvent>,
    has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_offset: Option<usize>,
}

fn to_core_query(query: AuditLogQuery) -> Result<AuditListQuery, RouteError> {
    let action = query
        .action
        .as_deref()
        .map(str::parse::<AuditAction>)
        .transpose()
        .map_err(map_core_error)?;

    Ok(AuditListQuery {
        organization_id: None,
        workspace_id: None,
        action,
        entity_type: query.entity_type,
        entity_id: query.entity_id,
        user_id: query.user_id,
        from: query.from,
        to: query.to,
        offset: query.offset,
        limit: query.limit,
    })
}

fn to_response(offset: usize, items: Vec<AuditEvent>, has_more: bool) -> AuditLogResponse {
    let next_offset = has_more.then(|| offset + items.len());
    AuditLogResponse {
        items,
        has_more,
        next_offset,
    }
}

async fn org_audit_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<Uuid>,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<AuditLogResponse>, RouteError> {
    let user = require_user(&state, &headers).await?;
    state
        .authority()
        .require(user.id, &Action::ViewOrganizationAuditLog { organization_id: org_id })
        .await
        .map_err(map_core_error)?;

    let offset = query.offset.unwrap_or(0);
    let mut core_query = to_core_query(query)?;
    core_query.organization_id = Some(org_id);

    let (items, has_more) = state.audit().list_paginated(&core_query).await;
    Ok(Json(to_response(offset, items, has_more)))
}

async fn workspace_audit_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<Uuid>,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<AuditLogResponse>, RouteError> {
    let user = require_user(&state, &headers).await?;
    state
        .authority()
        .require(user.id, &Action::ViewWorkspaceAuditLog { workspace_id })
        .await
        .map_err(map_core_error)?;

    let offset = query.offset.unwrap_or(0);
    let mut core_query = to_core_query(query)?;
    core_query.workspace_id = Some(workspace_id);

    let (items, has_more) = state.audit().list_paginated(&core_query).await;
    Ok(Json(to_response(offset, items, has_more)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/orgs/{org_id}/audit-logs", get(org_audit_logs))
        .route(
            "/api/v1/workspaces/{workspace_id}/audit-logs",
            get(workspace_audit_logs),
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
            .merge(crate::routes::invites::router())
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
                        json!({ "name": "User", "email": email, "password": "verysecurepw" })
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

    #[tokio::test]
    async fn org_mutations_show_up_scoped_and_filtered() {
        let (app, _tmp) = build_app().await;
        let token = register(&app, "owner@example.com").await;

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
        let org_id = payload["organization"]["id"].as_str().unwrap();

        // Add an invite so two distinct actions exist.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/orgs/{}/invites", org_id))
                    .header("Authorization", format!("Bearer {}", token))
                    .header("Content-Type", "application/json")
                    .body(Body::from(
                        json!({ "email": "bob@example.com", "role": "member" }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(format!("/api/v1/orgs/{}/audit-logs", org_id))
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        let items = payload["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        // Newest first.
        assert_eq!(items[0]["action"], "ORGANIZATION_INVITE_CREATE");
        assert_eq!(items[1]["action"], "ORGANIZATION_CREATE");

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(format!(
                        "/api/v1/orgs/{}/audit-logs?action=ORGANIZATION_CREATE",
                        org_id
                    ))
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn audit_log_requires_admin_standing() {
        let (app, _tmp) = build_app().await;
        let owner_token = register(&app, "owner@example.com").await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/orgs")
                    .header("Authorization", format!("Bearer {}", owner_token))
                    .header("Content-Type", "application/json")
                    .body(Body::from(json!({ "name": "Acme" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        let org_id = payload["organization"]["id"].as_str().unwrap();

        let other_token = register(&app, "other@example.com").await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(format!("/api/v1/orgs/{}/audit-logs", org_id))
                    .header("Authorization", format!("Bearer {}", other_token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
