//! Tenant persistent store
//!
//! Organizations and workspaces share one snapshot file and one lock so
//! checks that span both (slug uniqueness, delete-while-workspaces-exist)
//! are atomic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Error;
use crate::Result;

use super::model::{
    normalize_slug, CreateOrganizationRequest, CreateWorkspaceRequest, Organization,
    UpdateOrganizationRequest, UpdateWorkspaceRequest, Workspace,
};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct TenantState {
    organizations: HashMap<Uuid, Organization>,
    workspaces: HashMap<Uuid, Workspace>,
}

#[derive(Clone)]
pub struct TenantStore {
    state: Arc<RwLock<TenantState>>,
    file_path: PathBuf,
}

impl TenantStore {
    pub async fn new(file_path: PathBuf) -> Result<Self> {
        let state = if file_path.exists() {
            let content = tokio::fs::read_to_string(&file_path)
                .await
                .map_err(|e| Error::Storage(format!("Failed to read tenants file: {}", e)))?;
            serde_json::from_str(&content)
                .map_err(|e| Error::Storage(format!("Failed to parse tenants file: {}", e)))?
        } else {
            TenantState::default()
        };

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            file_path,
        })
    }

    pub async fn create_organization(
        &self,
        owner_id: Uuid,
        request: CreateOrganizationRequest,
    ) -> Result<Organization> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput(
                "Organization name cannot be empty".to_string(),
            ));
        }

        let mut organization = Organization::new(name, owner_id);
        if let Some(slug) = request.slug {
            let normalized = normalize_slug(&slug).ok_or_else(|| {
                Error::InvalidInput("Organization slug cannot be empty".to_string())
            })?;
            organization = organization.with_slug(normalized);
        }
        organization.description = trim_to_none(request.description);
        organization.logo_url = trim_to_none(request.logo_url);
        organization.website_url = trim_to_none(request.website_url);

        let mut state = self.state.write().await;
        if state
            .organizations
            .values()
            .any(|existing| existing.slug == organization.slug)
        {
            return Err(Error::Conflict(format!(
                "Organization slug '{}' already exists",
                organization.slug
            )));
        }

        let mut next = state.clone();
        next.organizations
            .insert(organization.id, organization.clone());

        self.persist_snapshot(&next).await?;
        *state = next;
        Ok(organization)
    }

    /// Soft-deleted organizations are treated as absent.
    pub async fn get_organization(&self, id: Uuid) -> Option<Organization> {
        let state = self.state.read().await;
        state
            .organizations
            .get(&id)
            .filter(|org| !org.is_deleted())
            .cloned()
    }

    pub async fn list_organizations(&self, ids: &[Uuid]) -> Vec<Organization> {
        let state = self.state.read().await;
        let mut organizations: Vec<_> = ids
            .iter()
            .filter_map(|id| state.organizations.get(id))
            .filter(|org| !org.is_deleted())
            .cloned()
            .collect();
        organizations.sort_by(|a, b| a.slug.cmp(&b.slug));
        organizations
    }

    pub async fn update_organization(
        &self,
        id: Uuid,
        request: UpdateOrganizationRequest,
    ) -> Result<Organization> {
        let mut state = self.state.write().await;
        let organization = state
            .organizations
            .get(&id)
            .filter(|org| !org.is_deleted())
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Organization {} not found", id)))?;

        let mut updated = organization;
        if let Some(name) = request.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(Error::InvalidInput(
                    "Organization name cannot be empty".to_string(),
                ));
            }
            updated.name = name;
        }
        if let Some(description) = request.description {
            updated.description = trim_to_none(Some(description));
        }
        if let Some(logo_url) = request.logo_url {
            updated.logo_url = trim_to_none(Some(logo_url));
        }
        if let Some(website_url) = request.website_url {
            updated.website_url = trim_to_none(Some(website_url));
        }
        updated.updated_at = chrono::Utc::now();

        let mut next = state.clone();
        next.organizations.insert(updated.id, updated.clone());

        self.persist_snapshot(&next).await?;
        *state = next;
        Ok(updated)
    }

    /// Marks the organization deleted. Refused while any workspace still
    /// belongs to it.
    pub async fn soft_delete_organization(&self, id: Uuid) -> Result<Organization> {
        let mut state = self.state.write().await;
        let organization = state
            .organizations
            .get(&id)
            .filter(|org| !org.is_deleted())
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Organization {} not found", id)))?;

        if state
            .workspaces
            .values()
            .any(|workspace| workspace.organization_id == id)
        {
            return Err(Error::Conflict(
                "Organization still has workspaces".to_string(),
            ));
        }

        let mut updated = organization;
        let now = chrono::Utc::now();
        updated.deleted_at = Some(now);
        updated.updated_at = now;

        let mut next = state.clone();
        next.organizations.insert(updated.id, updated.clone());

        self.persist_snapshot(&next).await?;
        *state = next;
        Ok(updated)
    }

    pub async fn create_workspace(
        &self,
        organization_id: Uuid,
        request: CreateWorkspaceRequest,
    ) -> Result<Workspace> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput(
                "Workspace name cannot be empty".to_string(),
            ));
        }

        let mut workspace = Workspace::new(organization_id, name);
        if let Some(slug) = request.slug {
            let normalized = normalize_slug(&slug)
                .ok_or_else(|| Error::InvalidInput("Workspace slug cannot be empty".to_string()))?;
            workspace = workspace.with_slug(normalized);
        }
        workspace.description = trim_to_none(request.description);
        workspace.icon_url = trim_to_none(request.icon_url);

        let mut state = self.state.write().await;
        if !state
            .organizations
            .get(&organization_id)
            .map(|org| !org.is_deleted())
            .unwrap_or(false)
        {
            return Err(Error::NotFound(format!(
                "Organization {} not found",
                organization_id
            )));
        }
        if state.workspaces.values().any(|existing| {
            existing.organization_id == organization_id && existing.slug == workspace.slug
        }) {
            return Err(Error::Conflict(format!(
                "Workspace slug '{}' already exists in organization",
                workspace.slug
            )));
        }

        let mut next = state.clone();
        next.workspaces.insert(workspace.id, workspace.clone());

        self.persist_snapshot(&next).await?;
        *state = next;
        Ok(workspace)
    }

    pub async fn get_workspace(&self, id: Uuid) -> Option<Workspace> {
        let state = self.state.read().await;
        state.workspaces.get(&id).cloned()
    }

    pub async fn list_workspaces(&self, organization_id: Uuid) -> Vec<Workspace> {
        let state = self.state.read().await;
        let mut workspaces: Vec<_> = state
            .workspaces
            .values()
            .filter(|workspace| workspace.organization_id == organization_id)
            .cloned()
            .collect();
        workspaces.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        workspaces
    }

    pub async fn update_workspace(
        &self,
        id: Uuid,
        request: UpdateWorkspaceRequest,
    ) -> Result<Workspace> {
        let mut state = self.state.write().await;
        let workspace = state
            .workspaces
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Workspace {} not found", id)))?;

        let mut updated = workspace;
        if let Some(name) = request.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(Error::InvalidInput(
                    "Workspace name cannot be empty".to_string(),
                ));
            }
            updated.name = name;
        }
        if let Some(description) = request.description {
            updated.description = trim_to_none(Some(description));
        }
        if let Some(icon_url) = request.icon_url {
            updated.icon_url = trim_to_none(Some(icon_url));
        }
        updated.updated_at = chrono::Utc::now();

        let mut next = state.clone();
        next.workspaces.insert(updated.id, updated.clone());

        self.persist_snapshot(&next).await?;
        *state = next;
        Ok(updated)
    }

    pub async fn delete_workspace(&self, id: Uuid) -> Result<Option<Workspace>> {
        let mut state = self.state.write().await;
        let Some(removed) = state.workspaces.get(&id).cloned() else {
            return Ok(None);
        };

        let mut next = state.clone();
        next.workspaces.remove(&id);

        self.persist_snapshot(&next).await?;
        *state = next;
        Ok(Some(removed))
    }

    async fn persist_snapshot(&self, state: &TenantState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| Error::Storage(format!("Failed to serialize tenants: {}", e)))?;

        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let parent = self.file_path.parent().unwrap_or_else(|| Path::new("."));
        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4().as_hyphenated()));

        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write temp tenants file: {}", e)))?;

        if let Err(err) = tokio::fs::rename(&temp_path, &self.file_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(Error::Storage(format!(
                "Failed to finalize tenants write: {}",
                err
            )));
        }

        Ok(())
    }
}

fn trim_to_none(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}
