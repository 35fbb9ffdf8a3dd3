//! Membership ledger persistent store
//!
//! Organization and workspace rows live in one snapshot behind one write
//! lock; that lock is the transactional boundary for every invariant the
//! ledger enforces:
//! - (organization, user) and (workspace, user) pairs are unique,
//! - exactly one owner row per organization,
//! - a workspace row requires a matching organization row, and removing an
//!   organization member removes their workspace rows in the same mutation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Error;
use crate::Result;

use super::model::{OrgRole, OrganizationMember, WorkspaceMember, WorkspaceRole};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct LedgerState {
    organization_members: HashMap<Uuid, OrganizationMember>,
    workspace_members: HashMap<Uuid, WorkspaceMember>,
}

impl LedgerState {
    fn organization_member(&self, organization_id: Uuid, user_id: Uuid) -> Option<&OrganizationMember> {
        self.organization_members
            .values()
            .find(|member| member.organization_id == organization_id && member.user_id == user_id)
    }

    fn workspace_member(&self, workspace_id: Uuid, user_id: Uuid) -> Option<&WorkspaceMember> {
        self.workspace_members
            .values()
            .find(|member| member.workspace_id == workspace_id && member.user_id == user_id)
    }
}

#[derive(Clone)]
pub struct MembershipLedger {
    state: Arc<RwLock<LedgerState>>,
    file_path: PathBuf,
}

impl MembershipLedger {
    pub async fn new(file_path: PathBuf) -> Result<Self> {
        let state = if file_path.exists() {
            let content = tokio::fs::read_to_string(&file_path)
                .await
                .map_err(|e| Error::Storage(format!("Failed to read memberships file: {}", e)))?;
            serde_json::from_str(&content)
                .map_err(|e| Error::Storage(format!("Failed to parse memberships file: {}", e)))?
        } else {
            LedgerState::default()
        };

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            file_path,
        })
    }

    pub async fn add_organization_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role: OrgRole,
    ) -> Result<OrganizationMember> {
        let mut state = self.state.write().await;
        if state.organization_member(organization_id, user_id).is_some() {
            return Err(Error::DuplicateMembership(format!(
                "User {} is already a member of organization {}",
                user_id, organization_id
            )));
        }
        if role == OrgRole::Owner
            && state
                .organization_members
                .values()
                .any(|member| member.organization_id == organization_id && member.role == OrgRole::Owner)
        {
            return Err(Error::Conflict(
                "Organization already has an owner".to_string(),
            ));
        }

        let member = OrganizationMember {
            id: Uuid::new_v4(),
            organization_id,
            user_id,
            role,
            joined_at: Utc::now(),
        };

        let mut next = state.clone();
        next.organization_members.insert(member.id, member.clone());

        self.persist_snapshot(&next).await?;
        *state = next;
        Ok(member)
    }

    /// Removes the member and, in the same mutation, every workspace row
    /// they hold in that organization. The owner cannot be removed.
    pub async fn remove_organization_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<OrganizationMember> {
        let mut state = self.state.write().await;
        let member = state
            .organization_member(organization_id, user_id)
            .cloned()
            .ok_or_else(|| {
                Error::NotAMember(format!(
                    "User {} is not a member of organization {}",
                    user_id, organization_id
                ))
            })?;
        if member.role == OrgRole::Owner {
            return Err(Error::CannotModifyOwner);
        }

        let mut next = state.clone();
        next.organization_members.remove(&member.id);
        next.workspace_members.retain(|_, workspace_member| {
            !(workspace_member.organization_id == organization_id
                && workspace_member.user_id == user_id)
        });

        self.persist_snapshot(&next).await?;
        *state = next;
        Ok(member)
    }

    /// Role changes never touch the owner row and never mint a new owner;
    /// ownership moves only through [`transfer_ownership`].
    ///
    /// [`transfer_ownership`]: MembershipLedger::transfer_ownership
    pub async fn update_organization_member_role(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role: OrgRole,
    ) -> Result<OrganizationMember> {
        if role == OrgRole::Owner {
            return Err(Error::CannotModifyOwner);
        }

        let mut state = self.state.write().await;
        let member = state
            .organization_member(organization_id, user_id)
            .cloned()
            .ok_or_else(|| {
                Error::NotAMember(format!(
                    "User {} is not a member of organization {}",
                    user_id, organization_id
                ))
            })?;
        if member.role == OrgRole::Owner {
            return Err(Error::CannotModifyOwner);
        }

        let mut updated = member;
        updated.role = role;

        let mut next = state.clone();
        next.organization_members.insert(updated.id, updated.clone());

        self.persist_snapshot(&next).await?;
        *state = next;
        Ok(updated)
    }

    /// Atomic ownership swap: the current owner becomes admin, the target
    /// (already a member) becomes owner. Exactly one owner row exists
    /// before and after.
    pub async fn transfer_ownership(
        &self,
        organization_id: Uuid,
        from_user_id: Uuid,
        to_user_id: Uuid,
    ) -> Result<(OrganizationMember, OrganizationMember)> {
        if from_user_id == to_user_id {
            return Err(Error::InvalidInput(
                "Cannot transfer ownership to the current owner".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        let current = state
            .organization_member(organization_id, from_user_id)
            .cloned()
            .ok_or_else(|| {
                Error::NotAMember(format!(
                    "User {} is not a member of organization {}",
                    from_user_id, organization_id
                ))
            })?;
        if current.role != OrgRole::Owner {
            return Err(Error::InsufficientRole(
                "Only the owner can transfer ownership".to_string(),
            ));
        }
        let target = state
            .organization_member(organization_id, to_user_id)
            .cloned()
            .ok_or_else(|| {
                Error::NotAMember(format!(
                    "User {} is not a member of organization {}",
                    to_user_id, organization_id
                ))
            })?;

        let mut demoted = current;
        demoted.role = OrgRole::Admin;
        let mut promoted = target;
        promoted.role = OrgRole::Owner;

        let mut next = state.clone();
        next.organization_members.insert(demoted.id, demoted.clone());
        next.organization_members
            .insert(promoted.id, promoted.clone());

        self.persist_snapshot(&next).await?;
        *state = next;
        Ok((promoted, demoted))
    }

    pub async fn add_workspace_member(
        &self,
        workspace_id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<WorkspaceMember> {
        let mut state = self.state.write().await;
        if state.organization_member(organization_id, user_id).is_none() {
            return Err(Error::NotAMember(format!(
                "User {} is not a member of organization {}",
                user_id, organization_id
            )));
        }
        if state.workspace_member(workspace_id, user_id).is_some() {
            return Err(Error::DuplicateMembership(format!(
                "User {} is already a member of workspace {}",
                user_id, workspace_id
            )));
        }

        let member = WorkspaceMember {
            id: Uuid::new_v4(),
            workspace_id,
            organization_id,
            user_id,
            role,
            joined_at: Utc::now(),
        };

        let mut next = state.clone();
        next.workspace_members.insert(member.id, member.clone());

        self.persist_snapshot(&next).await?;
        *state = next;
        Ok(member)
    }

    pub async fn remove_workspace_member(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Result<WorkspaceMember> {
        let mut state = self.state.write().await;
        let member = state
            .workspace_member(workspace_id, user_id)
            .cloned()
            .ok_or_else(|| {
                Error::NotAMember(format!(
                    "User {} is not a member of workspace {}",
                    user_id, workspace_id
                ))
            })?;

        let mut next = state.clone();
        next.workspace_members.remove(&member.id);

        self.persist_snapshot(&next).await?;
        *state = next;
        Ok(member)
    }

    pub async fn update_workspace_member_role(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<WorkspaceMember> {
        let mut state = self.state.write().await;
        let member = state
            .workspace_member(workspace_id, user_id)
            .cloned()
            .ok_or_else(|| {
                Error::NotAMember(format!(
                    "User {} is not a member of workspace {}",
                    user_id, workspace_id
                ))
            })?;

        let mut updated = member;
        updated.role = role;

        let mut next = state.clone();
        next.workspace_members.insert(updated.id, updated.clone());

        self.persist_snapshot(&next).await?;
        *state = next;
        Ok(updated)
    }

    /// Drop every membership row of a workspace, for workspace deletion.
    pub async fn purge_workspace(&self, workspace_id: Uuid) -> Result<usize> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let before = next.workspace_members.len();
        next.workspace_members
            .retain(|_, member| member.workspace_id != workspace_id);
        let removed = before - next.workspace_members.len();
        if removed == 0 {
            return Ok(0);
        }

        self.persist_snapshot(&next).await?;
        *state = next;
        Ok(removed)
    }

    pub async fn organization_role(&self, organization_id: Uuid, user_id: Uuid) -> Option<OrgRole> {
        let state = self.state.read().await;
        state
            .organization_member(organization_id, user_id)
            .map(|member| member.role)
    }

    pub async fn workspace_role(&self, workspace_id: Uuid, user_id: Uuid) -> Option<WorkspaceRole> {
        let state = self.state.read().await;
        state
            .workspace_member(workspace_id, user_id)
            .map(|member| member.role)
    }

    pub async fn get_organization_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Option<OrganizationMember> {
        let state = self.state.read().await;
        state.organization_member(organization_id, user_id).cloned()
    }

    pub async fn get_workspace_member(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Option<WorkspaceMember> {
        let state = self.state.read().await;
        state.workspace_member(workspace_id, user_id).cloned()
    }

    pub async fn list_organization_members(&self, organization_id: Uuid) -> Vec<OrganizationMember> {
        let state = self.state.read().await;
        let mut members: Vec<_> = state
            .organization_members
            .values()
            .filter(|member| member.organization_id == organization_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
        members
    }

    pub async fn list_workspace_members(&self, workspace_id: Uuid) -> Vec<WorkspaceMember> {
        let state = self.state.read().await;
        let mut members: Vec<_> = state
            .workspace_members
            .values()
            .filter(|member| member.workspace_id == workspace_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
        members
    }

    pub async fn organizations_for_user(&self, user_id: Uuid) -> Vec<OrganizationMember> {
        let state = self.state.read().await;
        let mut members: Vec<_> = state
            .organization_members
            .values()
            .filter(|member| member.user_id == user_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
        members
    }

    async fn persist_snapshot(&self, state: &LedgerState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| Error::Storage(format!("Failed to serialize memberships: {}", e)))?;

        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let parent = self.file_path.parent().unwrap_or_else(|| Path::new("."));
        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4().as_hyphenated()));

        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write temp memberships file: {}", e)))?;

        if let Err(err) = tokio::fs::rename(&temp_path, &self.file_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(Error::Storage(format!(
                "Failed to finalize memberships write: {}",
                err
            )));
        }

        Ok(())
    }
}
