//! Audit recorder
//!
//! Appends one JSONL line per authorized mutation. Lines are never
//! rewritten or deleted; the read path replays the in-memory tail.

use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::Error;
use crate::Result;

use super::types::{AuditEvent, AuditListQuery, AuditPolicy};

pub struct AuditRecorder {
    events_path: PathBuf,
    events: RwLock<Vec<AuditEvent>>,
    policy: AuditPolicy,
}

impl AuditRecorder {
    pub async fn new(root_dir: PathBuf, policy: AuditPolicy) -> Result<Self> {
        fs::create_dir_all(&root_dir)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create audit directory: {}", e)))?;
        let events_path = root_dir.join("audit.jsonl");

        if fs::metadata(&events_path).await.is_err() {
            fs::File::create(&events_path)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create audit log: {}", e)))?;
        }

        let events = Self::load_events(&events_path).await?;
        Ok(Self {
            events_path,
            events: RwLock::new(events),
            policy,
        })
    }

    async fn load_events(path: &Path) -> Result<Vec<AuditEvent>> {
        let file = fs::File::open(path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to open audit log: {}", e)))?;
        let mut reader = BufReader::new(file).lines();
        let mut events = Vec::new();

        while let Some(line) = reader
            .next_line()
            .await
            .map_err(|e| Error::Storage(format!("Failed to read audit log: {}", e)))?
        {
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<AuditEvent>(&line) {
                Ok(event) => events.push(event),
                Err(err) => warn!(
                    "Ignoring malformed audit event in {}: {}",
                    path.display(),
                    err
                ),
            }
        }

        Ok(events)
    }

    /// Record one event. Under `FailClosed` a write failure propagates to
    /// the caller of the mutation being documented; under `BestEffort` it
    /// is logged and swallowed.
    pub async fn record(&self, event: AuditEvent) -> Result<()> {
        match self.append(event).await {
            Ok(()) => Ok(()),
            Err(err) => match self.policy {
                AuditPolicy::FailClosed => Err(err),
                AuditPolicy::BestEffort => {
                    warn!("Dropping audit event: {}", err);
                    Ok(())
                }
            },
        }
    }

    async fn append(&self, event: AuditEvent) -> Result<()> {
        let encoded = serde_json::to_string(&event)
            .map_err(|e| Error::Storage(format!("Failed to encode audit event: {}", e)))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to open audit log: {}", e)))?;

        file.write_all(encoded.as_bytes())
            .await
            .map_err(|e| Error::Storage(format!("Failed to write audit log: {}", e)))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| Error::Storage(format!("Failed to finalize audit log line: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| Error::Storage(format!("Failed to flush audit log: {}", e)))?;

        let mut state = self.events.write().await;
        state.push(event);
        Ok(())
    }

    /// Newest-first page of events matching every set filter.
    pub async fn list_paginated(&self, query: &AuditListQuery) -> (Vec<AuditEvent>, bool) {
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(100).clamp(1, 1000);

        let state = self.events.read().await;
        let mut matched = 0usize;
        let mut events = Vec::with_capacity(limit);

        for event in state.iter().rev() {
            if !matches_query(event, query) {
                continue;
            }

            if matched < offset {
                matched += 1;
                continue;
            }

            if events.len() < limit {
                events.push(event.clone());
            }
            matched += 1;
        }

        let has_more = matched > offset + events.len();
        (events, has_more)
    }

    #[cfg(test)]
    pub(crate) async fn count(&self) -> usize {
        self.events.read().await.len()
    }
}

fn matches_query(event: &AuditEvent, query: &AuditListQuery) -> bool {
    if let Some(organization_id) = query.organization_id {
        if event.organization_id != Some(organization_id) {
            return false;
        }
    }
    if let Some(workspace_id) = query.workspace_id {
        if event.workspace_id != Some(workspace_id) {
            return false;
        }
    }
    if let Some(action) = query.action {
        if event.action != action {
            return false;
        }
    }
    if let Some(entity_type) = query.entity_type.as_deref() {
        if event.entity_type != entity_type {
            return false;
        }
    }
    if let Some(entity_id) = query.entity_id.as_deref() {
        if event.entity_id != entity_id {
            return false;
        }
    }
    if let Some(user_id) = query.user_id {
        if event.user_id != Some(user_id) {
            return false;
        }
    }
    if let Some(from) = query.from {
        if event.created_at < from {
            return false;
        }
    }
    if let Some(to) = query.to {
        if event.created_at >= to {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::super::types::AuditAction;
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn build_recorder(policy: AuditPolicy) -> (AuditRecorder, TempDir) {
        let dir = TempDir::new().unwrap();
        let recorder = AuditRecorder::new(dir.path().to_path_buf(), policy)
            .await
            .unwrap();
        (recorder, dir)
    }

    #[tokio::test]
    async fn append_and_list_returns_latest_first() {
        let (recorder, _dir) = build_recorder(AuditPolicy::FailClosed).await;
        let org = Uuid::new_v4();

        let first = AuditEvent::new(AuditAction::OrganizationCreate, "organization", org.to_string())
            .in_organization(org);
        let second =
            AuditEvent::new(AuditAction::OrganizationUpdate, "organization", org.to_string())
                .in_organization(org);

        recorder.record(first.clone()).await.unwrap();
        recorder.record(second.clone()).await.unwrap();

        let (events, has_more) = recorder.list_paginated(&AuditListQuery::default()).await;
        assert!(!has_more);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, second.action);
        assert_eq!(events[1].action, first.action);
    }

    #[tokio::test]
    async fn filters_by_scope_action_and_entity() {
        let (recorder, _dir) = build_recorder(AuditPolicy::FailClosed).await;
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let workspace = Uuid::new_v4();
        let actor = Uuid::new_v4();

        recorder
            .record(
                AuditEvent::new(AuditAction::OrganizationCreate, "organization", org_a.to_string())
                    .in_organization(org_a)
                    .by_user(actor),
            )
            .await
            .unwrap();
        recorder
            .record(
                AuditEvent::new(AuditAction::WorkspaceMemberAdd, "workspace_member", "row-1")
                    .in_organization(org_a)
                    .in_workspace(workspace),
            )
            .await
            .unwrap();
        recorder
            .record(
                AuditEvent::new(AuditAction::OrganizationCreate, "organization", org_b.to_string())
                    .in_organization(org_b),
            )
            .await
            .unwrap();

        let (events, _) = recorder
            .list_paginated(&AuditListQuery {
                organization_id: Some(org_a),
                ..Default::default()
            })
            .await;
        assert_eq!(events.len(), 2);

        let (events, _) = recorder
            .list_paginated(&AuditListQuery {
                workspace_id: Some(workspace),
                ..Default::default()
            })
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::WorkspaceMemberAdd);

        let (events, _) = recorder
            .list_paginated(&AuditListQuery {
                action: Some(AuditAction::OrganizationCreate),
                user_id: Some(actor),
                ..Default::default()
            })
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].organization_id, Some(org_a));
    }

    #[tokio::test]
    async fn pagination_reports_has_more() {
        let (recorder, _dir) = build_recorder(AuditPolicy::FailClosed).await;
        let org = Uuid::new_v4();

        for _ in 0..5 {
            recorder
                .record(
                    AuditEvent::new(
                        AuditAction::OrganizationUpdate,
                        "organization",
                        org.to_string(),
                    )
                    .in_organization(org),
                )
                .await
                .unwrap();
        }

        let (events, has_more) = recorder
            .list_paginated(&AuditListQuery {
                limit: Some(2),
                ..Default::default()
            })
            .await;
        assert_eq!(events.len(), 2);
        assert!(has_more);

        let (events, has_more) = recorder
            .list_paginated(&AuditListQuery {
                offset: Some(4),
                limit: Some(2),
                ..Default::default()
            })
            .await;
        assert_eq!(events.len(), 1);
        assert!(!has_more);
    }

    #[tokio::test]
    async fn events_survive_reload() {
        let dir = TempDir::new().unwrap();
        let org = Uuid::new_v4();

        {
            let recorder = AuditRecorder::new(dir.path().to_path_buf(), AuditPolicy::FailClosed)
                .await
                .unwrap();
            recorder
                .record(
                    AuditEvent::new(
                        AuditAction::OrganizationCreate,
                        "organization",
                        org.to_string(),
                    )
                    .in_organization(org),
                )
                .await
                .unwrap();
        }

        let reloaded = AuditRecorder::new(dir.path().to_path_buf(), AuditPolicy::FailClosed)
            .await
            .unwrap();
        assert_eq!(reloaded.count().await, 1);
    }
}
