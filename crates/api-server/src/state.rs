//! Application state

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;

use cb_core::audit::{AuditPolicy, AuditRecorder};
use cb_core::authz::RoleAuthority;
use cb_core::identity::IdentityStore;
use cb_core::invite::InviteLifecycleManager;
use cb_core::membership::MembershipLedger;
use cb_core::tenant::TenantStore;

const DEFAULT_INVITE_TTL_HOURS: i64 = 24 * 7;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    identity: Arc<IdentityStore>,
    tenants: Arc<TenantStore>,
    ledger: Arc<MembershipLedger>,
    authority: RoleAuthority,
    invites: InviteLifecycleManager,
    audit: Arc<AuditRecorder>,
}

impl AppState {
    /// Create a new AppState with the given data directory.
    ///
    /// `CB_INVITE_TTL_HOURS` and `CB_AUDIT_POLICY` tune the invite expiry
    /// window and the audit write-failure policy.
    pub async fn new(data_dir: PathBuf) -> cb_core::Result<Self> {
        let identity = Arc::new(IdentityStore::new(data_dir.join("users.json")).await?);
        let tenants = Arc::new(TenantStore::new(data_dir.join("tenants.json")).await?);
        let ledger = Arc::new(MembershipLedger::new(data_dir.join("memberships.json")).await?);

        let audit_policy = std::env::var("CB_AUDIT_POLICY")
            .ok()
            .and_then(|raw| raw.parse::<AuditPolicy>().ok())
            .unwrap_or_default();
        let audit = Arc::new(AuditRecorder::new(data_dir.join("audit"), audit_policy).await?);

        let authority = RoleAuthority::new(Arc::clone(&ledger), Arc::clone(&tenants));

        let invite_ttl_hours = std::env::var("CB_INVITE_TTL_HOURS")
            .ok()
            .and_then(|raw| raw.parse::<i64>().ok())
            .filter(|hours| *hours > 0)
            .unwrap_or(DEFAULT_INVITE_TTL_HOURS);
        let invites = InviteLifecycleManager::new(
            data_dir.join("invites.json"),
            Arc::clone(&ledger),
            Arc::clone(&tenants),
            Arc::clone(&identity),
            authority.clone(),
            Arc::clone(&audit),
            Duration::hours(invite_ttl_hours),
        )
        .await?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                identity,
                tenants,
                ledger,
                authority,
                invites,
                audit,
            }),
        })
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.inner.identity
    }

    pub fn tenants(&self) -> &TenantStore {
        &self.inner.tenants
    }

    pub fn ledger(&self) -> &MembershipLedger {
        &self.inner.ledger
    }

    pub fn authority(&self) -> &RoleAuthority {
        &self.inner.authority
    }

    pub fn invites(&self) -> &InviteLifecycleManager {
        &self.inner.invites
    }

    pub fn audit(&self) -> &AuditRecorder {
        &self.inner.audit
    }
}
