//! Policy store adapter.
//!
//! [`CasbinPolicyStore`] keeps a casbin enforcer as an in-memory cache of the
//! grant and membership tables and writes every mutation through to a
//! durable [`PolicyBackend`]. [`PolicyStore::reload`] rebuilds the cache from
//! the backend; callers that must observe a write made by another process
//! call it first.

use async_trait::async_trait;
use casbin::{CoreApi, DefaultModel, Enforcer, MemoryAdapter, MgmtApi};
use parking_lot::RwLock as SyncRwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, instrument};

use super::models::{Action, DomainId, Grant, Membership};
use super::subject::{RoleSubject, Subject};
use crate::error::{Result, WardenError};

/// Domain-scoped RBAC model.
///
/// Request: `(subject, domain, resource, action)`.
/// Policy: `(subject, domain, resource, action)`.
/// Grouping: `(subject, role subject, domain)`.
pub const RBAC_MODEL: &str = r#"
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && r.obj == p.obj && r.act == p.act
"#;

/// Grant column a filtered query matches from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantField {
    Subject = 0,
    Domain = 1,
    Resource = 2,
    Action = 3,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Traits
// ═══════════════════════════════════════════════════════════════════════════════

/// Enforcement and mutation primitives of the policy store.
///
/// Enforcement methods take shared access only and are safe to call from any
/// number of concurrent requests.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Does `subject` (directly or through a membership) hold `action` on `resource`?
    async fn enforce(
        &self,
        subject: &Subject,
        domain: DomainId,
        resource: &str,
        action: Action,
    ) -> Result<bool>;

    /// Add grants. Tuples already present are skipped; the newly added ones
    /// are returned.
    async fn add_policies(&self, grants: &[Grant]) -> Result<Vec<Grant>>;

    /// Remove grants. Absent tuples are ignored.
    async fn remove_policies(&self, grants: &[Grant]) -> Result<()>;

    /// Add a membership. Returns `false` if it was already present.
    async fn add_role_for_user_in_domain(&self, membership: &Membership) -> Result<bool>;

    /// Remove a membership. Absent memberships are ignored.
    async fn remove_role_for_user_in_domain(&self, membership: &Membership) -> Result<()>;

    /// Is the subject directly a member of the role subject in the domain?
    async fn has_role_for_user(&self, membership: &Membership) -> Result<bool>;

    /// Grants whose fields, starting at `field`, equal `values`.
    async fn get_filtered_policy(&self, field: GrantField, values: Vec<String>) -> Result<Vec<Grant>>;

    /// Role subjects directly held by `subject` in `domain`.
    async fn roles_for_user_in_domain(
        &self,
        subject: &Subject,
        domain: DomainId,
    ) -> Result<Vec<RoleSubject>>;

    /// Rebuild cached state from the durable backend.
    async fn reload(&self) -> Result<()>;
}

/// Durable storage of grant and membership rows.
#[async_trait]
pub trait PolicyBackend: Send + Sync {
    async fn load(&self) -> Result<(Vec<Grant>, Vec<Membership>)>;

    async fn insert_grants(&self, grants: &[Grant]) -> Result<()>;

    async fn delete_grants(&self, grants: &[Grant]) -> Result<()>;

    async fn insert_membership(&self, membership: &Membership) -> Result<()>;

    async fn delete_membership(&self, membership: &Membership) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory backend
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct PolicyTables {
    grants: BTreeSet<Grant>,
    memberships: BTreeSet<Membership>,
}

/// Process-local backend. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryPolicyBackend {
    tables: Arc<SyncRwLock<PolicyTables>>,
}

impl MemoryPolicyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant_count(&self) -> usize {
        self.tables.read().grants.len()
    }

    pub fn membership_count(&self) -> usize {
        self.tables.read().memberships.len()
    }
}

#[async_trait]
impl PolicyBackend for MemoryPolicyBackend {
    async fn load(&self) -> Result<(Vec<Grant>, Vec<Membership>)> {
        let tables = self.tables.read();
        Ok((
            tables.grants.iter().cloned().collect(),
            tables.memberships.iter().cloned().collect(),
        ))
    }

    async fn insert_grants(&self, grants: &[Grant]) -> Result<()> {
        self.tables.write().grants.extend(grants.iter().cloned());
        Ok(())
    }

    async fn delete_grants(&self, grants: &[Grant]) -> Result<()> {
        let mut tables = self.tables.write();
        for grant in grants {
            tables.grants.remove(grant);
        }
        Ok(())
    }

    async fn insert_membership(&self, membership: &Membership) -> Result<()> {
        self.tables.write().memberships.insert(membership.clone());
        Ok(())
    }

    async fn delete_membership(&self, membership: &Membership) -> Result<()> {
        self.tables.write().memberships.remove(membership);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Casbin store
// ═══════════════════════════════════════════════════════════════════════════════

/// Policy store backed by a casbin enforcer.
#[derive(Clone)]
pub struct CasbinPolicyStore {
    enforcer: Arc<RwLock<Enforcer>>,
    backend: Arc<dyn PolicyBackend>,
}

impl CasbinPolicyStore {
    /// Build a store and load the backend's current rows.
    #[instrument(skip(backend))]
    pub async fn new(backend: Arc<dyn PolicyBackend>) -> Result<Self> {
        let (grants, memberships) = backend.load().await?;
        let enforcer = build_enforcer(&grants, &memberships).await?;
        debug!(
            grants = grants.len(),
            memberships = memberships.len(),
            "Policy store loaded"
        );

        Ok(Self {
            enforcer: Arc::new(RwLock::new(enforcer)),
            backend,
        })
    }

    /// A store over a fresh in-memory backend.
    pub async fn in_memory() -> Result<Self> {
        Self::new(Arc::new(MemoryPolicyBackend::new())).await
    }

    pub fn backend(&self) -> &Arc<dyn PolicyBackend> {
        &self.backend
    }
}

async fn build_enforcer(grants: &[Grant], memberships: &[Membership]) -> Result<Enforcer> {
    let model = DefaultModel::from_str(RBAC_MODEL).await?;
    let mut enforcer = Enforcer::new(model, MemoryAdapter::default()).await?;

    if !grants.is_empty() {
        enforcer
            .add_policies(grants.iter().map(Grant::to_rule).collect())
            .await?;
    }
    if !memberships.is_empty() {
        enforcer
            .add_grouping_policies(memberships.iter().map(Membership::to_rule).collect())
            .await?;
    }
    enforcer.build_role_links()?;

    Ok(enforcer)
}

/// Delete backend rows whose enforcer insert failed.
///
/// Rows the backend refuses to delete come back as the residual of a
/// compensation failure.
async fn rollback_grants(backend: &dyn PolicyBackend, fresh: &[Grant], cause: WardenError) -> WardenError {
    match backend.delete_grants(fresh).await {
        Ok(()) => cause,
        Err(e) => {
            error!(error = %e, count = fresh.len(), "Failed to roll back backend grants");
            WardenError::compensation_failed(&cause, fresh.iter().map(Grant::to_string).collect())
        }
    }
}

async fn rollback_membership(
    backend: &dyn PolicyBackend,
    membership: &Membership,
    cause: WardenError,
) -> WardenError {
    match backend.delete_membership(membership).await {
        Ok(()) => cause,
        Err(e) => {
            error!(error = %e, membership = %membership, "Failed to roll back backend membership");
            WardenError::compensation_failed(&cause, vec![membership.to_string()])
        }
    }
}

/// Unique grants in first-seen order.
fn dedup(grants: &[Grant]) -> Vec<Grant> {
    let mut seen = BTreeSet::new();
    grants
        .iter()
        .filter(|grant| seen.insert((*grant).clone()))
        .cloned()
        .collect()
}

#[async_trait]
impl PolicyStore for CasbinPolicyStore {
    #[instrument(skip(self), fields(subject = %subject, domain = %domain))]
    async fn enforce(
        &self,
        subject: &Subject,
        domain: DomainId,
        resource: &str,
        action: Action,
    ) -> Result<bool> {
        let subject = subject.to_string();
        let domain = domain.to_string();
        let enforcer = self.enforcer.read().await;
        let allowed = enforcer.enforce((subject.as_str(), domain.as_str(), resource, action.as_str()))?;
        debug!(allowed, "Enforcement decision");
        Ok(allowed)
    }

    #[instrument(skip(self, grants), fields(count = grants.len()))]
    async fn add_policies(&self, grants: &[Grant]) -> Result<Vec<Grant>> {
        let mut enforcer = self.enforcer.write().await;
        let fresh: Vec<Grant> = dedup(grants)
            .into_iter()
            .filter(|grant| !enforcer.has_policy(grant.to_rule()))
            .collect();

        if fresh.is_empty() {
            return Ok(fresh);
        }

        self.backend.insert_grants(&fresh).await?;
        if let Err(e) = enforcer
            .add_policies(fresh.iter().map(Grant::to_rule).collect())
            .await
        {
            return Err(rollback_grants(self.backend.as_ref(), &fresh, e.into()).await);
        }

        debug!(added = fresh.len(), "Grants added");
        Ok(fresh)
    }

    #[instrument(skip(self, grants), fields(count = grants.len()))]
    async fn remove_policies(&self, grants: &[Grant]) -> Result<()> {
        let mut enforcer = self.enforcer.write().await;
        let present: Vec<Grant> = dedup(grants)
            .into_iter()
            .filter(|grant| enforcer.has_policy(grant.to_rule()))
            .collect();

        self.backend.delete_grants(grants).await?;
        if !present.is_empty() {
            enforcer
                .remove_policies(present.iter().map(Grant::to_rule).collect())
                .await?;
        }

        debug!(removed = present.len(), "Grants removed");
        Ok(())
    }

    #[instrument(skip(self), fields(membership = %membership))]
    async fn add_role_for_user_in_domain(&self, membership: &Membership) -> Result<bool> {
        let mut enforcer = self.enforcer.write().await;
        if enforcer.has_grouping_policy(membership.to_rule()) {
            return Ok(false);
        }

        self.backend.insert_membership(membership).await?;
        if let Err(e) = enforcer.add_grouping_policy(membership.to_rule()).await {
            return Err(rollback_membership(self.backend.as_ref(), membership, e.into()).await);
        }
        Ok(true)
    }

    #[instrument(skip(self), fields(membership = %membership))]
    async fn remove_role_for_user_in_domain(&self, membership: &Membership) -> Result<()> {
        let mut enforcer = self.enforcer.write().await;
        self.backend.delete_membership(membership).await?;
        if enforcer.has_grouping_policy(membership.to_rule()) {
            enforcer.remove_grouping_policy(membership.to_rule()).await?;
        }
        Ok(())
    }

    async fn has_role_for_user(&self, membership: &Membership) -> Result<bool> {
        let enforcer = self.enforcer.read().await;
        Ok(enforcer.has_grouping_policy(membership.to_rule()))
    }

    async fn get_filtered_policy(&self, field: GrantField, values: Vec<String>) -> Result<Vec<Grant>> {
        let enforcer = self.enforcer.read().await;
        enforcer
            .get_filtered_policy(field as usize, values)
            .iter()
            .map(|rule| Grant::from_rule(rule))
            .collect()
    }

    async fn roles_for_user_in_domain(
        &self,
        subject: &Subject,
        domain: DomainId,
    ) -> Result<Vec<RoleSubject>> {
        let enforcer = self.enforcer.read().await;
        let mut roles = Vec::new();
        for rule in enforcer.get_filtered_grouping_policy(0, vec![subject.to_string()]) {
            let membership = Membership::from_rule(&rule)?;
            if membership.domain == domain {
                roles.push(membership.role);
            }
        }
        Ok(roles)
    }

    #[instrument(skip(self))]
    async fn reload(&self) -> Result<()> {
        // Held across the load so no write lands between snapshot and swap.
        let mut enforcer = self.enforcer.write().await;
        let (grants, memberships) = self.backend.load().await?;
        *enforcer = build_enforcer(&grants, &memberships).await?;
        debug!(
            grants = grants.len(),
            memberships = memberships.len(),
            "Policy store reloaded"
        );
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
