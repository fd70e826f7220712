//! Authorization engine.
//!
//! Answers "may user U do A on resource R in domain D" and "does U hold role
//! X in D", and drives the creation workflow that registers a resource and
//! then grants access to it.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use super::expression::RoleExpression;
use super::models::{Action, DomainId, Grant, Membership, Resource, Role, Selector, UserId};
use super::saga::{
    AppliedPlan, CreatedResource, GrantPlan, PolicyStep, ResolvedDesignee, ResolvedPlan,
    ResourceSpec, Saga,
};
use super::store::{GrantField, PolicyStore};
use super::subject::{CompoundSubject, RoleSubject, Subject};
use crate::config::PolicyConfig;
use crate::db::storage::{Storage, StorageTx};
use crate::error::{Result, WardenError};

/// A role the user holds, optionally scoped to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role: Role,
    pub resource_uuid: Option<String>,
}

/// Actions to grant on one resource, as submitted by an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePermissions {
    pub resource_uuid: String,
    pub actions: Vec<String>,
}

/// Enforcement entry points and creation sagas over a storage backend and a
/// policy store.
pub struct AuthzEngine<S: Storage> {
    storage: Arc<S>,
    policy: Arc<dyn PolicyStore>,
    /// Roles by value. The role catalog is static once seeded.
    roles: Arc<DashMap<String, Role>>,
    /// Oldest policy cache a role check accepts. `None` never reloads.
    max_staleness: Option<Duration>,
    last_reload: Arc<Mutex<Instant>>,
}

impl<S: Storage> Clone for AuthzEngine<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            policy: Arc::clone(&self.policy),
            roles: Arc::clone(&self.roles),
            max_staleness: self.max_staleness,
            last_reload: Arc::clone(&self.last_reload),
        }
    }
}

impl<S: Storage> AuthzEngine<S> {
    pub fn new(storage: Arc<S>, policy: Arc<dyn PolicyStore>) -> Self {
        Self::with_config(storage, policy, &PolicyConfig::default())
    }

    pub fn with_config(storage: Arc<S>, policy: Arc<dyn PolicyStore>, config: &PolicyConfig) -> Self {
        Self {
            storage,
            policy,
            roles: Arc::new(DashMap::new()),
            max_staleness: config.max_staleness,
            last_reload: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn policy(&self) -> &Arc<dyn PolicyStore> {
        &self.policy
    }

    /// Forget cached role rows.
    pub fn clear_role_cache(&self) {
        self.roles.clear();
    }

    async fn role(&self, value: &str) -> Result<Role> {
        if let Some(role) = self.roles.get(value) {
            return Ok(role.clone());
        }
        let role = self.storage.require_role(&Selector::value(value)).await?;
        self.roles.insert(value.to_string(), role.clone());
        Ok(role)
    }

    /// Rebuild the policy cache from the durable backend.
    ///
    /// Call after another process wrote grants or memberships that the next
    /// check must observe.
    pub async fn reload_policies(&self) -> Result<()> {
        self.policy.reload().await?;
        *self.last_reload.lock() = Instant::now();
        Ok(())
    }

    async fn refresh_memberships(&self) -> Result<()> {
        let Some(max_staleness) = self.max_staleness else {
            return Ok(());
        };
        let stale = self.last_reload.lock().elapsed() >= max_staleness;
        if stale {
            debug!(?max_staleness, "Policy cache stale, reloading");
            self.reload_policies().await?;
        }
        Ok(())
    }

    async fn holds(&self, subject: Subject, role: RoleSubject, domain: DomainId) -> Result<bool> {
        self.policy
            .has_role_for_user(&Membership::new(subject, role, domain))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Enforcement
    // ─────────────────────────────────────────────────────────────────────────

    /// Does the user hold the role with this value in the domain?
    #[instrument(skip(self))]
    pub async fn check_role(&self, user: UserId, domain: DomainId, role_value: &str) -> Result<bool> {
        let role = self.role(role_value).await?;
        self.refresh_memberships().await?;
        let held = self
            .holds(Subject::User(user), RoleSubject::Role(role.id), domain)
            .await?;
        debug!(held, "Role check");
        Ok(held)
    }

    /// Does the user hold the role scoped to one resource?
    #[instrument(skip(self))]
    pub async fn check_scoped_role(
        &self,
        user: UserId,
        domain: DomainId,
        role_value: &str,
        resource_uuid: &str,
    ) -> Result<bool> {
        let role = self.role(role_value).await?;
        self.storage
            .get_resource(&Selector::uuid(resource_uuid), true)
            .await?;
        let scoped = CompoundSubject::new(role.id, resource_uuid)?;
        self.refresh_memberships().await?;
        self.holds(Subject::User(user), scoped.into(), domain).await
    }

    /// May the user perform `action` on the resource?
    #[instrument(skip(self))]
    pub async fn check_access(
        &self,
        user: UserId,
        domain: DomainId,
        resource_uuid: &str,
        action: Action,
    ) -> Result<bool> {
        self.policy
            .enforce(&Subject::User(user), domain, resource_uuid, action)
            .await
    }

    /// [`check_access`](Self::check_access), with a denial as `Forbidden`.
    pub async fn require_access(
        &self,
        user: UserId,
        domain: DomainId,
        resource_uuid: &str,
        action: Action,
    ) -> Result<()> {
        if self.check_access(user, domain, resource_uuid, action).await? {
            return Ok(());
        }
        warn!(user = %user, domain = %domain, resource = resource_uuid, action = %action, "Access denied");
        Err(WardenError::forbidden(format!(
            "{} on {} is not permitted",
            action, resource_uuid
        ))
        .with_context("resource", resource_uuid)
        .with_context("action", action))
    }

    /// Combine role checks with AND or OR.
    ///
    /// Every role is checked even when the result is already decided, so an
    /// unknown role fails the call regardless of its position.
    #[instrument(skip(self, roles), fields(roles = roles.len()))]
    pub async fn check_role_expression<R: AsRef<str> + Sync>(
        &self,
        expression: RoleExpression,
        user: UserId,
        domain: DomainId,
        roles: &[R],
    ) -> Result<bool> {
        if roles.is_empty() {
            return Err(WardenError::invalid_input("a role expression needs at least one role"));
        }

        let mut resolved = Vec::with_capacity(roles.len());
        for value in roles {
            resolved.push(self.role(value.as_ref()).await?);
        }

        self.refresh_memberships().await?;
        let mut results = Vec::with_capacity(resolved.len());
        for role in resolved {
            results.push(
                self.holds(Subject::User(user), RoleSubject::Role(role.id), domain)
                    .await?,
            );
        }

        let passed = expression.evaluate(results);
        debug!(%expression, passed, "Role expression evaluated");
        Ok(passed)
    }

    /// [`check_role_expression`](Self::check_role_expression) with the
    /// expression given as text. Anything but `AND`/`OR` is `InvalidInput`.
    pub async fn check_role_expression_str<R: AsRef<str> + Sync>(
        &self,
        expression: &str,
        user: UserId,
        domain: DomainId,
        roles: &[R],
    ) -> Result<bool> {
        let expression: RoleExpression = expression.parse()?;
        self.check_role_expression(expression, user, domain, roles).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Decode a compound subject and check both halves exist.
    pub async fn resolve_compound_subject(&self, s: &str) -> Result<CompoundSubject> {
        let subject: CompoundSubject = s.parse()?;
        self.storage
            .find_role(&Selector::id(subject.role_id().get()))
            .await?
            .ok_or_else(|| WardenError::role_not_found(subject.role_id().to_string()))?;
        self.storage
            .get_resource(&Selector::uuid(subject.resource_uuid()), true)
            .await?;
        Ok(subject)
    }

    /// Roles the user holds directly in the domain.
    #[instrument(skip(self))]
    pub async fn roles_for_user(&self, user: UserId, domain: DomainId) -> Result<Vec<RoleAssignment>> {
        let held = self
            .policy
            .roles_for_user_in_domain(&Subject::User(user), domain)
            .await?;

        let mut assignments = Vec::with_capacity(held.len());
        for role_subject in held {
            let Some(role) = self
                .storage
                .find_role(&Selector::id(role_subject.role_id().get()))
                .await?
            else {
                warn!(role_subject = %role_subject, "Membership names an unknown role");
                continue;
            };
            assignments.push(RoleAssignment {
                role,
                resource_uuid: role_subject.resource_uuid().map(str::to_string),
            });
        }
        Ok(assignments)
    }

    /// Resources on which the user holds any of `actions`, directly or via a
    /// scoped role. An empty `actions` matches every action.
    #[instrument(skip(self, actions))]
    pub async fn accessible_resources(
        &self,
        user: UserId,
        domain: DomainId,
        type_value: Option<&str>,
        actions: &[Action],
    ) -> Result<Vec<Resource>> {
        let mut subjects = vec![Subject::User(user)];
        for role_subject in self
            .policy
            .roles_for_user_in_domain(&Subject::User(user), domain)
            .await?
        {
            if let RoleSubject::Scoped(scoped) = role_subject {
                subjects.push(Subject::Scoped(scoped));
            }
        }

        let mut uuids = BTreeSet::new();
        for subject in subjects {
            let grants = self
                .policy
                .get_filtered_policy(
                    GrantField::Subject,
                    vec![subject.to_string(), domain.to_string()],
                )
                .await?;
            uuids.extend(
                grants
                    .into_iter()
                    .filter(|g| actions.is_empty() || actions.contains(&g.action))
                    .map(|g| g.resource),
            );
        }

        let mut resources = Vec::new();
        for uuid in uuids {
            match self.storage.find_resource(&Selector::uuid(&uuid)).await? {
                Some(resource) if type_value.map_or(true, |t| resource.type_value == t) => {
                    resources.push(resource)
                }
                Some(_) => {}
                None => warn!(resource = %uuid, "Grant names an unregistered resource"),
            }
        }
        Ok(resources)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sagas
    // ─────────────────────────────────────────────────────────────────────────

    /// Give a user a raw role and per-resource actions in one saga.
    ///
    /// Everything is validated before the first write: the domain, the user
    /// (by email), the role, each resource and each action.
    #[instrument(skip(self, permissions), fields(resources = permissions.len()))]
    pub async fn assign_permissions(
        &self,
        domain: DomainId,
        email: &str,
        role_value: Option<&str>,
        permissions: &[ResourcePermissions],
    ) -> Result<AppliedPlan> {
        self.storage.require_domain(&Selector::id(domain.get())).await?;
        let user = self.storage.require_user(&Selector::value(email)).await?;
        let subject = Subject::User(user.id);

        let mut saga = Saga::new();
        if let Some(value) = role_value {
            let role = self.role(value).await?;
            saga.push(PolicyStep::AddMembership(Membership::new(
                subject.clone(),
                RoleSubject::Role(role.id),
                domain,
            )));
        }

        for entry in permissions {
            self.storage
                .get_resource(&Selector::uuid(&entry.resource_uuid), true)
                .await?;
            let actions = entry
                .actions
                .iter()
                .map(|a| a.parse::<Action>())
                .collect::<Result<Vec<_>>>()?;
            if !actions.is_empty() {
                saga.push(PolicyStep::AddPolicies(Grant::for_actions(
                    &subject,
                    domain,
                    &entry.resource_uuid,
                    &actions,
                )));
            }
        }

        saga.execute(self.policy.as_ref()).await
    }

    /// Register a company or project and grant access to it.
    ///
    /// The entity row and catalog entry are written in one storage
    /// transaction, and every identity in `plan` is resolved before it
    /// commits. Grants are applied afterwards; if they fail they are
    /// compensated but the committed rows stay.
    #[instrument(skip(self, spec, plan), fields(uuid = %spec.uuid, kind = ?spec.kind))]
    pub async fn create_tenant_resource(
        &self,
        creator: UserId,
        domain: DomainId,
        spec: &ResourceSpec,
        plan: &GrantPlan,
    ) -> Result<CreatedResource> {
        let mut tx = self.storage.begin().await?;

        let staged = self.stage(&mut tx, creator, domain, spec, plan).await;
        let (entity_id, resource, resolved) = match staged {
            Ok(staged) => staged,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
        };

        tx.commit().await?;
        debug!(resource_id = %resource.id, entity_id, "Resource committed");

        let applied = resolved
            .saga(domain, &resource.uuid)?
            .execute(self.policy.as_ref())
            .await
            .map_err(|e| {
                warn!(
                    resource = %resource.uuid,
                    error = %e,
                    "Resource committed without its grants"
                );
                e.with_context("resource", &resource.uuid)
            })?;

        Ok(CreatedResource {
            resource,
            entity_id,
            applied,
        })
    }

    async fn stage(
        &self,
        tx: &mut S::Tx,
        creator: UserId,
        domain: DomainId,
        spec: &ResourceSpec,
        plan: &GrantPlan,
    ) -> Result<(i64, Resource, ResolvedPlan)> {
        let entity_id = tx.insert_entity(&spec.entity(creator)).await?;
        let resource = tx.add_resource(&spec.resource()).await?;

        self.storage.require_domain(&Selector::id(domain.get())).await?;
        tx.find_user(&Selector::id(creator.get()))
            .await?
            .ok_or_else(|| WardenError::user_not_found(creator))?;

        let designee = match &plan.designee {
            Some(designee) => {
                let user = tx
                    .find_user(&Selector::value(&designee.email))
                    .await?
                    .ok_or_else(|| WardenError::user_not_found(&designee.email))?;
                let role = self.role(designee.role.value()).await?;
                Some(ResolvedDesignee {
                    user: user.id,
                    role: role.id,
                    actions: designee.actions.clone(),
                })
            }
            None => None,
        };

        Ok((
            entity_id,
            resource,
            ResolvedPlan {
                creator,
                creator_actions: plan.creator_actions.clone(),
                designee,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStorage;
    use crate::error::ErrorCode;
    use crate::rbac::models::{Domain, RoleId, User};
    use crate::rbac::store::CasbinPolicyStore;
    use uuid::Uuid;

    async fn engine() -> AuthzEngine<MemoryStorage> {
        let storage = MemoryStorage::default();
        storage.insert_domain(Domain { id: DomainId(1), value: "default".into() });
        storage.insert_role(Role { id: RoleId(7), uuid: Uuid::new_v4(), value: "builder_admin".into() });
        storage.insert_role(Role { id: RoleId(8), uuid: Uuid::new_v4(), value: "builder_manager".into() });
        storage.insert_user(User { id: UserId(42), uuid: Uuid::new_v4(), email: "owner@example.com".into() });
        storage.insert_user(User { id: UserId(43), uuid: Uuid::new_v4(), email: "admin@example.com".into() });
        for t in ["company", "project"] {
            storage.seed_resource_type(t).await.unwrap();
        }
        let policy = CasbinPolicyStore::in_memory().await.unwrap();
        AuthzEngine::new(Arc::new(storage), Arc::new(policy))
    }

    #[tokio::test]
    async fn test_check_role_unknown_role() {
        let engine = engine().await;
        let err = engine.check_role(UserId(42), DomainId(1), "ghost").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RoleNotFound);
    }

    #[tokio::test]
    async fn test_check_role_reads_membership() {
        let engine = engine().await;
        let membership = Membership::new(Subject::User(UserId(42)), RoleSubject::Role(RoleId(7)), DomainId(1));
        engine.policy().add_role_for_user_in_domain(&membership).await.unwrap();

        assert!(engine.check_role(UserId(42), DomainId(1), "builder_admin").await.unwrap());
        assert!(!engine.check_role(UserId(42), DomainId(1), "builder_manager").await.unwrap());
        assert!(!engine.check_role(UserId(42), DomainId(2), "builder_admin").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_expression_is_invalid() {
        let engine = engine().await;
        let none: [&str; 0] = [];
        let err = engine
            .check_role_expression(RoleExpression::Or, UserId(42), DomainId(1), &none)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_require_access_forbidden() {
        let engine = engine().await;
        let err = engine
            .require_access(UserId(42), DomainId(1), "C1", Action::Read)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn test_create_company_grants_creator_and_designee() {
        let engine = engine().await;
        let created = engine
            .create_tenant_resource(
                UserId(42),
                DomainId(1),
                &ResourceSpec::company("C1", "Acme", "builder"),
                &GrantPlan::company("admin@example.com"),
            )
            .await
            .unwrap();

        assert_eq!(created.resource.type_value, "company");
        assert!(engine.check_access(UserId(42), DomainId(1), "C1", Action::Administration).await.unwrap());
        assert!(engine.check_access(UserId(43), DomainId(1), "C1", Action::Management).await.unwrap());
        assert!(!engine.check_access(UserId(43), DomainId(1), "C1", Action::Administration).await.unwrap());
        assert!(engine
            .check_scoped_role(UserId(43), DomainId(1), "builder_admin", "C1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unknown_designee_rolls_back() {
        let engine = engine().await;
        let err = engine
            .create_tenant_resource(
                UserId(42),
                DomainId(1),
                &ResourceSpec::company("C1", "Acme", ""),
                &GrantPlan::company("nobody@example.com"),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::UserNotFound);
        assert_eq!(engine.storage().resource_count(), 0);
        assert_eq!(engine.storage().entity_count(), 0);
        assert!(!engine.check_access(UserId(42), DomainId(1), "C1", Action::Read).await.unwrap());
    }

    #[tokio::test]
    async fn test_resolve_compound_subject() {
        let engine = engine().await;
        engine
            .create_tenant_resource(UserId(42), DomainId(1), &ResourceSpec::company("C1", "Acme", ""), &GrantPlan::creator_only())
            .await
            .unwrap();

        let subject = engine.resolve_compound_subject("7::C1").await.unwrap();
        assert_eq!(subject.role_id(), RoleId(7));

        let err = engine.resolve_compound_subject("99::C1").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RoleNotFound);
        let err = engine.resolve_compound_subject("7::C2").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceNotFound);
        let err = engine.resolve_compound_subject("7-C1").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSubjectFormat);
    }

    #[tokio::test]
    async fn test_assign_permissions_validates_before_writing() {
        let engine = engine().await;
        engine
            .create_tenant_resource(UserId(42), DomainId(1), &ResourceSpec::company("C1", "Acme", ""), &GrantPlan::creator_only())
            .await
            .unwrap();

        let err = engine
            .assign_permissions(
                DomainId(1),
                "admin@example.com",
                Some("builder_manager"),
                &[
                    ResourcePermissions { resource_uuid: "C1".into(), actions: vec!["read".into()] },
                    ResourcePermissions { resource_uuid: "C1".into(), actions: vec!["fly".into()] },
                ],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownAction);
        assert!(engine.roles_for_user(UserId(43), DomainId(1)).await.unwrap().is_empty());

        let applied = engine
            .assign_permissions(
                DomainId(1),
                "admin@example.com",
                Some("builder_manager"),
                &[ResourcePermissions { resource_uuid: "C1".into(), actions: vec!["read".into(), "modify".into()] }],
            )
            .await
            .unwrap();
        assert_eq!(applied.grants.len(), 2);
        assert_eq!(applied.memberships.len(), 1);

        let roles = engine.roles_for_user(UserId(43), DomainId(1)).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].role.value, "builder_manager");
        assert!(roles[0].resource_uuid.is_none());
    }

    #[tokio::test]
    async fn test_accessible_resources_via_scoped_role() {
        let engine = engine().await;
        engine
            .create_tenant_resource(UserId(42), DomainId(1), &ResourceSpec::company("C1", "Acme", ""), &GrantPlan::company("admin@example.com"))
            .await
            .unwrap();
        engine
            .create_tenant_resource(UserId(42), DomainId(1), &ResourceSpec::project("P1", "Tower", "", "C1"), &GrantPlan::creator_only())
            .await
            .unwrap();

        let companies = engine
            .accessible_resources(UserId(43), DomainId(1), Some("company"), &[Action::Read])
            .await
            .unwrap();
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].uuid, "C1");

        let owned = engine.accessible_resources(UserId(42), DomainId(1), None, &[]).await.unwrap();
        assert_eq!(owned.len(), 2);

        assert!(engine
            .accessible_resources(UserId(43), DomainId(1), Some("project"), &[])
            .await
            .unwrap()
            .is_empty());
    }
}
