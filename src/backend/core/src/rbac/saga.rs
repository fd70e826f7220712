//! Post-commit policy sagas.
//!
//! The storage transaction cannot span the policy store, so grants for a new
//! resource are applied after commit as an ordered list of steps. Each step
//! records how to undo exactly what it changed; on failure the recorded
//! compensations run in reverse.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use super::models::{Action, DomainId, Grant, Membership, NewResource, Resource, RoleId, UserId};
use super::roles::PredefinedRole;
use super::store::PolicyStore;
use super::subject::{CompoundSubject, Subject};
use crate::db::storage::{EntityKind, NewEntity};
use crate::error::{Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Steps
// ═══════════════════════════════════════════════════════════════════════════════

/// One forward mutation of the policy store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyStep {
    AddPolicies(Vec<Grant>),
    AddMembership(Membership),
}

#[derive(Debug)]
enum Compensation {
    RemovePolicies(Vec<Grant>),
    RemoveMembership(Membership),
}

/// Grants and memberships a saga actually added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPlan {
    pub grants: Vec<Grant>,
    pub memberships: Vec<Membership>,
}

impl AppliedPlan {
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty() && self.memberships.is_empty()
    }
}

/// An ordered list of policy steps with reverse-order compensation.
#[derive(Debug, Clone, Default)]
pub struct Saga {
    steps: Vec<PolicyStep>,
}

impl Saga {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: PolicyStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[PolicyStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step, or undo what ran and return the failure.
    ///
    /// Returns `CompensationFailed` when an undo itself fails; the error's
    /// context lists the tuples left behind.
    #[instrument(skip_all, fields(steps = self.steps.len()))]
    pub async fn execute(&self, store: &dyn PolicyStore) -> Result<AppliedPlan> {
        let mut applied = AppliedPlan::default();
        let mut undo: Vec<Compensation> = Vec::with_capacity(self.steps.len());

        for (index, step) in self.steps.iter().enumerate() {
            let outcome = match step {
                PolicyStep::AddPolicies(grants) => store.add_policies(grants).await.map(|added| {
                    if !added.is_empty() {
                        applied.grants.extend(added.iter().cloned());
                        undo.push(Compensation::RemovePolicies(added));
                    }
                }),
                PolicyStep::AddMembership(membership) => store
                    .add_role_for_user_in_domain(membership)
                    .await
                    .map(|inserted| {
                        if inserted {
                            applied.memberships.push(membership.clone());
                            undo.push(Compensation::RemoveMembership(membership.clone()));
                        }
                    }),
            };

            if let Err(cause) = outcome {
                warn!(
                    step = index,
                    error = %cause,
                    retryable = cause.is_retryable(),
                    compensations = undo.len(),
                    "Saga step failed, compensating"
                );
                return Err(compensate(store, undo, cause).await);
            }
        }

        debug!(
            grants = applied.grants.len(),
            memberships = applied.memberships.len(),
            "Saga completed"
        );
        Ok(applied)
    }
}

async fn compensate(
    store: &dyn PolicyStore,
    undo: Vec<Compensation>,
    cause: WardenError,
) -> WardenError {
    let mut residual = Vec::new();

    for compensation in undo.into_iter().rev() {
        match compensation {
            Compensation::RemovePolicies(grants) => {
                if let Err(e) = store.remove_policies(&grants).await {
                    error!(error = %e, count = grants.len(), "Failed to remove saga grants");
                    residual.extend(grants.iter().map(Grant::to_string));
                }
            }
            Compensation::RemoveMembership(membership) => {
                if let Err(e) = store.remove_role_for_user_in_domain(&membership).await {
                    error!(error = %e, membership = %membership, "Failed to remove saga membership");
                    residual.push(membership.to_string());
                }
            }
        }
    }

    if residual.is_empty() {
        cause
    } else {
        WardenError::compensation_failed(&cause, residual)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Creation plans
// ═══════════════════════════════════════════════════════════════════════════════

/// The business entity and catalog entry a creation workflow inserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub kind: EntityKind,
    pub uuid: String,
    pub title: String,
    pub description: String,
    /// Owning company; projects only.
    pub company_uuid: Option<String>,
}

impl ResourceSpec {
    pub fn company(
        uuid: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind: EntityKind::Company,
            uuid: uuid.into(),
            title: title.into(),
            description: description.into(),
            company_uuid: None,
        }
    }

    pub fn project(
        uuid: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        company_uuid: impl Into<String>,
    ) -> Self {
        Self {
            kind: EntityKind::Project,
            uuid: uuid.into(),
            title: title.into(),
            description: description.into(),
            company_uuid: Some(company_uuid.into()),
        }
    }

    pub fn entity(&self, created_by: UserId) -> NewEntity {
        NewEntity {
            kind: self.kind,
            uuid: self.uuid.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            company_uuid: self.company_uuid.clone(),
            created_by,
        }
    }

    /// Catalog entry; a project's resource is parented to its company's.
    pub fn resource(&self) -> NewResource {
        NewResource {
            type_value: self.kind.type_value().to_string(),
            uuid: self.uuid.clone(),
            description: self.description.clone(),
            parent_uuid: match self.kind {
                EntityKind::Company => None,
                EntityKind::Project => self.company_uuid.clone(),
            },
        }
    }
}

/// A user designated to run the new resource through a scoped role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Designee {
    pub email: String,
    pub role: PredefinedRole,
    pub actions: Vec<Action>,
}

impl Designee {
    pub fn new(email: impl Into<String>, role: PredefinedRole) -> Self {
        Self {
            email: email.into(),
            role,
            actions: role.scoped_actions().to_vec(),
        }
    }
}

/// Who receives which rights on a newly created resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantPlan {
    pub creator_actions: Vec<Action>,
    pub designee: Option<Designee>,
}

impl GrantPlan {
    /// Rights for the creator only.
    pub fn creator_only() -> Self {
        Self {
            creator_actions: Action::creator_rights().to_vec(),
            designee: None,
        }
    }

    /// A company administered by `admin_email` as `builder_admin`.
    pub fn company(admin_email: impl Into<String>) -> Self {
        Self {
            designee: Some(Designee::new(admin_email, PredefinedRole::BuilderAdmin)),
            ..Self::creator_only()
        }
    }

    /// A project run by `manager_email` as `builder_manager`.
    pub fn project(manager_email: impl Into<String>) -> Self {
        Self {
            designee: Some(Designee::new(manager_email, PredefinedRole::BuilderManager)),
            ..Self::creator_only()
        }
    }
}

/// A [`GrantPlan`] with every identity resolved to an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlan {
    pub creator: UserId,
    pub creator_actions: Vec<Action>,
    pub designee: Option<ResolvedDesignee>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDesignee {
    pub user: UserId,
    pub role: RoleId,
    pub actions: Vec<Action>,
}

impl ResolvedPlan {
    /// Saga granting this plan on `resource_uuid`.
    ///
    /// Steps: creator grants, scoped-role grants, then the designee's
    /// membership in the scoped role.
    pub fn saga(&self, domain: DomainId, resource_uuid: &str) -> Result<Saga> {
        let mut saga = Saga::new();

        if !self.creator_actions.is_empty() {
            saga.push(PolicyStep::AddPolicies(Grant::for_actions(
                &Subject::User(self.creator),
                domain,
                resource_uuid,
                &self.creator_actions,
            )));
        }

        if let Some(designee) = &self.designee {
            let scoped = CompoundSubject::new(designee.role, resource_uuid)?;
            if !designee.actions.is_empty() {
                saga.push(PolicyStep::AddPolicies(Grant::for_actions(
                    &Subject::Scoped(scoped.clone()),
                    domain,
                    resource_uuid,
                    &designee.actions,
                )));
            }
            saga.push(PolicyStep::AddMembership(Membership::new(
                Subject::User(designee.user),
                scoped.into(),
                domain,
            )));
        }

        Ok(saga)
    }
}

/// Result of a completed creation workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResource {
    pub resource: Resource,
    /// Id of the company or project row.
    pub entity_id: i64,
    pub applied: AppliedPlan,
}
