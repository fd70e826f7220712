//! Domain-scoped, hierarchical role-based access control.
//!
//! This module provides:
//! - **Models**: users, roles, resources, grants and memberships
//! - **Subject Codec**: `<roleId>::<resourceUuid>` subjects for roles scoped to one resource
//! - **Hierarchy**: parent-type rules and an arena-backed resource forest
//! - **Policy Store**: a casbin enforcer cache written through to a durable backend
//! - **Engine**: role and access checks, plus creation sagas
//! - **Middleware**: tower layer gating requests on role expressions
//!
//! # Usage
//!
//! ```rust,ignore
//! use warden_core::prelude::*;
//!
//! let policy = CasbinPolicyStore::new(Arc::new(db.policy_backend())).await?;
//! let engine = AuthzEngine::new(Arc::new(db.storage()), Arc::new(policy));
//!
//! let created = engine
//!     .create_tenant_resource(
//!         creator,
//!         domain,
//!         &ResourceSpec::company("C1", "Acme", "General contractor"),
//!         &GrantPlan::company("admin@acme.test"),
//!     )
//!     .await?;
//!
//! engine.require_access(creator, domain, "C1", Action::Modify).await?;
//!
//! let app = Router::new()
//!     .route("/companies", post(create_company))
//!     .layer(AccessLayer::require_role(Arc::new(engine), "super_admin"));
//! ```

pub mod engine;
pub mod expression;
pub mod hierarchy;
pub mod middleware;
pub mod models;
pub mod roles;
pub mod saga;
pub mod store;
pub mod subject;

pub use engine::{AuthzEngine, ResourcePermissions, RoleAssignment};
pub use expression::RoleExpression;
pub use hierarchy::{HierarchyRules, ParentRule, ResourceForest};
pub use middleware::{AccessChecker, AccessContext, AccessLayer, AccessService, Gate};
pub use models::{
    Action, AuthIdentity, Domain, DomainId, Grant, Membership, NewResource, Resource,
    ResourceId, ResourceType, ResourceTypeId, Role, RoleId, Selector, User, UserId,
};
pub use roles::{PredefinedRole, DEFAULT_RESOURCE_TYPES};
pub use saga::{
    AppliedPlan, CreatedResource, Designee, GrantPlan, PolicyStep, ResourceSpec, Saga,
};
pub use store::{
    CasbinPolicyStore, GrantField, MemoryPolicyBackend, PolicyBackend, PolicyStore, RBAC_MODEL,
};
pub use subject::{CompoundSubject, RoleSubject, Subject};
