#![allow(clippy::result_large_err)]
//! # Warden Core
//!
//! Authorization core for a multi-tenant property-management backend.
//!
//! ## Architecture
//!
//! - **Resource Catalog**: typed, hierarchical resource identities stored apart from business rows
//! - **Subject Codec**: roles scoped to a single resource instance
//! - **Policy Store**: casbin-backed grants and group memberships per domain
//! - **Authorization Engine**: role and access checks, and creation sagas with compensation
//! - **Access Middleware**: tower layer gating requests on boolean role expressions
//! - **Telemetry**: structured logging through `tracing`

pub mod config;
pub mod db;
pub mod error;
pub mod rbac;
pub mod telemetry;

pub use error::{ErrorCode, ErrorDetails, ErrorKind, ErrorSeverity, Result, WardenError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::db::{Database, MemoryStorage, PgPolicyBackend, PgStorage, Storage, StorageTx};
    pub use crate::error::{
        ErrorCode, ErrorDetails, ErrorKind, ErrorSeverity, NotFoundKind, Result, WardenError,
    };
    pub use crate::rbac::{
        AccessChecker, AccessContext, AccessLayer, Action, AuthIdentity, AuthzEngine,
        CasbinPolicyStore, CompoundSubject, CreatedResource, DomainId, Gate, Grant, GrantPlan,
        Membership, MemoryPolicyBackend, PolicyStore, PredefinedRole, Resource, ResourceSpec,
        RoleExpression, RoleId, RoleSubject, Selector, Subject, UserId,
    };
}
