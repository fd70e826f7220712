//! Storage traits for the resource catalog and business rows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::rbac::models::{
    Domain, NewResource, Resource, ResourceType, Role, Selector, User, UserId,
};

/// Kind of business entity created together with its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Company,
    Project,
}

impl EntityKind {
    /// Resource type value of the entity's catalog entry.
    pub const fn type_value(&self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Project => "project",
        }
    }
}

/// A company or project row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntity {
    pub kind: EntityKind,
    pub uuid: String,
    pub title: String,
    pub description: String,
    /// Owning company uuid, required for projects.
    pub company_uuid: Option<String>,
    pub created_by: UserId,
}

/// Read access to the catalog plus transaction entry.
#[async_trait]
pub trait Storage: Send + Sync {
    type Tx: StorageTx;

    /// Open a storage transaction.
    async fn begin(&self) -> Result<Self::Tx>;

    async fn find_role(&self, selector: &Selector) -> Result<Option<Role>>;

    async fn find_user(&self, selector: &Selector) -> Result<Option<User>>;

    async fn find_domain(&self, selector: &Selector) -> Result<Option<Domain>>;

    async fn find_resource_type(&self, selector: &Selector) -> Result<Option<ResourceType>>;

    async fn find_resource(&self, selector: &Selector) -> Result<Option<Resource>>;

    /// Resources, optionally restricted to one type value.
    async fn list_resources(&self, type_value: Option<&str>) -> Result<Vec<Resource>>;

    async fn list_roles(&self) -> Result<Vec<Role>>;

    /// Ancestors of a resource, nearest first.
    async fn ancestors(&self, uuid: &str) -> Result<Vec<Resource>>;

    /// Insert a domain unless one with this value exists.
    async fn seed_domain(&self, value: &str) -> Result<Domain>;

    /// Insert a role unless one with this value exists.
    async fn seed_role(&self, value: &str) -> Result<Role>;

    /// Insert a resource type unless one with this value exists.
    async fn seed_resource_type(&self, value: &str) -> Result<ResourceType>;

    /// Insert a user unless one with this email exists.
    async fn seed_user(&self, email: &str) -> Result<User>;

    /// Look up a resource; with `must_exist`, a miss is `NotFound`.
    async fn get_resource(&self, selector: &Selector, must_exist: bool) -> Result<Option<Resource>> {
        match self.find_resource(selector).await? {
            Some(resource) => Ok(Some(resource)),
            None if must_exist => Err(WardenError::resource_not_found(selector)),
            None => Ok(None),
        }
    }

    async fn require_role(&self, selector: &Selector) -> Result<Role> {
        self.find_role(selector)
            .await?
            .ok_or_else(|| WardenError::role_not_found(selector.to_string()))
    }

    async fn require_user(&self, selector: &Selector) -> Result<User> {
        self.find_user(selector)
            .await?
            .ok_or_else(|| WardenError::user_not_found(selector))
    }

    async fn require_domain(&self, selector: &Selector) -> Result<Domain> {
        self.find_domain(selector)
            .await?
            .ok_or_else(|| WardenError::domain_not_found(selector))
    }
}

/// Writes that must commit or roll back together.
#[async_trait]
pub trait StorageTx: Send {
    /// Insert a company or project row, returning its id.
    async fn insert_entity(&mut self, entity: &NewEntity) -> Result<i64>;

    /// Register a resource.
    ///
    /// Fails `ResourceTypeNotFound` for an unknown type, `ParentNotFound` for
    /// an unknown parent, `InvalidHierarchy` for an incompatible parent and
    /// `DuplicateResource` for a uuid already in use.
    async fn add_resource(&mut self, resource: &NewResource) -> Result<Resource>;

    async fn find_user(&mut self, selector: &Selector) -> Result<Option<User>>;

    async fn find_resource(&mut self, selector: &Selector) -> Result<Option<Resource>>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
