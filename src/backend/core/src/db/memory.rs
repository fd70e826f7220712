//! In-process storage.
//!
//! Committed state sits behind one lock. A transaction stages its writes and
//! applies them on commit, re-checking uniqueness against whatever other
//! transactions committed in the meantime.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::storage::{EntityKind, NewEntity, Storage, StorageTx};
use crate::error::{Result, WardenError};
use crate::rbac::hierarchy::{HierarchyRules, ResourceForest};
use crate::rbac::models::{
    Domain, DomainId, NewResource, Resource, ResourceId, ResourceType, ResourceTypeId, Role,
    RoleId, Selector, User, UserId,
};

#[derive(Debug, Clone)]
struct EntityRow {
    id: i64,
    kind: EntityKind,
    uuid: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    domains: Vec<Domain>,
    users: Vec<User>,
    roles: Vec<Role>,
    types: Vec<ResourceType>,
    forest: ResourceForest,
    entities: Vec<EntityRow>,
}

impl MemoryState {
    fn role(&self, selector: &Selector) -> Option<Role> {
        self.roles
            .iter()
            .find(|r| match selector {
                Selector::ById(id) => r.id.get() == *id,
                Selector::ByUuid(uuid) => r.uuid.to_string() == *uuid,
                Selector::ByValue(value) => r.value == *value,
            })
            .cloned()
    }

    fn user(&self, selector: &Selector) -> Option<User> {
        self.users
            .iter()
            .find(|u| match selector {
                Selector::ById(id) => u.id.get() == *id,
                Selector::ByUuid(uuid) => u.uuid.to_string() == *uuid,
                Selector::ByValue(email) => u.email == *email,
            })
            .cloned()
    }

    fn domain(&self, selector: &Selector) -> Option<Domain> {
        self.domains
            .iter()
            .find(|d| match selector {
                Selector::ById(id) => d.id.get() == *id,
                Selector::ByUuid(_) => false,
                Selector::ByValue(value) => d.value == *value,
            })
            .cloned()
    }

    fn resource_type(&self, selector: &Selector) -> Option<ResourceType> {
        self.types
            .iter()
            .find(|t| match selector {
                Selector::ById(id) => t.id.get() == *id,
                Selector::ByUuid(_) => false,
                Selector::ByValue(value) => t.value == *value,
            })
            .cloned()
    }

    fn resource(&self, selector: &Selector) -> Option<Resource> {
        match selector {
            Selector::ById(id) => self.forest.get(ResourceId(*id)).cloned(),
            Selector::ByUuid(uuid) | Selector::ByValue(uuid) => {
                self.forest.get_by_uuid(uuid).cloned()
            }
        }
    }
}

/// Storage kept entirely in process memory. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    state: Arc<RwLock<MemoryState>>,
    rules: Arc<HierarchyRules>,
    next_id: Arc<AtomicI64>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(HierarchyRules::default())
    }
}

impl MemoryStorage {
    pub fn new(rules: HierarchyRules) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            rules: Arc::new(rules),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Keep generated ids clear of an explicitly chosen one.
    fn reserve_id(&self, id: i64) {
        self.next_id.fetch_max(id + 1, Ordering::Relaxed);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fixtures with explicit ids
    // ─────────────────────────────────────────────────────────────────────────

    pub fn insert_role(&self, role: Role) {
        self.reserve_id(role.id.get());
        self.state.write().roles.push(role);
    }

    pub fn insert_user(&self, user: User) {
        self.reserve_id(user.id.get());
        self.state.write().users.push(user);
    }

    pub fn insert_domain(&self, domain: Domain) {
        self.reserve_id(domain.id.get());
        self.state.write().domains.push(domain);
    }

    /// Insert a resource row directly, outside any transaction.
    pub fn insert_resource(&self, resource: Resource) -> Result<()> {
        self.reserve_id(resource.id.get());
        self.state.write().forest.insert(resource)
    }

    pub fn resource_count(&self) -> usize {
        self.state.read().forest.len()
    }

    pub fn entity_count(&self) -> usize {
        self.state.read().entities.len()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        Ok(MemoryTx {
            storage: self.clone(),
            entities: Vec::new(),
            resources: Vec::new(),
        })
    }

    async fn find_role(&self, selector: &Selector) -> Result<Option<Role>> {
        Ok(self.state.read().role(selector))
    }

    async fn find_user(&self, selector: &Selector) -> Result<Option<User>> {
        Ok(self.state.read().user(selector))
    }

    async fn find_domain(&self, selector: &Selector) -> Result<Option<Domain>> {
        Ok(self.state.read().domain(selector))
    }

    async fn find_resource_type(&self, selector: &Selector) -> Result<Option<ResourceType>> {
        Ok(self.state.read().resource_type(selector))
    }

    async fn find_resource(&self, selector: &Selector) -> Result<Option<Resource>> {
        Ok(self.state.read().resource(selector))
    }

    async fn list_resources(&self, type_value: Option<&str>) -> Result<Vec<Resource>> {
        let state = self.state.read();
        Ok(state
            .forest
            .iter()
            .filter(|r| type_value.map_or(true, |t| r.type_value == t))
            .cloned()
            .collect())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        Ok(self.state.read().roles.clone())
    }

    async fn ancestors(&self, uuid: &str) -> Result<Vec<Resource>> {
        let state = self.state.read();
        let resource = state
            .forest
            .get_by_uuid(uuid)
            .ok_or_else(|| WardenError::resource_not_found(Selector::uuid(uuid)))?;
        Ok(state
            .forest
            .ancestors(resource.id)?
            .into_iter()
            .cloned()
            .collect())
    }

    async fn seed_domain(&self, value: &str) -> Result<Domain> {
        if let Some(domain) = self.state.read().domain(&Selector::value(value)) {
            return Ok(domain);
        }
        let domain = Domain {
            id: DomainId(self.allocate_id()),
            value: value.to_string(),
        };
        self.state.write().domains.push(domain.clone());
        Ok(domain)
    }

    async fn seed_role(&self, value: &str) -> Result<Role> {
        if let Some(role) = self.state.read().role(&Selector::value(value)) {
            return Ok(role);
        }
        let role = Role {
            id: RoleId(self.allocate_id()),
            uuid: Uuid::new_v4(),
            value: value.to_string(),
        };
        self.state.write().roles.push(role.clone());
        Ok(role)
    }

    async fn seed_resource_type(&self, value: &str) -> Result<ResourceType> {
        if let Some(resource_type) = self.state.read().resource_type(&Selector::value(value)) {
            return Ok(resource_type);
        }
        let resource_type = ResourceType {
            id: ResourceTypeId(self.allocate_id()),
            value: value.to_string(),
        };
        self.state.write().types.push(resource_type.clone());
        Ok(resource_type)
    }

    async fn seed_user(&self, email: &str) -> Result<User> {
        if let Some(user) = self.state.read().user(&Selector::value(email)) {
            return Ok(user);
        }
        let user = User {
            id: UserId(self.allocate_id()),
            uuid: Uuid::new_v4(),
            email: email.to_string(),
        };
        self.state.write().users.push(user.clone());
        Ok(user)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Transaction
// ═══════════════════════════════════════════════════════════════════════════════

/// Staged writes against a [`MemoryStorage`].
#[derive(Debug)]
pub struct MemoryTx {
    storage: MemoryStorage,
    entities: Vec<EntityRow>,
    resources: Vec<Resource>,
}

impl MemoryTx {
    fn staged_resource(&self, selector: &Selector) -> Option<Resource> {
        self.resources
            .iter()
            .find(|r| match selector {
                Selector::ById(id) => r.id.get() == *id,
                Selector::ByUuid(uuid) | Selector::ByValue(uuid) => r.uuid == *uuid,
            })
            .cloned()
    }

    fn visible_resource(&self, selector: &Selector) -> Option<Resource> {
        self.staged_resource(selector)
            .or_else(|| self.storage.state.read().resource(selector))
    }
}

#[async_trait]
impl StorageTx for MemoryTx {
    async fn insert_entity(&mut self, entity: &NewEntity) -> Result<i64> {
        let taken = self.entities.iter().any(|e| e.uuid == entity.uuid)
            || self
                .storage
                .state
                .read()
                .entities
                .iter()
                .any(|e| e.uuid == entity.uuid);
        if taken {
            return Err(WardenError::duplicate_resource(&entity.uuid));
        }

        if entity.kind == EntityKind::Project {
            let company = entity
                .company_uuid
                .as_deref()
                .ok_or_else(|| WardenError::invalid_input("a project requires a company"))?;
            let known = self
                .entities
                .iter()
                .chain(self.storage.state.read().entities.iter())
                .any(|e| e.kind == EntityKind::Company && e.uuid == company);
            if !known {
                return Err(WardenError::resource_not_found(Selector::uuid(company)));
            }
        }

        let id = self.storage.allocate_id();
        self.entities.push(EntityRow {
            id,
            kind: entity.kind,
            uuid: entity.uuid.clone(),
        });
        Ok(id)
    }

    async fn add_resource(&mut self, new: &NewResource) -> Result<Resource> {
        let resource_type = self
            .storage
            .state
            .read()
            .resource_type(&Selector::value(&new.type_value))
            .ok_or_else(|| WardenError::resource_type_not_found(&new.type_value))?;

        let parent = match &new.parent_uuid {
            Some(uuid) => Some(
                self.visible_resource(&Selector::uuid(uuid))
                    .ok_or_else(|| WardenError::parent_not_found(uuid))?,
            ),
            None => None,
        };

        self.storage.rules.check(
            &resource_type.value,
            parent.as_ref().map(|p| p.type_value.as_str()),
        )?;

        if self.visible_resource(&Selector::uuid(&new.uuid)).is_some() {
            return Err(WardenError::duplicate_resource(&new.uuid));
        }

        let resource = Resource {
            id: ResourceId(self.storage.allocate_id()),
            uuid: new.uuid.clone(),
            description: new.description.clone(),
            parent_id: parent.map(|p| p.id),
            type_id: resource_type.id,
            type_value: resource_type.value,
        };
        self.resources.push(resource.clone());
        Ok(resource)
    }

    async fn find_user(&mut self, selector: &Selector) -> Result<Option<User>> {
        self.storage.find_user(selector).await
    }

    async fn find_resource(&mut self, selector: &Selector) -> Result<Option<Resource>> {
        Ok(self.visible_resource(selector))
    }

    async fn commit(self) -> Result<()> {
        let mut state = self.storage.state.write();

        for entity in &self.entities {
            if state.entities.iter().any(|e| e.uuid == entity.uuid) {
                return Err(WardenError::duplicate_resource(&entity.uuid));
            }
        }
        for resource in &self.resources {
            if state.forest.get_by_uuid(&resource.uuid).is_some() {
                return Err(WardenError::duplicate_resource(&resource.uuid));
            }
        }

        // Staged parents precede their children, so forest inserts succeed in order.
        let mut forest = state.forest.clone();
        for resource in self.resources {
            forest.insert(resource)?;
        }
        state.forest = forest;
        state.entities.extend(self.entities);

        debug!("Memory transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        debug!(
            entities = self.entities.len(),
            resources = self.resources.len(),
            "Memory transaction rolled back"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    async fn seeded() -> MemoryStorage {
        let storage = MemoryStorage::default();
        for value in ["company", "project", "worker"] {
            storage.seed_resource_type(value).await.unwrap();
        }
        storage
    }

    fn new_resource(type_value: &str, uuid: &str, parent: Option<&str>) -> NewResource {
        NewResource {
            type_value: type_value.to_string(),
            uuid: uuid.to_string(),
            description: format!("{} {}", type_value, uuid),
            parent_uuid: parent.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_add_resource_visible_after_commit() {
        let storage = seeded().await;
        let mut tx = storage.begin().await.unwrap();
        let company = tx.add_resource(&new_resource("company", "C1", None)).await.unwrap();
        let project = tx
            .add_resource(&new_resource("project", "P1", Some("C1")))
            .await
            .unwrap();
        assert_eq!(project.parent_id, Some(company.id));

        assert!(storage.find_resource(&Selector::uuid("C1")).await.unwrap().is_none());
        tx.commit().await.unwrap();

        let ancestors = storage.ancestors("P1").await.unwrap();
        assert_eq!(ancestors.len(), 1);
        assert_eq!(ancestors[0].uuid, "C1");
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let storage = seeded().await;
        let mut tx = storage.begin().await.unwrap();
        tx.add_resource(&new_resource("company", "C1", None)).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(storage.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_add_resource_errors() {
        let storage = seeded().await;
        let mut tx = storage.begin().await.unwrap();

        let err = tx
            .add_resource(&new_resource("invoice", "I1", None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceTypeNotFound);

        let err = tx
            .add_resource(&new_resource("project", "P1", Some("missing")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParentNotFound);

        tx.add_resource(&new_resource("company", "C1", None)).await.unwrap();
        tx.add_resource(&new_resource("project", "P1", Some("C1"))).await.unwrap();

        let err = tx
            .add_resource(&new_resource("project", "P2", Some("P1")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidHierarchy);

        let err = tx
            .add_resource(&new_resource("company", "C1", None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateResource);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_is_caught_on_commit() {
        let storage = seeded().await;
        let mut first = storage.begin().await.unwrap();
        let mut second = storage.begin().await.unwrap();

        first.add_resource(&new_resource("company", "C1", None)).await.unwrap();
        second.add_resource(&new_resource("company", "C1", None)).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateResource);
        assert_eq!(storage.resource_count(), 1);
    }

    #[tokio::test]
    async fn test_get_resource_must_exist() {
        let storage = seeded().await;
        assert!(storage
            .get_resource(&Selector::uuid("nope"), false)
            .await
            .unwrap()
            .is_none());

        let err = storage
            .get_resource(&Selector::uuid("nope"), true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceNotFound);
    }

    #[tokio::test]
    async fn test_project_entity_requires_company() {
        let storage = seeded().await;
        let mut tx = storage.begin().await.unwrap();
        let err = tx
            .insert_entity(&NewEntity {
                kind: EntityKind::Project,
                uuid: "P1".to_string(),
                title: "Tower".to_string(),
                description: String::new(),
                company_uuid: Some("C1".to_string()),
                created_by: UserId(1),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceNotFound);
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let storage = MemoryStorage::default();
        let first = storage.seed_role("builder_admin").await.unwrap();
        let second = storage.seed_role("builder_admin").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(storage.list_roles().await.unwrap().len(), 1);
    }
}
