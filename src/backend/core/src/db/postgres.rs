//! PostgreSQL storage.

use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::storage::{EntityKind, NewEntity, Storage, StorageTx};
use crate::error::{ErrorCode, Result, WardenError};
use crate::rbac::hierarchy::HierarchyRules;
use crate::rbac::models::{
    Domain, DomainId, NewResource, Resource, ResourceId, ResourceType, ResourceTypeId, Role,
    RoleId, Selector, User, UserId,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct DomainRow {
    id: i64,
    value: String,
}

impl From<DomainRow> for Domain {
    fn from(row: DomainRow) -> Self {
        Self {
            id: DomainId(row.id),
            value: row.value,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    uuid: Uuid,
    email: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: UserId(row.id),
            uuid: row.uuid,
            email: row.email,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    id: i64,
    uuid: Uuid,
    value: String,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Self {
            id: RoleId(row.id),
            uuid: row.uuid,
            value: row.value,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ResourceTypeRow {
    id: i64,
    value: String,
}

impl From<ResourceTypeRow> for ResourceType {
    fn from(row: ResourceTypeRow) -> Self {
        Self {
            id: ResourceTypeId(row.id),
            value: row.value,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ResourceRow {
    id: i64,
    value: String,
    description: String,
    parent_id: Option<i64>,
    resource_type_id: i64,
    type_value: String,
}

impl From<ResourceRow> for Resource {
    fn from(row: ResourceRow) -> Self {
        Self {
            id: ResourceId(row.id),
            uuid: row.value,
            description: row.description,
            parent_id: row.parent_id.map(ResourceId),
            type_id: ResourceTypeId(row.resource_type_id),
            type_value: row.type_value,
        }
    }
}

const RESOURCE_SELECT: &str = r#"
    SELECT r.id, r.value, r.description, r.parent_id, r.resource_type_id, t.value AS type_value
    FROM resources r
    JOIN resource_types t ON t.id = r.resource_type_id
"#;

// ═══════════════════════════════════════════════════════════════════════════════
// Queries shared by the pool and open transactions
// ═══════════════════════════════════════════════════════════════════════════════

async fn fetch_role<'e, E: PgExecutor<'e>>(executor: E, selector: &Selector) -> Result<Option<Role>> {
    let row = match selector {
        Selector::ById(id) => {
            sqlx::query_as::<_, RoleRow>("SELECT id, uuid, value FROM roles WHERE id = $1")
                .bind(*id)
                .fetch_optional(executor)
                .await?
        }
        Selector::ByUuid(uuid) => {
            sqlx::query_as::<_, RoleRow>("SELECT id, uuid, value FROM roles WHERE uuid::text = $1")
                .bind(uuid)
                .fetch_optional(executor)
                .await?
        }
        Selector::ByValue(value) => {
            sqlx::query_as::<_, RoleRow>("SELECT id, uuid, value FROM roles WHERE value = $1")
                .bind(value)
                .fetch_optional(executor)
                .await?
        }
    };
    Ok(row.map(Role::from))
}

async fn fetch_user<'e, E: PgExecutor<'e>>(executor: E, selector: &Selector) -> Result<Option<User>> {
    let row = match selector {
        Selector::ById(id) => {
            sqlx::query_as::<_, UserRow>("SELECT id, uuid, email FROM users WHERE id = $1")
                .bind(*id)
                .fetch_optional(executor)
                .await?
        }
        Selector::ByUuid(uuid) => {
            sqlx::query_as::<_, UserRow>("SELECT id, uuid, email FROM users WHERE uuid::text = $1")
                .bind(uuid)
                .fetch_optional(executor)
                .await?
        }
        Selector::ByValue(email) => {
            sqlx::query_as::<_, UserRow>("SELECT id, uuid, email FROM users WHERE email = $1")
                .bind(email)
                .fetch_optional(executor)
                .await?
        }
    };
    Ok(row.map(User::from))
}

async fn fetch_domain<'e, E: PgExecutor<'e>>(executor: E, selector: &Selector) -> Result<Option<Domain>> {
    let row = match selector {
        Selector::ById(id) => {
            sqlx::query_as::<_, DomainRow>("SELECT id, value FROM domains WHERE id = $1")
                .bind(*id)
                .fetch_optional(executor)
                .await?
        }
        Selector::ByUuid(_) => None,
        Selector::ByValue(value) => {
            sqlx::query_as::<_, DomainRow>("SELECT id, value FROM domains WHERE value = $1")
                .bind(value)
                .fetch_optional(executor)
                .await?
        }
    };
    Ok(row.map(Domain::from))
}

async fn fetch_resource_type<'e, E: PgExecutor<'e>>(
    executor: E,
    selector: &Selector,
) -> Result<Option<ResourceType>> {
    let row = match selector {
        Selector::ById(id) => {
            sqlx::query_as::<_, ResourceTypeRow>("SELECT id, value FROM resource_types WHERE id = $1")
                .bind(*id)
                .fetch_optional(executor)
                .await?
        }
        Selector::ByUuid(_) => None,
        Selector::ByValue(value) => {
            sqlx::query_as::<_, ResourceTypeRow>("SELECT id, value FROM resource_types WHERE value = $1")
                .bind(value)
                .fetch_optional(executor)
                .await?
        }
    };
    Ok(row.map(ResourceType::from))
}

/// A resource's uuid is stored in its `value` column.
async fn fetch_resource<'e, E: PgExecutor<'e>>(
    executor: E,
    selector: &Selector,
) -> Result<Option<Resource>> {
    let row = match selector {
        Selector::ById(id) => {
            sqlx::query_as::<_, ResourceRow>(&format!("{} WHERE r.id = $1", RESOURCE_SELECT))
                .bind(*id)
                .fetch_optional(executor)
                .await?
        }
        Selector::ByUuid(value) | Selector::ByValue(value) => {
            sqlx::query_as::<_, ResourceRow>(&format!("{} WHERE r.value = $1", RESOURCE_SELECT))
                .bind(value)
                .fetch_optional(executor)
                .await?
        }
    };
    Ok(row.map(Resource::from))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Storage
// ═══════════════════════════════════════════════════════════════════════════════

/// Storage over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
    rules: Arc<HierarchyRules>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self::with_rules(pool, HierarchyRules::default())
    }

    pub fn with_rules(pool: PgPool, rules: HierarchyRules) -> Self {
        Self {
            pool,
            rules: Arc::new(rules),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Storage for PgStorage {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx> {
        let tx = self.pool.begin().await?;
        Ok(PgTx {
            tx,
            rules: Arc::clone(&self.rules),
        })
    }

    async fn find_role(&self, selector: &Selector) -> Result<Option<Role>> {
        fetch_role(&self.pool, selector).await
    }

    async fn find_user(&self, selector: &Selector) -> Result<Option<User>> {
        fetch_user(&self.pool, selector).await
    }

    async fn find_domain(&self, selector: &Selector) -> Result<Option<Domain>> {
        fetch_domain(&self.pool, selector).await
    }

    async fn find_resource_type(&self, selector: &Selector) -> Result<Option<ResourceType>> {
        fetch_resource_type(&self.pool, selector).await
    }

    async fn find_resource(&self, selector: &Selector) -> Result<Option<Resource>> {
        fetch_resource(&self.pool, selector).await
    }

    async fn list_resources(&self, type_value: Option<&str>) -> Result<Vec<Resource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(&format!(
            "{} WHERE ($1::text IS NULL OR t.value = $1) ORDER BY r.id",
            RESOURCE_SELECT
        ))
        .bind(type_value)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Resource::from).collect())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>("SELECT id, uuid, value FROM roles ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    #[instrument(skip(self))]
    async fn ancestors(&self, uuid: &str) -> Result<Vec<Resource>> {
        let start = fetch_resource(&self.pool, &Selector::uuid(uuid))
            .await?
            .ok_or_else(|| WardenError::resource_not_found(Selector::uuid(uuid)))?;

        let mut visited = HashSet::from([start.id]);
        let mut chain = Vec::new();
        let mut next = start.parent_id;

        while let Some(parent_id) = next {
            if !visited.insert(parent_id) {
                return Err(WardenError::internal(format!(
                    "parent chain of resource {} does not terminate",
                    uuid
                )));
            }
            let parent = fetch_resource(&self.pool, &Selector::id(parent_id.get()))
                .await?
                .ok_or_else(|| WardenError::parent_not_found(parent_id.to_string()))?;
            next = parent.parent_id;
            chain.push(parent);
        }

        Ok(chain)
    }

    async fn seed_domain(&self, value: &str) -> Result<Domain> {
        let row = sqlx::query_as::<_, DomainRow>(
            r#"
            INSERT INTO domains (value) VALUES ($1)
            ON CONFLICT (value) DO UPDATE SET value = EXCLUDED.value
            RETURNING id, value
            "#,
        )
        .bind(value)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn seed_role(&self, value: &str) -> Result<Role> {
        let row = sqlx::query_as::<_, RoleRow>(
            r#"
            INSERT INTO roles (uuid, value) VALUES ($1, $2)
            ON CONFLICT (value) DO UPDATE SET value = EXCLUDED.value
            RETURNING id, uuid, value
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(value)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn seed_resource_type(&self, value: &str) -> Result<ResourceType> {
        let row = sqlx::query_as::<_, ResourceTypeRow>(
            r#"
            INSERT INTO resource_types (value) VALUES ($1)
            ON CONFLICT (value) DO UPDATE SET value = EXCLUDED.value
            RETURNING id, value
            "#,
        )
        .bind(value)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn seed_user(&self, email: &str) -> Result<User> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (uuid, email) VALUES ($1, $2)
            ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
            RETURNING id, uuid, email
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Transaction
// ═══════════════════════════════════════════════════════════════════════════════

/// An open PostgreSQL transaction. Dropping it without commit rolls back.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
    rules: Arc<HierarchyRules>,
}

#[async_trait]
impl StorageTx for PgTx {
    #[instrument(skip(self, entity), fields(kind = ?entity.kind, uuid = %entity.uuid))]
    async fn insert_entity(&mut self, entity: &NewEntity) -> Result<i64> {
        let id = match entity.kind {
            EntityKind::Company => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO companies (uuid, title, description, created_by)
                    VALUES ($1, $2, $3, $4)
                    RETURNING id
                    "#,
                )
                .bind(&entity.uuid)
                .bind(&entity.title)
                .bind(&entity.description)
                .bind(entity.created_by.get())
                .fetch_one(&mut *self.tx)
                .await?
            }
            EntityKind::Project => {
                let company_uuid = entity
                    .company_uuid
                    .as_deref()
                    .ok_or_else(|| WardenError::invalid_input("a project requires a company"))?;
                let company_id: i64 =
                    sqlx::query_scalar("SELECT id FROM companies WHERE uuid = $1")
                        .bind(company_uuid)
                        .fetch_optional(&mut *self.tx)
                        .await?
                        .ok_or_else(|| WardenError::resource_not_found(Selector::uuid(company_uuid)))?;

                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO projects (uuid, company_id, title, description, created_by)
                    VALUES ($1, $2, $3, $4, $5)
                    RETURNING id
                    "#,
                )
                .bind(&entity.uuid)
                .bind(company_id)
                .bind(&entity.title)
                .bind(&entity.description)
                .bind(entity.created_by.get())
                .fetch_one(&mut *self.tx)
                .await?
            }
        };

        debug!(id, "Entity inserted");
        Ok(id)
    }

    #[instrument(skip(self, new), fields(uuid = %new.uuid, type_value = %new.type_value))]
    async fn add_resource(&mut self, new: &NewResource) -> Result<Resource> {
        let resource_type = fetch_resource_type(&mut *self.tx, &Selector::value(&new.type_value))
            .await?
            .ok_or_else(|| WardenError::resource_type_not_found(&new.type_value))?;

        let parent = match &new.parent_uuid {
            Some(uuid) => Some(
                fetch_resource(&mut *self.tx, &Selector::uuid(uuid))
                    .await?
                    .ok_or_else(|| WardenError::parent_not_found(uuid))?,
            ),
            None => None,
        };

        self.rules.check(
            &resource_type.value,
            parent.as_ref().map(|p| p.type_value.as_str()),
        )?;

        if fetch_resource(&mut *self.tx, &Selector::uuid(&new.uuid))
            .await?
            .is_some()
        {
            return Err(WardenError::duplicate_resource(&new.uuid));
        }

        let parent_id = parent.as_ref().map(|p| p.id);
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO resources (value, description, parent_id, resource_type_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&new.uuid)
        .bind(&new.description)
        .bind(parent_id.map(|p| p.get()))
        .bind(resource_type.id.get())
        .fetch_one(&mut *self.tx)
        .await?;

        debug!(id, "Resource registered");
        Ok(Resource {
            id: ResourceId(id),
            uuid: new.uuid.clone(),
            description: new.description.clone(),
            parent_id,
            type_id: resource_type.id,
            type_value: resource_type.value,
        })
    }

    async fn find_user(&mut self, selector: &Selector) -> Result<Option<User>> {
        fetch_user(&mut *self.tx, selector).await
    }

    async fn find_resource(&mut self, selector: &Selector) -> Result<Option<Resource>> {
        fetch_resource(&mut *self.tx, selector).await
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(|e| {
            WardenError::with_internal(
                ErrorCode::DatabaseTransactionFailed,
                "The transaction could not be committed",
                e.to_string(),
            )
            .with_source(e)
        })
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
