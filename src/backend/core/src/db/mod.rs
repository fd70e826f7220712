//! Database layer for Warden.
//!
//! Uses PostgreSQL for persistent storage with sqlx. [`MemoryStorage`] and
//! [`MemoryPolicyBackend`](crate::rbac::store::MemoryPolicyBackend) stand in
//! for it in tests and single-process tools.

pub mod memory;
pub mod policy;
pub mod postgres;
pub mod storage;

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::Result;

pub use memory::{MemoryStorage, MemoryTx};
pub use policy::PgPolicyBackend;
pub use postgres::{PgStorage, PgTx};
pub use storage::{EntityKind, NewEntity, Storage, StorageTx};

/// Database connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Catalog storage over this pool.
    pub fn storage(&self) -> PgStorage {
        PgStorage::new(self.pool.clone())
    }

    /// Durable policy rows over this pool.
    pub fn policy_backend(&self) -> PgPolicyBackend {
        PgPolicyBackend::new(self.pool.clone())
    }
}
