//! Subcommand implementations.

pub mod access;
pub mod catalog;
pub mod grant;
pub mod subject;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use warden_core::config::Config;
use warden_core::db::{Database, PgStorage, Storage};
use warden_core::rbac::{AuthzEngine, CasbinPolicyStore, Domain, Selector};
use warden_core::telemetry::init_logging;

/// Everything a database-backed command needs.
pub struct Context {
    pub database: Database,
    pub engine: AuthzEngine<PgStorage>,
    domain: String,
}

impl Context {
    /// Load configuration, install logging and open the policy store.
    pub async fn connect(config_path: Option<&str>, domain: Option<&str>) -> Result<Self> {
        let config = match config_path {
            Some(path) => Config::from_file(path)?,
            None => Config::load().context("WARDEN__DATABASE__URL must be set")?,
        };
        init_logging(&config.logging)?;

        let database = Database::new(&config.database)
            .await
            .context("Failed to connect to the database")?;
        let policy = CasbinPolicyStore::new(Arc::new(database.policy_backend())).await?;
        let engine =
            AuthzEngine::with_config(Arc::new(database.storage()), Arc::new(policy), &config.policy);

        Ok(Self {
            database,
            engine,
            domain: domain.map(str::to_string).unwrap_or(config.tenant.domain),
        })
    }

    /// Value of the domain commands operate in.
    pub fn domain_value(&self) -> &str {
        &self.domain
    }

    /// Resolve the domain; it must have been seeded.
    pub async fn domain(&self) -> Result<Domain> {
        let domain = self
            .engine
            .storage()
            .require_domain(&Selector::value(&self.domain))
            .await?;
        Ok(domain)
    }
}
