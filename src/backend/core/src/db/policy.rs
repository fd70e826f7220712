//! Durable grant and membership tables.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::rbac::models::{DomainId, Grant, Membership};
use crate::rbac::store::PolicyBackend;

#[derive(Debug, sqlx::FromRow)]
struct GrantRow {
    subject: String,
    domain_id: i64,
    resource: String,
    action: String,
}

impl GrantRow {
    fn into_grant(self) -> Result<Grant> {
        Ok(Grant {
            subject: self.subject.parse()?,
            domain: DomainId(self.domain_id),
            resource: self.resource,
            action: self.action.parse()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MembershipRow {
    subject: String,
    role_subject: String,
    domain_id: i64,
}

impl MembershipRow {
    fn into_membership(self) -> Result<Membership> {
        Ok(Membership {
            subject: self.subject.parse()?,
            role: self.role_subject.parse()?,
            domain: DomainId(self.domain_id),
        })
    }
}

/// Policy rows stored in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgPolicyBackend {
    pool: PgPool,
}

impl PgPolicyBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyBackend for PgPolicyBackend {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<(Vec<Grant>, Vec<Membership>)> {
        let grants = sqlx::query_as::<_, GrantRow>(
            "SELECT subject, domain_id, resource, action FROM grants",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(GrantRow::into_grant)
        .collect::<Result<Vec<_>>>()?;

        let memberships = sqlx::query_as::<_, MembershipRow>(
            "SELECT subject, role_subject, domain_id FROM group_memberships",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(MembershipRow::into_membership)
        .collect::<Result<Vec<_>>>()?;

        debug!(grants = grants.len(), memberships = memberships.len(), "Policy rows loaded");
        Ok((grants, memberships))
    }

    async fn insert_grants(&self, grants: &[Grant]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for grant in grants {
            sqlx::query(
                r#"
                INSERT INTO grants (subject, domain_id, resource, action)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(grant.subject.to_string())
            .bind(grant.domain.get())
            .bind(&grant.resource)
            .bind(grant.action.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_grants(&self, grants: &[Grant]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for grant in grants {
            sqlx::query(
                r#"
                DELETE FROM grants
                WHERE subject = $1 AND domain_id = $2 AND resource = $3 AND action = $4
                "#,
            )
            .bind(grant.subject.to_string())
            .bind(grant.domain.get())
            .bind(&grant.resource)
            .bind(grant.action.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_membership(&self, membership: &Membership) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO group_memberships (subject, role_subject, domain_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(membership.subject.to_string())
        .bind(membership.role.to_string())
        .bind(membership.domain.get())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_membership(&self, membership: &Membership) -> Result<()> {
        sqlx::query(
            "DELETE FROM group_memberships WHERE subject = $1 AND role_subject = $2 AND domain_id = $3",
        )
        .bind(membership.subject.to_string())
        .bind(membership.role.to_string())
        .bind(membership.domain.get())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
