//! Access check commands.

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use warden_core::db::Storage;
use warden_core::rbac::{Action, RoleExpression, Selector, User};

use super::Context;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct CheckAccessArgs {
    /// User id or email
    user: String,
    /// Resource uuid
    resource: String,
    /// Action (create, read, modify, delete, administration, management)
    action: Action,
}

#[derive(Args)]
pub struct CheckRoleArgs {
    /// User id or email
    user: String,

    /// Role values; more than one requires --expr
    #[arg(required = true)]
    roles: Vec<String>,

    /// Combine several roles with AND or OR
    #[arg(short, long)]
    expr: Option<RoleExpression>,

    /// Check the role scoped to this resource instead of the raw role
    #[arg(short, long, conflicts_with = "expr")]
    resource: Option<String>,
}

#[derive(Args)]
pub struct RolesArgs {
    /// User id or email
    user: String,

    /// Also list resources the user can reach
    #[arg(long)]
    resources: bool,
}

#[derive(Serialize)]
struct Verdict {
    user_id: i64,
    domain: String,
    query: String,
    allowed: bool,
}

#[derive(Tabled, Serialize)]
struct RoleRow {
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Role ID")]
    role_id: i64,
    #[tabled(rename = "Scope")]
    scope: String,
}

#[derive(Tabled, Serialize)]
struct ReachableRow {
    #[tabled(rename = "Resource")]
    uuid: String,
    #[tabled(rename = "Type")]
    type_value: String,
}

/// Resolve a user by numeric id or by email.
pub(super) async fn resolve_user(ctx: &Context, user: &str) -> Result<User> {
    let selector = match user.parse::<i64>() {
        Ok(id) => Selector::id(id),
        Err(_) => Selector::value(user),
    };
    Ok(ctx.engine.storage().require_user(&selector).await?)
}

pub async fn check_access(args: CheckAccessArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    let domain = ctx.domain().await?;
    let user = resolve_user(ctx, &args.user).await?;

    let allowed = ctx
        .engine
        .check_access(user.id, domain.id, &args.resource, args.action)
        .await?;

    report(
        Verdict {
            user_id: user.id.get(),
            domain: domain.value,
            query: format!("{} on {}", args.action, args.resource),
            allowed,
        },
        format,
    )
}

pub async fn check_role(args: CheckRoleArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    let domain = ctx.domain().await?;
    let user = resolve_user(ctx, &args.user).await?;

    let (query, allowed) = match (args.expr, args.resource, args.roles.as_slice()) {
        (Some(expr), None, roles) => {
            let allowed = ctx
                .engine
                .check_role_expression(expr, user.id, domain.id, roles)
                .await?;
            (format!("{}({})", expr, roles.join(", ")), allowed)
        }
        (None, Some(resource), [role]) => {
            let allowed = ctx
                .engine
                .check_scoped_role(user.id, domain.id, role, &resource)
                .await?;
            (format!("role {} on {}", role, resource), allowed)
        }
        (None, None, [role]) => {
            let allowed = ctx.engine.check_role(user.id, domain.id, role).await?;
            (format!("role {}", role), allowed)
        }
        _ => bail!("checking several roles requires --expr AND|OR"),
    };

    report(
        Verdict {
            user_id: user.id.get(),
            domain: domain.value,
            query,
            allowed,
        },
        format,
    )
}

pub async fn roles(args: RolesArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    let domain = ctx.domain().await?;
    let user = resolve_user(ctx, &args.user).await?;

    let rows: Vec<RoleRow> = ctx
        .engine
        .roles_for_user(user.id, domain.id)
        .await?
        .into_iter()
        .map(|assignment| RoleRow {
            role: assignment.role.value,
            role_id: assignment.role.id.get(),
            scope: assignment.resource_uuid.unwrap_or_else(|| "domain".to_string()),
        })
        .collect();
    output::print_list(&rows, format)?;

    if args.resources {
        let reachable: Vec<ReachableRow> = ctx
            .engine
            .accessible_resources(user.id, domain.id, None, &[])
            .await?
            .into_iter()
            .map(|resource| ReachableRow {
                uuid: resource.uuid,
                type_value: resource.type_value,
            })
            .collect();
        if matches!(format, OutputFormat::Table) {
            output::print_header("Reachable resources");
        }
        output::print_list(&reachable, format)?;
    }

    Ok(())
}

fn report(verdict: Verdict, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            let msg = format!(
                "user {} in domain '{}': {}",
                verdict.user_id, verdict.domain, verdict.query
            );
            output::print_verdict(verdict.allowed, &msg);
            Ok(())
        }
        _ => output::print_item(&verdict, format),
    }
}
