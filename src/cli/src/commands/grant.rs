//! Grant and creation commands.
//!
//! Both run the engine's creation saga, so a partial failure is compensated
//! before the error is reported.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;
use warden_core::rbac::{AppliedPlan, GrantPlan, ResourcePermissions, ResourceSpec};

use super::access::resolve_user;
use super::Context;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct GrantArgs {
    /// Email of the user receiving access
    email: String,

    /// Raw role to place the user in
    #[arg(short, long)]
    role: Option<String>,

    /// Actions on a resource, as `RESOURCE=action,action`
    #[arg(short, long = "permit", value_name = "RESOURCE=ACTIONS", value_parser = parse_permissions)]
    permits: Vec<ResourcePermissions>,
}

#[derive(Subcommand)]
pub enum CreateCommands {
    /// Register a company; the creator and an optional admin receive access
    Company {
        /// Company uuid
        uuid: String,
        /// Display title
        title: String,
        /// User id or email of the creator
        #[arg(long)]
        creator: String,
        /// Email of the user to administer the company as builder_admin
        #[arg(long)]
        admin: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Register a project under a company
    Project {
        /// Project uuid
        uuid: String,
        /// Display title
        title: String,
        /// Owning company uuid
        #[arg(long)]
        company: String,
        /// User id or email of the creator
        #[arg(long)]
        creator: String,
        /// Email of the user to run the project as builder_manager
        #[arg(long)]
        manager: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
    },
}

#[derive(Tabled, Serialize)]
struct AppliedRow {
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Subject")]
    subject: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Action")]
    action: String,
}

fn parse_permissions(s: &str) -> std::result::Result<ResourcePermissions, String> {
    let (resource, actions) = s
        .split_once('=')
        .ok_or_else(|| format!("expected RESOURCE=ACTIONS, got '{}'", s))?;
    if resource.is_empty() {
        return Err("resource must not be empty".to_string());
    }
    Ok(ResourcePermissions {
        resource_uuid: resource.to_string(),
        actions: actions
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

pub async fn grant(args: GrantArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    if args.role.is_none() && args.permits.is_empty() {
        return Err(anyhow!("nothing to grant: pass --role or --permit"));
    }

    let domain = ctx.domain().await?;
    let applied = ctx
        .engine
        .assign_permissions(domain.id, &args.email, args.role.as_deref(), &args.permits)
        .await?;

    print_applied(&applied, format)?;
    if matches!(format, OutputFormat::Table) {
        output::print_success(&format!(
            "{} grant(s) and {} membership(s) added for {}",
            applied.grants.len(),
            applied.memberships.len(),
            args.email
        ));
    }
    Ok(())
}

pub async fn create(cmd: CreateCommands, ctx: &Context, format: OutputFormat) -> Result<()> {
    let (spec, plan, creator) = match cmd {
        CreateCommands::Company {
            uuid,
            title,
            creator,
            admin,
            description,
        } => (
            ResourceSpec::company(uuid, title, description),
            admin.map_or_else(GrantPlan::creator_only, GrantPlan::company),
            creator,
        ),
        CreateCommands::Project {
            uuid,
            title,
            company,
            creator,
            manager,
            description,
        } => (
            ResourceSpec::project(uuid, title, description, company),
            manager.map_or_else(GrantPlan::creator_only, GrantPlan::project),
            creator,
        ),
    };

    let domain = ctx.domain().await?;
    let creator = resolve_user(ctx, &creator).await?;
    let created = ctx
        .engine
        .create_tenant_resource(creator.id, domain.id, &spec, &plan)
        .await?;

    match format {
        OutputFormat::Table => {
            output::print_header("Created");
            output::print_detail("Resource", &created.resource.uuid);
            output::print_detail("Type", &created.resource.type_value);
            output::print_detail("Resource ID", &created.resource.id.to_string());
            output::print_detail("Entity ID", &created.entity_id.to_string());
            println!();
            print_applied(&created.applied, format)?;
            let actions: Vec<&str> = plan.creator_actions.iter().map(|a| a.as_str()).collect();
            output::print_info(&format!("Creator {} holds {}", creator.email, actions.join(", ")));
            Ok(())
        }
        _ => output::print_item(&created, format),
    }
}

fn print_applied(applied: &AppliedPlan, format: OutputFormat) -> Result<()> {
    let mut rows: Vec<AppliedRow> = applied
        .grants
        .iter()
        .map(|g| AppliedRow {
            kind: "grant",
            subject: g.subject.to_string(),
            target: g.resource.clone(),
            action: g.action.to_string(),
        })
        .collect();
    rows.extend(applied.memberships.iter().map(|m| AppliedRow {
        kind: "membership",
        subject: m.subject.to_string(),
        target: m.role.to_string(),
        action: "-".to_string(),
    }));
    output::print_list(&rows, format)
}
