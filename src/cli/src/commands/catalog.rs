//! Catalog commands: migrations, seeding and the resource listing.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use warden_core::db::Storage;
use warden_core::rbac::{PredefinedRole, Resource, ResourceForest, DEFAULT_RESOURCE_TYPES};

use super::Context;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct SeedArgs {
    /// Extra resource types to register besides the defaults
    #[arg(long = "resource-type", value_name = "TYPE")]
    resource_types: Vec<String>,

    /// Users to register by email
    #[arg(long = "user", value_name = "EMAIL")]
    users: Vec<String>,
}

#[derive(Args)]
pub struct ResourcesArgs {
    /// Only list resources of this type
    #[arg(short = 't', long = "type")]
    type_value: Option<String>,
}

#[derive(Tabled, Serialize)]
struct SeededRow {
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled, Serialize)]
struct ResourceRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Resource")]
    uuid: String,
    #[tabled(rename = "Type")]
    type_value: String,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "Description")]
    description: String,
}

pub async fn migrate(ctx: &Context) -> Result<()> {
    ctx.database.migrate().await?;
    output::print_success("Migrations applied");
    Ok(())
}

/// Idempotently register the domain, predefined roles and resource types.
pub async fn seed(args: SeedArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    let storage = ctx.engine.storage();
    let mut rows = Vec::new();

    let domain = storage.seed_domain(ctx.domain_value()).await?;
    rows.push(SeededRow {
        kind: "domain",
        id: domain.id.get(),
        value: domain.value,
    });

    for value in PredefinedRole::all_values() {
        let role = storage.seed_role(value).await?;
        rows.push(SeededRow {
            kind: "role",
            id: role.id.get(),
            value: role.value,
        });
    }

    let types = DEFAULT_RESOURCE_TYPES
        .iter()
        .map(|t| t.to_string())
        .chain(args.resource_types);
    for value in types {
        let resource_type = storage.seed_resource_type(&value).await?;
        rows.push(SeededRow {
            kind: "resource_type",
            id: resource_type.id.get(),
            value: resource_type.value,
        });
    }

    for email in args.users {
        let user = storage.seed_user(&email).await?;
        rows.push(SeededRow {
            kind: "user",
            id: user.id.get(),
            value: user.email,
        });
    }

    ctx.engine.clear_role_cache();
    output::print_list(&rows, format)?;
    if matches!(format, OutputFormat::Table) {
        output::print_success(&format!("Seeded domain '{}'", ctx.domain_value()));
    }
    Ok(())
}

/// List resources depth-first, each root followed by its descendants.
pub async fn resources(args: ResourcesArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    let storage = ctx.engine.storage();
    let listed = storage.list_resources(args.type_value.as_deref()).await?;

    let rows: Vec<ResourceRow> = match args.type_value {
        Some(_) => listed.iter().map(|r| row(r, None, 0)).collect(),
        None => {
            let forest = ResourceForest::from_resources(listed)?;
            let mut rows = Vec::with_capacity(forest.len());
            for root in forest.roots() {
                walk(&forest, root, 0, &mut rows);
            }
            rows
        }
    };

    output::print_list(&rows, format)
}

fn walk(forest: &ResourceForest, resource: &Resource, depth: usize, rows: &mut Vec<ResourceRow>) {
    let parent = forest.parent_of(resource.id);
    rows.push(row(resource, parent, depth));
    for child in forest.children(resource.id) {
        walk(forest, child, depth + 1, rows);
    }
}

fn row(resource: &Resource, parent: Option<&Resource>, depth: usize) -> ResourceRow {
    ResourceRow {
        id: resource.id.get(),
        uuid: format!("{}{}", "  ".repeat(depth), resource.uuid),
        type_value: resource.type_value.clone(),
        parent: parent.map(|p| p.uuid.clone()).unwrap_or_else(|| "-".to_string()),
        description: resource.description.clone(),
    }
}
