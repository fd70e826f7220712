//! Warden CLI - operator tooling for the Warden authorization core.
//!
//! Provides commands for migrations, catalog seeding, access checks, grants
//! and the subject codec. Talks to Postgres directly through `warden-core`.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{access, catalog, grant, subject, Context};
use output::OutputFormat;

/// Warden - domain-scoped RBAC operator CLI
#[derive(Parser)]
#[command(
    name = "warden",
    version = "0.1.0",
    about = "Warden - domain-scoped RBAC authorization core",
    long_about = "CLI tool for seeding the resource catalog, granting access and checking permissions.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file (environment variables still override it)
    #[arg(short, long, global = true, env = "WARDEN_CONFIG")]
    config: Option<String>,

    /// Domain to operate in, overriding the configured tenant domain
    #[arg(short, long, global = true)]
    domain: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Seed the domain, predefined roles and resource types
    Seed(catalog::SeedArgs),

    /// List registered resources
    Resources(catalog::ResourcesArgs),

    /// Register a company or project and grant access to it
    #[command(subcommand)]
    Create(grant::CreateCommands),

    /// Check whether a user may perform an action on a resource
    CheckAccess(access::CheckAccessArgs),

    /// Check whether a user holds a role, or a combination of roles
    CheckRole(access::CheckRoleArgs),

    /// List the roles a user holds
    Roles(access::RolesArgs),

    /// Grant a user a role and per-resource actions
    Grant(grant::GrantArgs),

    /// Encode or decode resource-scoped role subjects
    #[command(subcommand)]
    Subject(subject::SubjectCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let format = cli.output;
    let connect = || Context::connect(cli.config.as_deref(), cli.domain.as_deref());

    match cli.command {
        Commands::Subject(cmd) => subject::execute(cmd, format),
        Commands::Migrate => catalog::migrate(&connect().await?).await,
        Commands::Seed(args) => catalog::seed(args, &connect().await?, format).await,
        Commands::Resources(args) => catalog::resources(args, &connect().await?, format).await,
        Commands::Create(cmd) => grant::create(cmd, &connect().await?, format).await,
        Commands::CheckAccess(args) => access::check_access(args, &connect().await?, format).await,
        Commands::CheckRole(args) => access::check_role(args, &connect().await?, format).await,
        Commands::Roles(args) => access::roles(args, &connect().await?, format).await,
        Commands::Grant(args) => grant::grant(args, &connect().await?, format).await,
    }
}
