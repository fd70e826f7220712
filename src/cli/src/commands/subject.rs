//! Subject codec commands.
//!
//! Works offline; no database connection is opened.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use warden_core::rbac::{subject, CompoundSubject, RoleId};

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum SubjectCommands {
    /// Build `<roleId>::<resourceUuid>` from its parts
    Encode {
        /// Role id
        role_id: i64,
        /// Resource uuid
        resource_uuid: String,
    },

    /// Split a compound subject into its parts
    Decode {
        /// Compound subject, e.g. `7::C1`
        subject: String,
    },
}

#[derive(Serialize)]
struct Decoded {
    role_id: i64,
    resource_uuid: String,
}

pub fn execute(cmd: SubjectCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        SubjectCommands::Encode {
            role_id,
            resource_uuid,
        } => {
            let encoded = CompoundSubject::new(RoleId(role_id), resource_uuid)?.to_string();
            match format {
                OutputFormat::Table => println!("{}", encoded),
                _ => output::print_item(&encoded, format)?,
            }
        }
        SubjectCommands::Decode { subject } => {
            let (role_id, resource_uuid) = subject::decode(&subject)?;
            let decoded = Decoded {
                role_id: role_id.get(),
                resource_uuid,
            };
            match format {
                OutputFormat::Table => {
                    output::print_detail("Role ID", &decoded.role_id.to_string());
                    output::print_detail("Resource", &decoded.resource_uuid);
                }
                _ => output::print_item(&decoded, format)?,
            }
        }
    }
    Ok(())
}
