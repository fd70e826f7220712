//! Predefined role catalog and default resource types.
//!
//! | Role             | Description                                          |
//! |------------------|------------------------------------------------------|
//! | super_admin      | Operates the whole deployment                        |
//! | admin            | Administers a tenant domain                          |
//! | manager          | Manages tenant-wide data                             |
//! | builder_admin    | Owns a company; scoped per company                   |
//! | builder_manager  | Runs a project; scoped per project                   |

use super::models::Action;

/// Resource types seeded into a fresh catalog.
pub const DEFAULT_RESOURCE_TYPES: [&str; 4] = ["company", "project", "worker", "user"];

/// Predefined role templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredefinedRole {
    SuperAdmin,
    Admin,
    Manager,
    BuilderAdmin,
    BuilderManager,
}

impl PredefinedRole {
    /// The role value stored in the catalog.
    pub fn value(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::BuilderAdmin => "builder_admin",
            Self::BuilderManager => "builder_manager",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "Operates the whole deployment",
            Self::Admin => "Administers a tenant domain",
            Self::Manager => "Manages tenant-wide data",
            Self::BuilderAdmin => "Owns a company",
            Self::BuilderManager => "Runs a project within a company",
        }
    }

    /// Actions a resource-scoped holder of this role receives on that resource.
    ///
    /// Empty for roles that are never scoped to a resource.
    pub fn scoped_actions(&self) -> &'static [Action] {
        match self {
            Self::BuilderAdmin => &[Action::Read, Action::Modify, Action::Delete, Action::Management],
            Self::BuilderManager => &[Action::Read, Action::Modify],
            Self::SuperAdmin | Self::Admin | Self::Manager => &[],
        }
    }

    pub fn from_value(value: &str) -> Option<Self> {
        Self::all().into_iter().find(|r| r.value() == value)
    }

    /// Return all predefined roles.
    pub fn all() -> Vec<PredefinedRole> {
        vec![
            Self::SuperAdmin,
            Self::Admin,
            Self::Manager,
            Self::BuilderAdmin,
            Self::BuilderManager,
        ]
    }

    /// Values of every predefined role, for seeding.
    pub fn all_values() -> Vec<&'static str> {
        Self::all().into_iter().map(|r| r.value()).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_values() {
        assert_eq!(PredefinedRole::BuilderAdmin.value(), "builder_admin");
        assert_eq!(PredefinedRole::BuilderManager.value(), "builder_manager");
        assert_eq!(PredefinedRole::all_values().len(), 5);
    }

    #[test]
    fn test_from_value_round_trip() {
        for role in PredefinedRole::all() {
            assert_eq!(PredefinedRole::from_value(role.value()), Some(role));
        }
        assert_eq!(PredefinedRole::from_value("owner"), None);
    }

    #[test]
    fn test_scoped_actions() {
        assert!(PredefinedRole::BuilderAdmin
            .scoped_actions()
            .contains(&Action::Delete));
        assert!(!PredefinedRole::BuilderManager
            .scoped_actions()
            .contains(&Action::Delete));
        assert!(PredefinedRole::Admin.scoped_actions().is_empty());
    }
}
