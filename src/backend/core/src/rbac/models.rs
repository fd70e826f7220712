//! RBAC data models: identifiers, catalog rows, actions, grants and memberships.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::subject::{RoleSubject, Subject};
use crate::error::{Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

numeric_id!(
    /// Strongly-typed user identifier.
    UserId
);
numeric_id!(
    /// Strongly-typed domain (tenant) identifier.
    DomainId
);
numeric_id!(
    /// Strongly-typed role identifier.
    RoleId
);
numeric_id!(
    /// Strongly-typed resource identifier.
    ResourceId
);
numeric_id!(ResourceTypeId);

// ═══════════════════════════════════════════════════════════════════════════════
// Catalog rows
// ═══════════════════════════════════════════════════════════════════════════════

/// A registered user. Read-only to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub uuid: Uuid,
    pub email: String,
}

/// A tenant boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    pub value: String,
}

/// A role definition from the static catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub uuid: Uuid,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    pub id: ResourceTypeId,
    pub value: String,
}

/// A typed, hierarchical resource identity registered for access control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub uuid: String,
    pub description: String,
    pub parent_id: Option<ResourceId>,
    pub type_id: ResourceTypeId,
    /// Value of the resource type, e.g. `company`.
    pub type_value: String,
}

impl Resource {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Request to register a new resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResource {
    pub type_value: String,
    pub uuid: String,
    pub description: String,
    pub parent_uuid: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Selector
// ═══════════════════════════════════════════════════════════════════════════════

/// How a catalog row is looked up.
///
/// `ByValue` matches the row's natural key: a role or type value, a domain
/// value, a user's email, or a resource uuid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "key", rename_all = "snake_case")]
pub enum Selector {
    ById(i64),
    ByUuid(String),
    ByValue(String),
}

impl Selector {
    pub fn id(id: impl Into<i64>) -> Self {
        Self::ById(id.into())
    }

    pub fn uuid(uuid: impl Into<String>) -> Self {
        Self::ByUuid(uuid.into())
    }

    pub fn value(value: impl Into<String>) -> Self {
        Self::ByValue(value.into())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ById(id) => write!(f, "id={}", id),
            Self::ByUuid(uuid) => write!(f, "uuid={}", uuid),
            Self::ByValue(value) => write!(f, "value={}", value),
        }
    }
}

impl From<UserId> for Selector {
    fn from(id: UserId) -> Self {
        Self::ById(id.0)
    }
}

impl From<DomainId> for Selector {
    fn from(id: DomainId) -> Self {
        Self::ById(id.0)
    }
}

impl From<RoleId> for Selector {
    fn from(id: RoleId) -> Self {
        Self::ById(id.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Actions
// ═══════════════════════════════════════════════════════════════════════════════

/// The closed set of actions a grant may permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Modify,
    Delete,
    Administration,
    Management,
}

impl Action {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Modify => "modify",
            Self::Delete => "delete",
            Self::Administration => "administration",
            Self::Management => "management",
        }
    }

    pub const fn all() -> [Action; 6] {
        [
            Self::Create,
            Self::Read,
            Self::Modify,
            Self::Delete,
            Self::Administration,
            Self::Management,
        ]
    }

    /// Full rights granted to whoever creates a resource.
    pub const fn creator_rights() -> [Action; 4] {
        [Self::Read, Self::Modify, Self::Delete, Self::Administration]
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        Self::all()
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| WardenError::unknown_action(s))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Grants and memberships
// ═══════════════════════════════════════════════════════════════════════════════

/// A `(subject, domain, resource, action)` tuple permitting an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Grant {
    pub subject: Subject,
    pub domain: DomainId,
    pub resource: String,
    pub action: Action,
}

impl Grant {
    pub fn new(subject: Subject, domain: DomainId, resource: impl Into<String>, action: Action) -> Self {
        Self {
            subject,
            domain,
            resource: resource.into(),
            action,
        }
    }

    /// One grant per action for the same subject and resource.
    pub fn for_actions(
        subject: &Subject,
        domain: DomainId,
        resource: &str,
        actions: &[Action],
    ) -> Vec<Grant> {
        actions
            .iter()
            .map(|action| Grant::new(subject.clone(), domain, resource, *action))
            .collect()
    }

    /// Rule in enforcer field order.
    pub fn to_rule(&self) -> Vec<String> {
        vec![
            self.subject.to_string(),
            self.domain.to_string(),
            self.resource.clone(),
            self.action.as_str().to_string(),
        ]
    }

    pub fn from_rule(rule: &[String]) -> Result<Self> {
        match rule {
            [subject, domain, resource, action, ..] => Ok(Self {
                subject: subject.parse()?,
                domain: parse_domain(domain)?,
                resource: resource.clone(),
                action: action.parse()?,
            }),
            _ => Err(WardenError::policy_store(format!(
                "policy rule has {} fields, expected 4",
                rule.len()
            ))),
        }
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.subject, self.domain, self.resource, self.action
        )
    }
}

/// A `(subject, roleSubject, domain)` tuple placing a subject in a role group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Membership {
    pub subject: Subject,
    pub role: RoleSubject,
    pub domain: DomainId,
}

impl Membership {
    pub fn new(subject: Subject, role: RoleSubject, domain: DomainId) -> Self {
        Self {
            subject,
            role,
            domain,
        }
    }

    pub fn to_rule(&self) -> Vec<String> {
        vec![
            self.subject.to_string(),
            self.role.to_string(),
            self.domain.to_string(),
        ]
    }

    pub fn from_rule(rule: &[String]) -> Result<Self> {
        match rule {
            [subject, role, domain, ..] => Ok(Self {
                subject: subject.parse()?,
                role: role.parse()?,
                domain: parse_domain(domain)?,
            }),
            _ => Err(WardenError::policy_store(format!(
                "grouping rule has {} fields, expected 3",
                rule.len()
            ))),
        }
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.subject, self.role, self.domain)
    }
}

fn parse_domain(s: &str) -> Result<DomainId> {
    s.parse::<i64>()
        .map(DomainId)
        .map_err(|_| WardenError::policy_store(format!("invalid domain in stored rule: {}", s)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Identity
// ═══════════════════════════════════════════════════════════════════════════════

/// Authenticated identity supplied by the upstream authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub user_id: UserId,
    pub domain_id: DomainId,
}

impl AuthIdentity {
    pub fn new(user_id: impl Into<UserId>, domain_id: impl Into<DomainId>) -> Self {
        Self {
            user_id: user_id.into(),
            domain_id: domain_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::subject::CompoundSubject;

    #[test]
    fn test_action_parse() {
        assert_eq!("modify".parse::<Action>().unwrap(), Action::Modify);
        assert_eq!(
            "administration".parse::<Action>().unwrap(),
            Action::Administration
        );

        let err = "write".parse::<Action>().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_grant_rule_layout() {
        let grant = Grant::new(Subject::User(UserId(42)), DomainId(1), "C1", Action::Modify);
        assert_eq!(grant.to_rule(), vec!["42", "1", "C1", "modify"]);
        assert_eq!(Grant::from_rule(&grant.to_rule()).unwrap(), grant);
    }

    #[test]
    fn test_membership_rule_layout() {
        let scoped = CompoundSubject::new(RoleId(7), "C1").unwrap();
        let membership = Membership::new(
            Subject::User(UserId(42)),
            RoleSubject::Scoped(scoped),
            DomainId(1),
        );
        assert_eq!(membership.to_rule(), vec!["42", "7::C1", "1"]);
    }

    #[test]
    fn test_short_rule_is_rejected() {
        let rule = vec!["42".to_string(), "1".to_string()];
        assert!(Grant::from_rule(&rule).is_err());
        assert!(Membership::from_rule(&rule).is_err());
    }

    #[test]
    fn test_selector_display() {
        assert_eq!(Selector::id(5).to_string(), "id=5");
        assert_eq!(Selector::uuid("C1").to_string(), "uuid=C1");
        assert_eq!(Selector::value("company").to_string(), "value=company");
    }

    #[test]
    fn test_creator_rights() {
        let rights = Action::creator_rights();
        assert!(rights.contains(&Action::Administration));
        assert!(!rights.contains(&Action::Create));
    }
}
