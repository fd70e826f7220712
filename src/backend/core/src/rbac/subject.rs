//! Subject codec.
//!
//! The enforcer's grouping primitive only accepts a flat role string, so a
//! role scoped to one resource instance is serialized as
//! `<roleId>::<resourceUuid>`. "manager of project P" and "manager of project
//! Q" are then distinct groups derived from a single role row.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::models::{RoleId, UserId};
use crate::error::{Result, WardenError};

/// Joins the role id and resource uuid. Never appears in either component.
pub const SEPARATOR: &str = "::";

/// Marks a raw role in the group column so it never reads as a user id.
pub const ROLE_PREFIX: &str = "role:";

/// Serialize a role scoped to one resource.
pub fn encode(role_id: RoleId, resource_uuid: &str) -> String {
    format!("{}{}{}", role_id, SEPARATOR, resource_uuid)
}

/// Split a compound subject into its role id and resource uuid.
///
/// Requires exactly two non-empty segments, the first a non-negative integer.
pub fn decode(s: &str) -> Result<(RoleId, String)> {
    let segments: Vec<&str> = s.split(SEPARATOR).collect();
    let [role, resource] = segments.as_slice() else {
        return Err(WardenError::invalid_subject(
            s,
            format!("expected 2 segments, found {}", segments.len()),
        ));
    };

    if role.is_empty() || resource.is_empty() {
        return Err(WardenError::invalid_subject(s, "empty segment"));
    }

    let role_id = parse_role_id(role).ok_or_else(|| {
        WardenError::invalid_subject(s, "role segment is not a non-negative integer")
    })?;

    Ok((role_id, (*resource).to_string()))
}

fn parse_role_id(segment: &str) -> Option<RoleId> {
    if !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse::<i64>().ok().map(RoleId)
}

// ═══════════════════════════════════════════════════════════════════════════════
// CompoundSubject
// ═══════════════════════════════════════════════════════════════════════════════

/// A role scoped to one resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompoundSubject {
    role_id: RoleId,
    resource_uuid: String,
}

impl CompoundSubject {
    pub fn new(role_id: RoleId, resource_uuid: impl Into<String>) -> Result<Self> {
        let resource_uuid = resource_uuid.into();
        if role_id.get() < 0 {
            return Err(WardenError::invalid_subject(
                encode(role_id, &resource_uuid),
                "negative role id",
            ));
        }
        if resource_uuid.is_empty() || resource_uuid.contains(SEPARATOR) {
            return Err(WardenError::invalid_subject(
                encode(role_id, &resource_uuid),
                "resource uuid is empty or contains the separator",
            ));
        }
        Ok(Self {
            role_id,
            resource_uuid,
        })
    }

    pub fn role_id(&self) -> RoleId {
        self.role_id
    }

    pub fn resource_uuid(&self) -> &str {
        &self.resource_uuid
    }
}

impl fmt::Display for CompoundSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(self.role_id, &self.resource_uuid))
    }
}

impl FromStr for CompoundSubject {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        let (role_id, resource_uuid) = decode(s)?;
        Ok(Self {
            role_id,
            resource_uuid,
        })
    }
}

impl Serialize for CompoundSubject {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CompoundSubject {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Subject / RoleSubject
// ═══════════════════════════════════════════════════════════════════════════════

/// The actor side of a grant or membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    User(UserId),
    Scoped(CompoundSubject),
}

impl From<UserId> for Subject {
    fn from(id: UserId) -> Self {
        Self::User(id)
    }
}

impl From<CompoundSubject> for Subject {
    fn from(subject: CompoundSubject) -> Self {
        Self::Scoped(subject)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "{}", id),
            Self::Scoped(subject) => write!(f, "{}", subject),
        }
    }
}

impl FromStr for Subject {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        if s.contains(SEPARATOR) {
            return s.parse().map(Self::Scoped);
        }
        s.parse::<i64>()
            .map(|id| Self::User(UserId(id)))
            .map_err(|_| WardenError::invalid_subject(s, "not a user id or compound subject"))
    }
}

/// The group side of a membership: a raw role or a resource-scoped role.
///
/// A raw role renders as `role:<id>`; a bare `<id>` is always a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleSubject {
    Role(RoleId),
    Scoped(CompoundSubject),
}

impl RoleSubject {
    pub fn role_id(&self) -> RoleId {
        match self {
            Self::Role(id) => *id,
            Self::Scoped(subject) => subject.role_id(),
        }
    }

    pub fn resource_uuid(&self) -> Option<&str> {
        match self {
            Self::Role(_) => None,
            Self::Scoped(subject) => Some(subject.resource_uuid()),
        }
    }
}

impl From<RoleId> for RoleSubject {
    fn from(id: RoleId) -> Self {
        Self::Role(id)
    }
}

impl From<CompoundSubject> for RoleSubject {
    fn from(subject: CompoundSubject) -> Self {
        Self::Scoped(subject)
    }
}

impl fmt::Display for RoleSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role(id) => write!(f, "{}{}", ROLE_PREFIX, id),
            Self::Scoped(subject) => write!(f, "{}", subject),
        }
    }
}

impl FromStr for RoleSubject {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        if s.contains(SEPARATOR) {
            return s.parse().map(Self::Scoped);
        }
        s.strip_prefix(ROLE_PREFIX)
            .and_then(parse_role_id)
            .map(Self::Role)
            .ok_or_else(|| WardenError::invalid_subject(s, "not a raw role or compound subject"))
    }
}

macro_rules! serde_via_str {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

serde_via_str!(Subject);
serde_via_str!(RoleSubject);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use proptest::prelude::*;

    #[test]
    fn test_encode() {
        assert_eq!(encode(RoleId(7), "C1"), "7::C1");
    }

    #[test]
    fn test_decode() {
        let (role, uuid) = decode("7::C1").unwrap();
        assert_eq!(role, RoleId(7));
        assert_eq!(uuid, "C1");
    }

    #[test]
    fn test_decode_rejects_malformed() {
        for bad in ["", "7", "7::", "::C1", "7::C1::x", "x::C1", "-7::C1", "+7::C1", "7:C1"] {
            let err = decode(bad).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidSubjectFormat, "input {:?}", bad);
        }
    }

    #[test]
    fn test_compound_subject_validates() {
        assert!(CompoundSubject::new(RoleId(-1), "C1").is_err());
        assert!(CompoundSubject::new(RoleId(1), "").is_err());
        assert!(CompoundSubject::new(RoleId(1), "a::b").is_err());

        let subject = CompoundSubject::new(RoleId(7), "C1").unwrap();
        assert_eq!(subject.to_string(), "7::C1");
        assert_eq!(subject.role_id(), RoleId(7));
        assert_eq!(subject.resource_uuid(), "C1");
    }

    #[test]
    fn test_subject_parse() {
        assert_eq!("42".parse::<Subject>().unwrap(), Subject::User(UserId(42)));
        assert!(matches!("7::C1".parse::<Subject>().unwrap(), Subject::Scoped(_)));
        assert!("alice".parse::<Subject>().is_err());

        assert_eq!("role:7".parse::<RoleSubject>().unwrap(), RoleSubject::Role(RoleId(7)));
        assert_eq!(RoleSubject::Role(RoleId(7)).to_string(), "role:7");
        assert!("7".parse::<RoleSubject>().is_err());
        assert!("role:".parse::<RoleSubject>().is_err());
        assert!("role:x".parse::<RoleSubject>().is_err());
        // a raw role never parses back as a user
        assert!("role:7".parse::<Subject>().is_err());
        let scoped: RoleSubject = "7::C1".parse().unwrap();
        assert_eq!(scoped.role_id(), RoleId(7));
        assert_eq!(scoped.resource_uuid(), Some("C1"));
    }

    #[test]
    fn test_subject_serde_is_string() {
        let subject = Subject::Scoped(CompoundSubject::new(RoleId(3), "P9").unwrap());
        let json = serde_json::to_string(&subject).unwrap();
        assert_eq!(json, "\"3::P9\"");
        assert_eq!(serde_json::from_str::<Subject>(&json).unwrap(), subject);
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(role in 0i64..i64::MAX, uuid in "[A-Za-z0-9-]{1,40}") {
            let encoded = encode(RoleId(role), &uuid);
            let (decoded_role, decoded_uuid) = decode(&encoded).unwrap();
            prop_assert_eq!(decoded_role, RoleId(role));
            prop_assert_eq!(decoded_uuid, uuid);
        }

        #[test]
        fn prop_uuid_with_single_colons_round_trips(role in 0i64..10_000, uuid in "[a-z]{1,8}(:[a-z]{1,8}){0,3}") {
            let encoded = encode(RoleId(role), &uuid);
            prop_assert_eq!(decode(&encoded).unwrap(), (RoleId(role), uuid));
        }
    }
}
