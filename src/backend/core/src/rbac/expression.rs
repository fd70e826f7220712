//! Boolean role expressions used by access gates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, WardenError};

/// How the results of several role checks combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoleExpression {
    /// Every role must be held.
    And,
    /// At least one role must be held.
    Or,
}

impl RoleExpression {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    /// Combine individual role-check results.
    pub fn evaluate<I>(&self, results: I) -> bool
    where
        I: IntoIterator<Item = bool>,
    {
        let mut results = results.into_iter();
        match self {
            Self::And => results.all(|held| held),
            Self::Or => results.any(|held| held),
        }
    }
}

impl fmt::Display for RoleExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts `AND`/`OR` in any case. Anything else is invalid input.
impl FromStr for RoleExpression {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("and") {
            Ok(Self::And)
        } else if s.eq_ignore_ascii_case("or") {
            Ok(Self::Or)
        } else {
            Err(WardenError::unknown_role_expression(s))
        }
    }
}
