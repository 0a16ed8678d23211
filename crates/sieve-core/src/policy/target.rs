//! Rule targets: `records:<collection>.<entity>` or `records:*`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const WILDCARD: &str = "*";

const RECORDS: &str = "records";

/// An addressable set of entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target {
    collection: String,
    entity: String,
}

fn valid_segment(s: &str) -> bool {
    s == WILDCARD
        || (s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}

impl Target {
    pub fn new(collection: impl Into<String>, entity: impl Into<String>) -> Result<Self, Error> {
        let target = Target {
            collection: collection.into(),
            entity: entity.into(),
        };
        if !valid_segment(&target.collection) || !valid_segment(&target.entity) {
            return Err(Error::InvalidPolicy(format!(
                "invalid target 'records:{}.{}'",
                target.collection, target.entity
            )));
        }
        Ok(target)
    }

    /// `records:*`
    pub fn any() -> Self {
        Target {
            collection: WILDCARD.to_string(),
            entity: WILDCARD.to_string(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn is_wildcard(&self) -> bool {
        self.entity == WILDCARD
    }

    /// Entity components equal, `*` matching anything.
    pub fn matches(&self, other: &Target) -> bool {
        self.matches_entity(&other.entity)
    }

    pub fn matches_entity(&self, entity: &str) -> bool {
        self.entity == WILDCARD || entity == WILDCARD || self.entity == entity
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            Error::InvalidPolicy(format!(
                "invalid target '{s}': expected records:<collection>.<entity> or records:*"
            ))
        };
        let (kind, rest) = s.split_once(':').ok_or_else(invalid)?;
        if kind != RECORDS {
            return Err(invalid());
        }
        if rest == WILDCARD {
            return Ok(Target::any());
        }
        let (collection, entity) = rest.split_once('.').ok_or_else(invalid)?;
        Target::new(collection, entity).map_err(|_| invalid())
    }
}

impl TryFrom<String> for Target {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.collection == WILDCARD && self.entity == WILDCARD {
            write!(f, "{RECORDS}:*")
        } else {
            write!(f, "{RECORDS}:{}.{}", self.collection, self.entity)
        }
    }
}
