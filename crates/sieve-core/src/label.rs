//! Labels and field names.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Error;

fn label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z/-]{3,63}$").expect("label pattern is valid"))
}

fn field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\*|[A-Za-z][A-Za-z0-9_]*)$").expect("field pattern is valid")
    })
}

pub fn is_valid_label(s: &str) -> bool {
    label_regex().is_match(s)
}

/// Column names, plus `*` for "every field".
pub fn is_valid_field(s: &str) -> bool {
    field_regex().is_match(s)
}

/// Name of a source, policy or role: 4-64 chars of `[a-z/-]`, starting
/// with a letter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label(String);

impl Label {
    pub fn new(s: impl Into<String>) -> Result<Self, Error> {
        let s = s.into();
        if is_valid_label(&s) {
            Ok(Label(s))
        } else {
            Err(Error::InvalidPolicy(format!(
                "'{s}' is not a valid label: expected 4-64 characters matching [a-z][a-z/-]*"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Label {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Label::new(s)
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.0
    }
}

impl FromStr for Label {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::new(s)
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_rules() {
        assert!(is_valid_label("payments-db"));
        assert!(is_valid_label("team/analytics"));
        assert!(!is_valid_label("abc"));
        assert!(!is_valid_label("Payments"));
        assert!(!is_valid_label("-payments"));
        assert!(!is_valid_label("db2-main"));
        assert!(is_valid_label(&"a".repeat(64)));
        assert!(!is_valid_label(&"a".repeat(65)));
    }

    #[test]
    fn test_field_rules() {
        assert!(is_valid_field("*"));
        assert!(is_valid_field("card_number"));
        assert!(is_valid_field("Value2"));
        assert!(!is_valid_field("_hidden"));
        assert!(!is_valid_field("2fa"));
        assert!(!is_valid_field("a.b"));
    }

    #[test]
    fn test_label_serde() {
        let label: Label = serde_json::from_str("\"payments-db\"").unwrap();
        assert_eq!(label.as_str(), "payments-db");
        assert!(serde_json::from_str::<Label>("\"X\"").is_err());
        assert_eq!(serde_json::to_string(&label).unwrap(), "\"payments-db\"");
    }
}
