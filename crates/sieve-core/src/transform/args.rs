//! Typed access to transformation arguments.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Arguments as authored in the policy.
pub type Args = BTreeMap<String, serde_json::Value>;

pub fn float(args: &Args, function: &str, name: &str) -> Result<Option<f64>> {
    args.get(name)
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| Error::wrong_argument(function, name, "must be a number"))
        })
        .transpose()
}

pub fn integer(args: &Args, function: &str, name: &str) -> Result<Option<i64>> {
    args.get(name)
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| Error::wrong_argument(function, name, "must be an integer"))
        })
        .transpose()
}

pub fn string<'a>(args: &'a Args, function: &str, name: &str) -> Result<Option<&'a str>> {
    args.get(name)
        .map(|v| {
            v.as_str()
                .ok_or_else(|| Error::wrong_argument(function, name, "must be a string"))
        })
        .transpose()
}

pub fn boolean(args: &Args, function: &str, name: &str) -> Result<Option<bool>> {
    args.get(name)
        .map(|v| {
            v.as_bool()
                .ok_or_else(|| Error::wrong_argument(function, name, "must be a boolean"))
        })
        .transpose()
}

/// A string of exactly one character.
pub fn character(args: &Args, function: &str, name: &str) -> Result<Option<char>> {
    let Some(s) = string(args, function, name)? else {
        return Ok(None);
    };
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Some(c)),
        _ => Err(Error::wrong_argument(
            function,
            name,
            "must be a single character",
        )),
    }
}

/// An integer within `min..=max`.
pub fn bounded(args: &Args, function: &str, name: &str, min: i64, max: i64) -> Result<Option<i64>> {
    match integer(args, function, name)? {
        Some(v) if v < min || v > max => Err(Error::wrong_argument(
            function,
            name,
            format!("must be between {min} and {max}, got {v}"),
        )),
        other => Ok(other),
    }
}

pub fn require<T>(value: Option<T>, function: &str, name: &str) -> Result<T> {
    value.ok_or_else(|| Error::missing_argument(function, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args() -> Args {
        Args::from([
            ("n".to_string(), json!(3)),
            ("x".to_string(), json!(1.5)),
            ("s".to_string(), json!("ab")),
            ("c".to_string(), json!("#")),
        ])
    }

    #[test]
    fn test_typed_reads() {
        let args = args();
        assert_eq!(integer(&args, "f", "n").unwrap(), Some(3));
        assert_eq!(float(&args, "f", "n").unwrap(), Some(3.0));
        assert_eq!(float(&args, "f", "x").unwrap(), Some(1.5));
        assert_eq!(string(&args, "f", "s").unwrap(), Some("ab"));
        assert_eq!(character(&args, "f", "c").unwrap(), Some('#'));
        assert_eq!(integer(&args, "f", "missing").unwrap(), None);
    }

    #[test]
    fn test_wrong_shapes() {
        let args = args();
        assert!(integer(&args, "f", "x").is_err());
        assert!(boolean(&args, "f", "s").is_err());
        assert!(character(&args, "f", "s").is_err());
        let err = bounded(&args, "tokenization", "n", 5, 64).unwrap_err();
        assert_eq!(
            err.to_string(),
            "tokenization argument 'n' must be between 5 and 64, got 3"
        );
    }

    #[test]
    fn test_require() {
        let err = require(integer(&args(), "perturbation", "seed").unwrap(), "perturbation", "seed")
            .unwrap_err();
        assert_eq!(err.to_string(), "perturbation requires argument 'seed'");
    }
}
