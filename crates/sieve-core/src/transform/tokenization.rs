use rand::rngs::OsRng;
use rand::RngCore;
use scrypt::Params;
use sieve_proto::{FieldType, Record, Schema, Value};

use super::args::{self, Args};
use super::{field_slot, unsupported, Transformation};
use crate::error::{Error, Result};

pub(crate) const FUNCTION: &str = "tokenization";

const KEY_LEN: usize = 32;
const DIGEST_LEN: usize = 32;
const MAX_SIZE: i64 = (DIGEST_LEN * 2) as i64;

// N = 2^1, r = 8, p = 1
const LOG_N: u8 = 1;
const R: u32 = 8;
const P: u32 = 1;

const SUPPORTED: [FieldType; 4] = [
    FieldType::Text,
    FieldType::Char,
    FieldType::VarChar,
    FieldType::ByteA,
];

/// Replaces values with a hex token derived through scrypt under a key
/// generated per request. Equal inputs map to equal tokens within a
/// request, and only within it.
pub struct Tokenization {
    field: String,
    max_size: usize,
    key: [u8; KEY_LEN],
    params: Option<Params>,
}

impl Tokenization {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            max_size: MAX_SIZE as usize,
            key: [0; KEY_LEN],
            params: None,
        }
    }

    pub(crate) fn boxed(field: &str) -> Box<dyn Transformation> {
        Box::new(Self::new(field))
    }

    fn parse(args: &Args) -> Result<usize> {
        let size = args::bounded(args, FUNCTION, "maxSize", 1, MAX_SIZE)?.unwrap_or(MAX_SIZE);
        Ok(size as usize)
    }

    fn token(&self, input: &[u8]) -> Result<String> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| Error::Internal(format!("{FUNCTION} used before initialize")))?;
        let mut digest = [0u8; DIGEST_LEN];
        scrypt::scrypt(input, &self.key, params, &mut digest)
            .map_err(|e| Error::Internal(format!("{FUNCTION}: {e}")))?;
        let mut token = hex::encode(digest);
        token.truncate(self.max_size);
        Ok(token)
    }
}

impl Transformation for Tokenization {
    fn function(&self) -> &str {
        FUNCTION
    }

    fn field(&self) -> &str {
        &self.field
    }

    fn supported_types(&self) -> &[FieldType] {
        &SUPPORTED
    }

    fn validate(&self, args: &Args) -> Result<()> {
        Self::parse(args).map(|_| ())
    }

    fn initialize(&mut self, args: &Args) -> Result<()> {
        self.max_size = Self::parse(args)?;
        OsRng.fill_bytes(&mut self.key);
        let params = Params::new(LOG_N, R, P, DIGEST_LEN)
            .map_err(|e| Error::Internal(format!("{FUNCTION} parameters: {e}")))?;
        self.params = Some(params);
        Ok(())
    }

    fn transform(&mut self, schema: &Schema, record: &mut Record) -> Result<()> {
        let (field_type, value) = field_slot(schema, record, &self.field)?;
        match value {
            Value::Null => {}
            Value::String(s) => *s = self.token(s.as_bytes())?,
            Value::Bytes(b) => *b = self.token(b)?.into_bytes(),
            _ => return Err(unsupported(FUNCTION, field_type)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::testing::{apply, args};
    use serde_json::json;

    fn tokenizer(max_size: i64) -> Tokenization {
        let mut t = Tokenization::new("card_number");
        t.initialize(&args(&[("maxSize", json!(max_size))])).unwrap();
        t
    }

    #[test]
    fn test_deterministic_within_request() {
        let mut t = tokenizer(64);
        let card = Value::String("4111 1111 1111 1111".into());
        let a = apply(&mut t, FieldType::VarChar, card.clone()).unwrap();
        let b = apply(&mut t, FieldType::VarChar, card.clone()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, card);

        let token = a.as_str().unwrap();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

        let other = apply(&mut t, FieldType::VarChar, Value::String("5500".into())).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_key_differs_between_requests() {
        let card = Value::String("4111 1111 1111 1111".into());
        let a = apply(&mut tokenizer(64), FieldType::Text, card.clone()).unwrap();
        let b = apply(&mut tokenizer(64), FieldType::Text, card).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_max_size_prefix() {
        let mut t = tokenizer(12);
        let token = apply(&mut t, FieldType::Text, Value::String("secret".into())).unwrap();
        assert_eq!(token.as_str().unwrap().len(), 12);

        let bytes = apply(&mut t, FieldType::ByteA, Value::Bytes(b"secret".to_vec())).unwrap();
        assert_eq!(bytes.as_bytes().unwrap(), token.as_str().unwrap().as_bytes());
    }

    #[test]
    fn test_max_size_bounds() {
        let t = Tokenization::new("v");
        t.validate(&Args::new()).unwrap();
        assert!(t.validate(&args(&[("maxSize", json!(0))])).is_err());
        assert!(t.validate(&args(&[("maxSize", json!(65))])).is_err());
        t.validate(&args(&[("maxSize", json!(64))])).unwrap();
    }
}
