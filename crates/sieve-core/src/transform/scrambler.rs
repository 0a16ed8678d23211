use hmac::{Hmac, Mac};
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use sha2::Sha256;
use sieve_proto::{FieldType, Record, Schema, Value};

use super::args::Args;
use super::{field_slot, unsupported, Transformation};
use crate::error::{Error, Result};

pub(crate) const FUNCTION: &str = "scrambler";

const KEY_LEN: usize = 32;
const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

type HmacSha256 = Hmac<Sha256>;

/// Replaces every word with a keyed pseudo-random word of the same length.
///
/// Words are maximal alphanumeric runs. Each word's letters come from a
/// PRNG seeded with the first 8 bytes of `HMAC-SHA256(key, lowercase(word))`,
/// so repeated words scramble identically within a request regardless of
/// case. The original capitalization is re-applied per character and
/// everything between words is kept as is.
pub struct Scrambler {
    field: String,
    key: [u8; KEY_LEN],
}

impl Scrambler {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            key: [0; KEY_LEN],
        }
    }

    pub(crate) fn boxed(field: &str) -> Box<dyn Transformation> {
        Box::new(Self::new(field))
    }

    fn scramble(&self, text: &str) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut word = String::new();
        for c in text.chars() {
            if c.is_alphanumeric() {
                word.push(c);
                continue;
            }
            if !word.is_empty() {
                out.push_str(&self.scramble_word(&word)?);
                word.clear();
            }
            out.push(c);
        }
        if !word.is_empty() {
            out.push_str(&self.scramble_word(&word)?);
        }
        Ok(out)
    }

    fn scramble_word(&self, word: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::Internal(format!("{FUNCTION} key: {e}")))?;
        mac.update(word.to_lowercase().as_bytes());
        let digest = mac.finalize().into_bytes();

        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        let mut rng = StdRng::seed_from_u64(u64::from_le_bytes(seed));

        Ok(word
            .chars()
            .map(|original| {
                let c = LETTERS[rng.gen_range(0..LETTERS.len())] as char;
                if original.is_uppercase() {
                    c.to_ascii_uppercase()
                } else {
                    c.to_ascii_lowercase()
                }
            })
            .collect())
    }
}

impl Transformation for Scrambler {
    fn function(&self) -> &str {
        FUNCTION
    }

    fn field(&self) -> &str {
        &self.field
    }

    fn supported_types(&self) -> &[FieldType] {
        &FieldType::TEXTUAL
    }

    fn validate(&self, _args: &Args) -> Result<()> {
        Ok(())
    }

    fn initialize(&mut self, _args: &Args) -> Result<()> {
        OsRng.fill_bytes(&mut self.key);
        Ok(())
    }

    fn transform(&mut self, schema: &Schema, record: &mut Record) -> Result<()> {
        let (field_type, value) = field_slot(schema, record, &self.field)?;
        match value {
            Value::Null => {}
            Value::String(s) => *s = self.scramble(s)?,
            _ => return Err(unsupported(FUNCTION, field_type)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::testing::apply;

    fn scrambler() -> Scrambler {
        let mut t = Scrambler::new("comment");
        t.initialize(&Args::new()).unwrap();
        t
    }

    fn scramble(t: &mut Scrambler, s: &str) -> String {
        match apply(t, FieldType::Text, Value::String(s.into())).unwrap() {
            Value::String(s) => s,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_shape_preserved() {
        let mut t = scrambler();
        let input = "Hello, World! It's 2024.";
        let out = scramble(&mut t, input);
        assert_eq!(out.chars().count(), input.chars().count());
        assert_ne!(out, input);
        for (a, b) in input.chars().zip(out.chars()) {
            if a.is_alphanumeric() {
                assert!(b.is_ascii_alphabetic(), "{b} replaced {a}");
                assert_eq!(a.is_uppercase(), b.is_uppercase());
            } else {
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_repeated_words_ignore_case() {
        let mut t = scrambler();
        let out = scramble(&mut t, "Secret secret SECRET");
        let words: Vec<&str> = out.split(' ').collect();
        assert_eq!(words.len(), 3);
        assert_eq!(words[0].to_lowercase(), words[1]);
        assert_eq!(words[2], words[1].to_uppercase());
        assert!(words[0].chars().next().unwrap().is_uppercase());
    }

    #[test]
    fn test_deterministic_per_key() {
        let mut t = scrambler();
        assert_eq!(scramble(&mut t, "alice"), scramble(&mut t, "alice"));
    }

    #[test]
    fn test_empty_and_punctuation_only() {
        let mut t = scrambler();
        assert_eq!(scramble(&mut t, ""), "");
        assert_eq!(scramble(&mut t, "-- ?!"), "-- ?!");
    }
}
