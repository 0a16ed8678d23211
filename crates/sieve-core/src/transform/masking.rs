//! Redaction and partial masking.

use sieve_proto::{FieldType, Record, Schema, Value};

use super::args::{self, Args};
use super::{field_slot, unsupported, Transformation};
use crate::error::Result;

pub(crate) const REDACTION: &str = "redaction";
pub(crate) const MASKING: &str = "masking";

const DEFAULT_REPLACEMENT: &str = "[REDACTED]";
const DEFAULT_VISIBLE: usize = 4;
const DEFAULT_MASK_CHAR: char = '*';

const REDACTABLE: [FieldType; 4] = [
    FieldType::Text,
    FieldType::Char,
    FieldType::VarChar,
    FieldType::ByteA,
];

/// Replaces the whole value with a fixed placeholder.
#[derive(Debug, Clone)]
pub struct Redaction {
    field: String,
    replacement: String,
}

impl Redaction {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            replacement: DEFAULT_REPLACEMENT.to_string(),
        }
    }

    pub(crate) fn boxed(field: &str) -> Box<dyn Transformation> {
        Box::new(Self::new(field))
    }
}

impl Transformation for Redaction {
    fn function(&self) -> &str {
        REDACTION
    }

    fn field(&self) -> &str {
        &self.field
    }

    fn supported_types(&self) -> &[FieldType] {
        &REDACTABLE
    }

    fn validate(&self, args: &Args) -> Result<()> {
        args::string(args, REDACTION, "replacement").map(|_| ())
    }

    fn initialize(&mut self, args: &Args) -> Result<()> {
        if let Some(replacement) = args::string(args, REDACTION, "replacement")? {
            self.replacement = replacement.to_string();
        }
        Ok(())
    }

    fn transform(&mut self, schema: &Schema, record: &mut Record) -> Result<()> {
        let (field_type, value) = field_slot(schema, record, &self.field)?;
        match value {
            Value::Null => {}
            Value::String(s) => s.clone_from(&self.replacement),
            Value::Bytes(b) => *b = self.replacement.as_bytes().to_vec(),
            _ => return Err(unsupported(REDACTION, field_type)),
        }
        Ok(())
    }
}

/// Masks all but `visibleChars` characters, counted from the end unless
/// `fromEnd` is false. Values no longer than `visibleChars` are masked
/// entirely.
#[derive(Debug, Clone)]
pub struct Masking {
    field: String,
    visible: usize,
    from_end: bool,
    mask_char: char,
}

impl Masking {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            visible: DEFAULT_VISIBLE,
            from_end: true,
            mask_char: DEFAULT_MASK_CHAR,
        }
    }

    pub(crate) fn boxed(field: &str) -> Box<dyn Transformation> {
        Box::new(Self::new(field))
    }

    fn parse(args: &Args) -> Result<(usize, bool, char)> {
        let visible = args::bounded(args, MASKING, "visibleChars", 0, u32::MAX as i64)?
            .map_or(DEFAULT_VISIBLE, |v| v as usize);
        let from_end = args::boolean(args, MASKING, "fromEnd")?.unwrap_or(true);
        let mask_char = args::character(args, MASKING, "maskChar")?.unwrap_or(DEFAULT_MASK_CHAR);
        Ok((visible, from_end, mask_char))
    }

    fn mask(&self, s: &str) -> String {
        let len = s.chars().count();
        if len <= self.visible {
            return self.mask_char.to_string().repeat(len);
        }
        let hidden = len - self.visible;
        s.chars()
            .enumerate()
            .map(|(i, c)| {
                let shown = if self.from_end {
                    i >= hidden
                } else {
                    i < self.visible
                };
                if shown {
                    c
                } else {
                    self.mask_char
                }
            })
            .collect()
    }
}

impl Transformation for Masking {
    fn function(&self) -> &str {
        MASKING
    }

    fn field(&self) -> &str {
        &self.field
    }

    fn supported_types(&self) -> &[FieldType] {
        &FieldType::TEXTUAL
    }

    fn validate(&self, args: &Args) -> Result<()> {
        Self::parse(args).map(|_| ())
    }

    fn initialize(&mut self, args: &Args) -> Result<()> {
        (self.visible, self.from_end, self.mask_char) = Self::parse(args)?;
        Ok(())
    }

    fn transform(&mut self, schema: &Schema, record: &mut Record) -> Result<()> {
        let (field_type, value) = field_slot(schema, record, &self.field)?;
        match value {
            Value::Null => {}
            Value::String(s) => *s = self.mask(s),
            _ => return Err(unsupported(MASKING, field_type)),
        }
        Ok(())
    }
}
