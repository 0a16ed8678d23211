//! Numeric transformations: `plusOne`, `rounding` and `perturbation`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sieve_proto::{FieldType, Record, Schema, Value};

use super::args::{self, Args};
use super::{field_slot, unsupported, Transformation};
use crate::error::{Error, Result};

pub(crate) const PLUS_ONE: &str = "plusOne";
pub(crate) const ROUNDING: &str = "rounding";
pub(crate) const PERTURBATION: &str = "perturbation";

const FLOATING: [FieldType; 2] = [FieldType::Double, FieldType::Real];

/// Adds one in the field's declared type, wrapping on overflow.
#[derive(Debug, Clone)]
pub struct PlusOne {
    field: String,
}

impl PlusOne {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub(crate) fn boxed(field: &str) -> Box<dyn Transformation> {
        Box::new(Self::new(field))
    }
}

impl Transformation for PlusOne {
    fn function(&self) -> &str {
        PLUS_ONE
    }

    fn field(&self) -> &str {
        &self.field
    }

    fn supported_types(&self) -> &[FieldType] {
        &FieldType::NUMERIC
    }

    fn validate(&self, _args: &Args) -> Result<()> {
        Ok(())
    }

    fn initialize(&mut self, _args: &Args) -> Result<()> {
        Ok(())
    }

    fn transform(&mut self, schema: &Schema, record: &mut Record) -> Result<()> {
        let (field_type, value) = field_slot(schema, record, &self.field)?;
        match (field_type, value) {
            (_, Value::Null) => {}
            (FieldType::SmallInt, Value::Int32(v)) => *v = (*v as i16).wrapping_add(1) as i32,
            (_, Value::Int32(v)) => *v = v.wrapping_add(1),
            (_, Value::Int64(v)) => *v = v.wrapping_add(1),
            (_, Value::Float(v)) => *v += 1.0,
            (_, Value::Double(v)) => *v += 1.0,
            (field_type, _) => return Err(unsupported(PLUS_ONE, field_type)),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundingType {
    ToEven,
    AwayFromZero,
}

/// Rounds to `precision` decimal places.
#[derive(Debug, Clone)]
pub struct Rounding {
    field: String,
    rounding: RoundingType,
    factor: f64,
}

impl Rounding {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rounding: RoundingType::ToEven,
            factor: 1.0,
        }
    }

    pub(crate) fn boxed(field: &str) -> Box<dyn Transformation> {
        Box::new(Self::new(field))
    }

    fn parse(args: &Args) -> Result<(RoundingType, i32)> {
        let rounding = match args::string(args, ROUNDING, "roundingType")? {
            None | Some("roundToEven") => RoundingType::ToEven,
            Some("awayFromZero") => RoundingType::AwayFromZero,
            Some(other) => {
                return Err(Error::wrong_argument(
                    ROUNDING,
                    "roundingType",
                    format!("must be roundToEven or awayFromZero, got '{other}'"),
                ))
            }
        };
        let precision = args::bounded(args, ROUNDING, "precision", 0, i32::MAX as i64)?.unwrap_or(0);
        Ok((rounding, precision as i32))
    }

    fn round(&self, x: f64) -> f64 {
        let scaled = x * self.factor;
        if !scaled.is_finite() {
            return x;
        }
        let rounded = match self.rounding {
            RoundingType::ToEven => scaled.round_ties_even(),
            RoundingType::AwayFromZero => scaled.round(),
        };
        rounded / self.factor
    }
}

impl Transformation for Rounding {
    fn function(&self) -> &str {
        ROUNDING
    }

    fn field(&self) -> &str {
        &self.field
    }

    fn supported_types(&self) -> &[FieldType] {
        &FLOATING
    }

    fn validate(&self, args: &Args) -> Result<()> {
        Self::parse(args).map(|_| ())
    }

    fn initialize(&mut self, args: &Args) -> Result<()> {
        let (rounding, precision) = Self::parse(args)?;
        self.rounding = rounding;
        self.factor = 10f64.powi(precision);
        Ok(())
    }

    fn transform(&mut self, schema: &Schema, record: &mut Record) -> Result<()> {
        let (field_type, value) = field_slot(schema, record, &self.field)?;
        match value {
            Value::Null => {}
            Value::Double(v) => *v = self.round(*v),
            Value::Float(v) => *v = self.round(*v as f64) as f32,
            _ => return Err(unsupported(ROUNDING, field_type)),
        }
        Ok(())
    }
}

/// Adds uniform noise from `min..=max`, drawn from a PRNG seeded once per
/// request. Integer results are truncated toward zero.
#[derive(Debug, Clone)]
pub struct Perturbation {
    field: String,
    min: f64,
    max: f64,
    rng: StdRng,
}

impl Perturbation {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            min: 0.0,
            max: 0.0,
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub(crate) fn boxed(field: &str) -> Box<dyn Transformation> {
        Box::new(Self::new(field))
    }

    fn parse(args: &Args) -> Result<(f64, f64, u64)> {
        let min = args::require(args::float(args, PERTURBATION, "min")?, PERTURBATION, "min")?;
        let max = args::require(args::float(args, PERTURBATION, "max")?, PERTURBATION, "max")?;
        let seed = args::require(args::integer(args, PERTURBATION, "seed")?, PERTURBATION, "seed")?;
        if !min.is_finite() || !max.is_finite() {
            return Err(Error::wrong_argument(PERTURBATION, "min", "bounds must be finite"));
        }
        if min > max {
            return Err(Error::wrong_argument(
                PERTURBATION,
                "max",
                format!("must not be less than min ({max} < {min})"),
            ));
        }
        if !(max - min).is_finite() {
            return Err(Error::wrong_argument(
                PERTURBATION,
                "max",
                "the range from min to max is too wide",
            ));
        }
        Ok((min, max, seed as u64))
    }

    fn noise(&mut self) -> f64 {
        if self.min == self.max {
            return self.min;
        }
        self.rng.gen_range(self.min..=self.max)
    }
}

impl Transformation for Perturbation {
    fn function(&self) -> &str {
        PERTURBATION
    }

    fn field(&self) -> &str {
        &self.field
    }

    fn supported_types(&self) -> &[FieldType] {
        &FieldType::NUMERIC
    }

    fn validate(&self, args: &Args) -> Result<()> {
        Self::parse(args).map(|_| ())
    }

    fn initialize(&mut self, args: &Args) -> Result<()> {
        let (min, max, seed) = Self::parse(args)?;
        self.min = min;
        self.max = max;
        self.rng = StdRng::seed_from_u64(seed);
        Ok(())
    }

    fn transform(&mut self, schema: &Schema, record: &mut Record) -> Result<()> {
        let (field_type, value) = field_slot(schema, record, &self.field)?;
        if value.is_null() {
            return Ok(());
        }
        let noise = self.noise();
        match (field_type, value) {
            (FieldType::SmallInt, Value::Int32(v)) => *v = (*v as f64 + noise).trunc() as i16 as i32,
            (_, Value::Int32(v)) => *v = (*v as f64 + noise).trunc() as i32,
            (_, Value::Int64(v)) => *v = (*v as f64 + noise).trunc() as i64,
            (_, Value::Float(v)) => *v = (*v as f64 + noise) as f32,
            (_, Value::Double(v)) => *v += noise,
            (field_type, _) => return Err(unsupported(PERTURBATION, field_type)),
        }
        Ok(())
    }
}
