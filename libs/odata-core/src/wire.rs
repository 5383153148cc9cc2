//! Wire (EDM) types of entity fields.
//!
//! A field's wire type decides how textual literals from a request are coerced
//! before they reach the filter model, how key literals in paths are read, and
//! how keys are rendered back into `@odata.id` links.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

/// Logical field types supported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireType {
    #[serde(alias = "Edm.Boolean")]
    Boolean,
    #[serde(alias = "Edm.Byte")]
    Byte,
    #[serde(alias = "Edm.Int16")]
    Int16,
    #[serde(alias = "Edm.Int32")]
    Int32,
    #[serde(alias = "Edm.Int64")]
    Int64,
    #[serde(alias = "Edm.Single")]
    Single,
    #[serde(alias = "Edm.Double")]
    Double,
    #[serde(alias = "Edm.Decimal")]
    Decimal,
    #[serde(alias = "Edm.String")]
    String,
    #[serde(alias = "Edm.Guid")]
    Guid,
    #[serde(alias = "Edm.Date")]
    Date,
    #[serde(alias = "Edm.DateTimeOffset")]
    DateTimeOffset,
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.edm_name())
    }
}

/// A literal that cannot be read as the requested wire type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot read '{literal}' as {expected}")]
pub struct CoercionError {
    pub literal: String,
    pub expected: WireType,
}

impl WireType {
    /// Qualified EDM name, as used in `$metadata`.
    #[must_use]
    pub fn edm_name(self) -> &'static str {
        match self {
            WireType::Boolean => "Edm.Boolean",
            WireType::Byte => "Edm.Byte",
            WireType::Int16 => "Edm.Int16",
            WireType::Int32 => "Edm.Int32",
            WireType::Int64 => "Edm.Int64",
            WireType::Single => "Edm.Single",
            WireType::Double => "Edm.Double",
            WireType::Decimal => "Edm.Decimal",
            WireType::String => "Edm.String",
            WireType::Guid => "Edm.Guid",
            WireType::Date => "Edm.Date",
            WireType::DateTimeOffset => "Edm.DateTimeOffset",
        }
    }

    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            WireType::Byte | WireType::Int16 | WireType::Int32 | WireType::Int64
        )
    }

    #[must_use]
    pub fn is_floating(self) -> bool {
        matches!(self, WireType::Single | WireType::Double | WireType::Decimal)
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_floating()
    }

    /// Numeric and boolean keys are written bare in links; everything else is quoted.
    #[must_use]
    pub fn is_quoted(self) -> bool {
        !(self.is_numeric() || self == WireType::Boolean)
    }

    pub(crate) fn integer_range(self) -> (i64, i64) {
        match self {
            WireType::Byte => (0, i64::from(u8::MAX)),
            WireType::Int16 => (i64::from(i16::MIN), i64::from(i16::MAX)),
            WireType::Int32 => (i64::from(i32::MIN), i64::from(i32::MAX)),
            _ => (i64::MIN, i64::MAX),
        }
    }

    /// Coerce an unquoted literal into a JSON value of this type.
    ///
    /// Integer types parse as integers (range-checked), floating types as
    /// floats, `Boolean` as `true`/`false`, `Guid` must be a hyphenated
    /// UUID; every other type passes the text through as a string.
    ///
    /// # Errors
    /// Returns `CoercionError` if the literal does not fit the type.
    pub fn coerce_literal(self, raw: &str) -> Result<Value, CoercionError> {
        let fail = || CoercionError {
            literal: raw.to_owned(),
            expected: self,
        };
        let text = raw.trim();

        if self.is_integer() {
            let n = text.parse::<i64>().map_err(|_| fail())?;
            let (min, max) = self.integer_range();
            if n < min || n > max {
                return Err(fail());
            }
            return Ok(Value::from(n));
        }

        if self.is_floating() {
            let f = text.parse::<f64>().map_err(|_| fail())?;
            return Number::from_f64(f).map(Value::Number).ok_or_else(fail);
        }

        match self {
            WireType::Boolean => match text {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(fail()),
            },
            WireType::Guid => uuid::Uuid::parse_str(text)
                .map(|_| Value::String(text.to_owned()))
                .map_err(|_| fail()),
            _ => Ok(Value::String(raw.to_owned())),
        }
    }

    /// Whether a JSON value can be stored in (or compared against) a field of this type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Bool(_) => self == WireType::Boolean,
            Value::Number(n) => {
                if self.is_integer() {
                    n.is_i64() || n.is_u64()
                } else {
                    self.is_floating()
                }
            }
            Value::String(_) => self.is_quoted(),
            Value::Array(_) | Value::Object(_) => false,
        }
    }

    /// Render a key value as it appears between the parentheses of an entity URL.
    #[must_use]
    pub fn key_literal(self, value: &Value) -> String {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if self.is_quoted() {
            format!("'{}'", text.replace('\'', "''"))
        } else {
            text
        }
    }
}
