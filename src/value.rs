//! Attribute value types and their canonical serialization.
//!
//! Request input and values extracted from matched documents both travel as
//! [`AttributeValue`]. Each value carries a canonical text form
//! ([`AttributeValue::serialized`]) that defines equality, hashing, and
//! deduplication: two values are the same identity evidence iff their
//! canonical serializations match. The same text is substituted into matcher
//! templates, so the dedup key and the query text never disagree.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Declared type of an attribute in the entity model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Boolean,
    Date,
    Number,
    String,
}

impl Default for ValueType {
    fn default() -> Self {
        Self::String
    }
}

impl ValueType {
    /// Returns the model-facing name of this type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Number => "number",
            Self::String => "string",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single typed attribute value.
///
/// Dates travel as the caller-supplied string; formats only matter when
/// coercing free-text terms or rendering stored document fields. Numbers are
/// finite f64 and serialize to one canonical text form (see
/// [`AttributeValue::serialized`]), which is also the text substituted for
/// `{{ value }}` in matcher templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Boolean(bool),
    Date(String),
    Number(f64),
    Text(String),
}

impl AttributeValue {
    /// Builds a number value, rejecting NaN and infinities.
    ///
    /// Negative zero is normalized to zero so that `-0.0` and `0.0` share one
    /// canonical form.
    pub fn number(raw: f64) -> Result<Self, ValidationError> {
        if !raw.is_finite() {
            return Err(ValidationError::InvalidAttributeValue {
                reason: format!("number value must be finite, got {raw}"),
            });
        }
        let raw = if raw == 0.0 { 0.0 } else { raw };
        Ok(Self::Number(raw))
    }

    /// Converts a JSON scalar into a value of the declared type.
    ///
    /// String-typed attributes accept any scalar and keep its text form;
    /// number-typed attributes additionally accept numeric strings (document
    /// fields are frequently stored as text). Nulls, arrays, and objects are
    /// rejected; array-valued document fields are unrolled by the caller.
    pub fn from_json(
        value_type: ValueType,
        json: &serde_json::Value,
    ) -> Result<Self, ValidationError> {
        let mismatch = |actual: &str| ValidationError::ValueTypeMismatch {
            expected: value_type,
            actual: actual.to_string(),
        };
        match value_type {
            ValueType::Boolean => match json {
                serde_json::Value::Bool(b) => Ok(Self::Boolean(*b)),
                serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(Self::Boolean(true)),
                    "false" => Ok(Self::Boolean(false)),
                    _ => Err(mismatch("string")),
                },
                other => Err(mismatch(json_type_name(other))),
            },
            ValueType::Date => match json {
                serde_json::Value::String(s) => Ok(Self::Date(s.clone())),
                other => Err(mismatch(json_type_name(other))),
            },
            ValueType::Number => match json {
                serde_json::Value::Number(n) => {
                    let raw = n.as_f64().ok_or_else(|| mismatch("number"))?;
                    Self::number(raw)
                }
                serde_json::Value::String(s) => {
                    let raw: f64 = s.trim().parse().map_err(|_| mismatch("string"))?;
                    Self::number(raw)
                }
                other => Err(mismatch(json_type_name(other))),
            },
            ValueType::String => match json {
                serde_json::Value::String(s) => Ok(Self::Text(s.clone())),
                serde_json::Value::Bool(b) => Ok(Self::Text(b.to_string())),
                serde_json::Value::Number(n) => Ok(Self::Text(n.to_string())),
                other => Err(mismatch(json_type_name(other))),
            },
        }
    }

    /// Returns the declared type of this value.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Boolean(_) => ValueType::Boolean,
            Self::Date(_) => ValueType::Date,
            Self::Number(_) => ValueType::Number,
            Self::Text(_) => ValueType::String,
        }
    }

    /// Canonical text form of this value.
    ///
    /// Booleans serialize as `true`/`false`; dates and strings as their raw
    /// text. Numbers with zero fraction inside the exact-integer f64 range
    /// (|v| < 2^53) drop the decimal point, so `1` and `1.0` are one identity
    /// value; everything else uses the shortest round-trip decimal form. This
    /// text is the deduplication key and the `{{ value }}` substitution text,
    /// so it must stay stable across releases.
    #[must_use]
    pub fn serialized(&self) -> Cow<'_, str> {
        match self {
            Self::Boolean(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
            Self::Date(s) | Self::Text(s) => Cow::Borrowed(s.as_str()),
            Self::Number(n) => Cow::Owned(canonical_number(*n)),
        }
    }

    /// True when the canonical serialization trims to the empty string.
    ///
    /// Blank values never produce query clauses and never count toward
    /// resolver queryability.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.serialized().trim().is_empty()
    }

    /// Renders this value as JSON, preserving its type. Integral numbers
    /// render without a decimal point, matching the canonical text form.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < EXACT_INT_BOUND {
                    #[allow(clippy::cast_possible_truncation)]
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Value::from(*n)
                }
            }
            Self::Date(s) | Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// Largest magnitude below which every integral f64 is exact. 2^53.
const EXACT_INT_BOUND: f64 = 9_007_199_254_740_992.0;

/// Canonical decimal form for a finite f64.
fn canonical_number(v: f64) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    if v.fract() == 0.0 && v.abs() < EXACT_INT_BOUND {
        #[allow(clippy::cast_possible_truncation)]
        return format!("{}", v as i64);
    }
    format!("{v}")
}

/// Canonical comparison text for a JSON scalar. Numbers follow the same
/// form as [`AttributeValue::serialized`], so `30` and `"30"` compare equal
/// wherever this text is used.
pub(crate) fn json_scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.as_f64().map_or_else(|| n.to_string(), canonical_number),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

const fn json_type_name(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        self.serialized() == other.serialized()
    }
}

impl Eq for AttributeValue {}

impl std::hash::Hash for AttributeValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.serialized().hash(state);
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized())
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}
