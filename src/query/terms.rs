//! Free-text term coercion.
//!
//! A request may carry bare terms with no attribute assignment. On the first
//! hop each term is tentatively read as every candidate attribute's type:
//! whatever coerces cleanly becomes a value of that attribute for this
//! collection's query. Coercion is per collection because date acceptance
//! depends on the formats configured for the collection's fields.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

use crate::attribute::Attribute;
use crate::model::{EntityModel, IndexDef};
use crate::query::clause::resolved_params;
use crate::value::{AttributeValue, ValueType};

fn number_literal() -> &'static Regex {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    NUMBER.get_or_init(|| {
        Regex::new(r"^[-+]?[0-9]*\.?[0-9]+([eE][-+]?[0-9]+)?$")
            .expect("number literal pattern compiles")
    })
}

fn parses_as_date(text: &str, format: &str) -> bool {
    NaiveDateTime::parse_from_str(text, format).is_ok()
        || NaiveDate::parse_from_str(text, format).is_ok()
}

/// Finds a date format that accepts `text`, walking every field and matcher
/// mapped to `attribute` in this collection and resolving the `format` param
/// through the usual precedence layers.
fn date_format_accepts(
    model: &EntityModel,
    index: &IndexDef,
    attribute: &str,
    live: Option<&Attribute>,
    text: &str,
) -> bool {
    for (_, field) in index.fields_for_attribute(attribute) {
        let Some(matcher_name) = field.matcher.as_deref() else {
            continue;
        };
        let Some(matcher) = model.matcher(matcher_name) else {
            continue;
        };
        let params = resolved_params(model, matcher, attribute, live);
        let Some(format) = params.get("format").and_then(serde_json::Value::as_str) else {
            continue;
        };
        if parses_as_date(text, format) {
            return true;
        }
    }
    false
}

fn coerce(
    model: &EntityModel,
    index: &IndexDef,
    value_type: ValueType,
    attribute: &str,
    live: Option<&Attribute>,
    term: &str,
) -> Option<AttributeValue> {
    match value_type {
        ValueType::Boolean => {
            if term.eq_ignore_ascii_case("true") {
                Some(AttributeValue::Boolean(true))
            } else if term.eq_ignore_ascii_case("false") {
                Some(AttributeValue::Boolean(false))
            } else {
                None
            }
        }
        ValueType::Number => {
            if !number_literal().is_match(term) {
                return None;
            }
            let parsed: f64 = term.parse().ok()?;
            AttributeValue::number(parsed).ok()
        }
        ValueType::Date => date_format_accepts(model, index, attribute, live, term)
            .then(|| AttributeValue::Date(term.to_string())),
        ValueType::String => Some(AttributeValue::Text(term.to_string())),
    }
}

/// Widens the known attributes with term-coerced values for one collection.
///
/// `candidates` names the attributes of every in-scope resolver; only those
/// receive coerced values. Known values and request params always carry
/// through. Attributes that gain nothing and were not already known stay
/// absent from the result.
#[must_use]
pub fn term_attributes(
    model: &EntityModel,
    index: &IndexDef,
    terms: &[String],
    candidates: &BTreeSet<String>,
    known: &BTreeMap<String, Attribute>,
) -> BTreeMap<String, Attribute> {
    let mut merged = known.clone();
    for name in candidates {
        let Some(def) = model.attribute(name) else {
            continue;
        };
        let mut coerced = Vec::new();
        for term in terms {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            if let Some(value) =
                coerce(model, index, def.value_type, name, known.get(name), term)
            {
                coerced.push(value);
            }
        }
        if coerced.is_empty() {
            continue;
        }
        merged
            .entry(name.clone())
            .or_insert_with(|| Attribute::new(name.clone(), def.value_type))
            .extend(coerced);
    }
    merged
}
