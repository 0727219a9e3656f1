//! The declarative entity model.
//!
//! A model names the attributes an identity can carry, the matchers that turn
//! an attribute value into a query clause, the collections (and their fields)
//! that can be searched, and the resolvers that say which attribute
//! combinations are strong enough to identify an entity. Models arrive as
//! JSON, are validated once, and are read-only for the lifetime of a job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EntwineError, ValidationError};
use crate::value::ValueType;

/// Declares one attribute of the modeled identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Value type used to coerce document fields and free-text terms.
    #[serde(rename = "type", default)]
    pub value_type: ValueType,

    /// Baseline identity confidence for the attribute, in [0.0, 1.0].
    /// Absent means the attribute never contributes to scoring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    /// Default params for matchers applied to this attribute. Overridden by
    /// request-level attribute params of the same name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,
}

/// A reusable query-clause template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatcherDef {
    /// Clause template. `{{ field }}`, `{{ value }}`, and `{{ params.* }}`
    /// placeholders may appear in object keys and in string values.
    pub clause: serde_json::Value,

    /// Declared param defaults, the lowest-precedence param layer.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,

    /// Match quality in [0.0, 1.0]. 1.0 or absent means an exact matcher.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
}

/// A minimal attribute combination that identifies an entity on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverDef {
    /// Names of the attributes that must all match.
    pub attributes: Vec<String>,

    /// Tier weight. Resolvers with a higher weight query in an earlier tier
    /// and suppress lower tiers for documents they could have matched.
    #[serde(default)]
    pub weight: i32,
}

/// One searchable field of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// The model attribute this field carries.
    pub attribute: String,

    /// Matcher used to query the field. A field without a matcher is
    /// extracted from documents but never queried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,

    /// Field-level match quality in [0.0, 1.0].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,

    /// Document path values are read from. Defaults to the field name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl FieldDef {
    /// The document path for this field, falling back to the field name.
    #[must_use]
    pub fn document_path<'a>(&'a self, field_name: &'a str) -> &'a str {
        self.path.as_deref().unwrap_or(field_name)
    }
}

/// Field mappings for one searchable collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Field name to definition.
    pub fields: BTreeMap<String, FieldDef>,
}

impl IndexDef {
    /// Fields of this collection mapped to `attribute`, in field-name order.
    pub fn fields_for_attribute<'a>(
        &'a self,
        attribute: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a FieldDef)> {
        self.fields.iter().filter(move |(_, f)| f.attribute == attribute)
    }
}

/// The declarative model that drives a resolution job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityModel {
    /// Attribute name to definition.
    pub attributes: BTreeMap<String, AttributeDef>,

    /// Resolver name to definition.
    pub resolvers: BTreeMap<String, ResolverDef>,

    /// Matcher name to definition.
    pub matchers: BTreeMap<String, MatcherDef>,

    /// Collection name to field mappings.
    pub indices: BTreeMap<String, IndexDef>,
}

impl EntityModel {
    /// Deserializes a model from JSON.
    ///
    /// Callers should then invoke [`EntityModel::validate`] before use.
    pub fn from_json(s: &str) -> Result<Self, EntwineError> {
        serde_json::from_str::<Self>(s)
            .map_err(|e| EntwineError::internal(format!("deserialize entity model: {e}")))
    }

    /// Serializes this model to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String, EntwineError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EntwineError::internal(format!("serialize entity model: {e}")))
    }

    /// Looks up an attribute definition.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.get(name)
    }

    /// Looks up a matcher definition.
    #[must_use]
    pub fn matcher(&self, name: &str) -> Option<&MatcherDef> {
        self.matchers.get(name)
    }

    /// Looks up a resolver definition.
    #[must_use]
    pub fn resolver(&self, name: &str) -> Option<&ResolverDef> {
        self.resolvers.get(name)
    }

    /// Looks up a collection's field mappings.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indices.get(name)
    }

    /// Validates referential integrity and score ranges.
    ///
    /// Deserialization accepts any structurally well-formed JSON; this defends
    /// the engine against models whose resolvers or fields reference names
    /// that do not exist, and against scores outside [0.0, 1.0].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.attributes.is_empty() {
            return Err(ValidationError::InvalidModel {
                reason: "model declares no attributes".to_string(),
            });
        }
        if self.resolvers.is_empty() {
            return Err(ValidationError::InvalidModel {
                reason: "model declares no resolvers".to_string(),
            });
        }
        if self.matchers.is_empty() {
            return Err(ValidationError::InvalidModel {
                reason: "model declares no matchers".to_string(),
            });
        }
        if self.indices.is_empty() {
            return Err(ValidationError::InvalidModel {
                reason: "model declares no collections".to_string(),
            });
        }

        for (name, def) in &self.attributes {
            validate_unit_range(&format!("attribute '{name}' score"), def.score)?;
        }

        for (name, def) in &self.matchers {
            if !def.clause.is_object() {
                return Err(ValidationError::InvalidModel {
                    reason: format!("matcher '{name}' clause template must be a JSON object"),
                });
            }
            validate_unit_range(&format!("matcher '{name}' quality"), def.quality)?;
        }

        for (name, def) in &self.resolvers {
            if def.attributes.is_empty() {
                return Err(ValidationError::InvalidModel {
                    reason: format!("resolver '{name}' names no attributes"),
                });
            }
            for attribute in &def.attributes {
                if !self.attributes.contains_key(attribute) {
                    return Err(ValidationError::UnknownAttribute {
                        name: attribute.clone(),
                        referent: format!("resolver '{name}'"),
                    });
                }
            }
        }

        for (index_name, index) in &self.indices {
            if index.fields.is_empty() {
                return Err(ValidationError::InvalidModel {
                    reason: format!("collection '{index_name}' maps no fields"),
                });
            }
            for (field_name, field) in &index.fields {
                let referent = format!("collection '{index_name}' field '{field_name}'");
                if !self.attributes.contains_key(&field.attribute) {
                    return Err(ValidationError::UnknownAttribute {
                        name: field.attribute.clone(),
                        referent,
                    });
                }
                if let Some(matcher) = &field.matcher {
                    if !self.matchers.contains_key(matcher) {
                        return Err(ValidationError::UnknownMatcher {
                            name: matcher.clone(),
                            referent,
                        });
                    }
                }
                validate_unit_range(
                    &format!("collection '{index_name}' field '{field_name}' quality"),
                    field.quality,
                )?;
            }
        }

        Ok(())
    }
}

fn validate_unit_range(what: &str, value: Option<f64>) -> Result<(), ValidationError> {
    if let Some(v) = value {
        if !(0.0..=1.0).contains(&v) || v.is_nan() {
            return Err(ValidationError::InvalidModel {
                reason: format!("{what} must be within [0.0, 1.0], got {v}"),
            });
        }
    }
    Ok(())
}
