//! Resolution request input.
//!
//! A request seeds a job with what is already known about the entity:
//! attribute values, free-text terms, explicit document ids, or any mix of
//! the three. A scope may narrow which collections and resolvers
//! participate and pin or ban specific attribute values.
//!
//! [`ResolutionRequestBuilder`] provides a fluent API for constructing
//! requests. It validates structure; [`ResolutionRequest::validate`] checks
//! the request against a concrete model before a job runs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::ResolutionConfig;
use crate::error::{EntwineError, ValidationError};
use crate::model::EntityModel;

/// Caller-supplied values and params for one attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputAttribute {
    /// Known values, as raw JSON scalars. Coerced to the attribute's
    /// declared type when the job starts.
    #[serde(default)]
    pub values: Vec<serde_json::Value>,

    /// Params overriding model and matcher params of the same name. The
    /// highest-precedence param layer.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,
}

/// One side of a scope: names and values to include or exclude.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeSelector {
    /// Attribute name to values. Include pins matched documents to these
    /// values; exclude bans them.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Vec<serde_json::Value>>,

    /// Collections this side applies to.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub indices: BTreeSet<String>,

    /// Resolvers this side applies to.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub resolvers: BTreeSet<String>,
}

impl ScopeSelector {
    /// True when this side selects nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.indices.is_empty() && self.resolvers.is_empty()
    }
}

/// Narrows which collections, resolvers, and attribute values a job uses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    /// Only these participate. Empty means no restriction.
    #[serde(default, skip_serializing_if = "ScopeSelector::is_empty")]
    pub include: ScopeSelector,

    /// These never participate.
    #[serde(default, skip_serializing_if = "ScopeSelector::is_empty")]
    pub exclude: ScopeSelector,
}

impl Scope {
    /// True when neither side selects anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// True when `collection` may be searched under this scope.
    #[must_use]
    pub fn allows_index(&self, collection: &str) -> bool {
        if self.exclude.indices.contains(collection) {
            return false;
        }
        self.include.indices.is_empty() || self.include.indices.contains(collection)
    }

    /// True when `resolver` may participate under this scope.
    #[must_use]
    pub fn allows_resolver(&self, resolver: &str) -> bool {
        if self.exclude.resolvers.contains(resolver) {
            return false;
        }
        self.include.resolvers.is_empty() || self.include.resolvers.contains(resolver)
    }
}

/// Input for one resolution job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRequest {
    /// Attribute name to known values and params.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, InputAttribute>,

    /// Free-text terms with no declared attribute. Coerced against every
    /// queryable attribute on hop 0.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub terms: Vec<String>,

    /// Collection name to explicit document ids to seed from on hop 0.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ids: BTreeMap<String, Vec<String>>,

    /// Optional narrowing of collections, resolvers, and attribute values.
    #[serde(default, skip_serializing_if = "Scope::is_empty")]
    pub scope: Scope,

    /// Output and traversal settings.
    #[serde(default)]
    pub config: ResolutionConfig,
}

impl ResolutionRequest {
    /// Deserializes a request from JSON.
    ///
    /// Callers should then invoke [`ResolutionRequest::validate`] against
    /// the model before resolving.
    pub fn from_json(s: &str) -> Result<Self, EntwineError> {
        serde_json::from_str::<Self>(s)
            .map_err(|e| EntwineError::internal(format!("deserialize resolution request: {e}")))
    }

    /// Serializes this request to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String, EntwineError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EntwineError::internal(format!("serialize resolution request: {e}")))
    }

    /// True when the request supplies no attributes, terms, or ids.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.values().all(|a| a.values.is_empty())
            && self.terms.is_empty()
            && self.ids.values().all(Vec::is_empty)
    }

    /// Validates this request against a model.
    ///
    /// Checks that some input was supplied and that every referenced
    /// attribute, collection, and resolver exists in the model. Value type
    /// coercion happens when the job starts.
    pub fn validate(&self, model: &EntityModel) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::InvalidRequest {
                reason: "request supplies no attribute values, terms, or ids".to_string(),
            });
        }

        for name in self.attributes.keys() {
            if !model.attributes.contains_key(name) {
                return Err(ValidationError::UnknownAttribute {
                    name: name.clone(),
                    referent: "request attributes".to_string(),
                });
            }
        }

        for collection in self.ids.keys() {
            if !model.indices.contains_key(collection) {
                return Err(ValidationError::UnknownCollection {
                    name: collection.clone(),
                    referent: "request ids".to_string(),
                });
            }
        }

        let sides = [
            ("scope.include", &self.scope.include),
            ("scope.exclude", &self.scope.exclude),
        ];
        for (side, selector) in sides {
            for name in selector.attributes.keys() {
                if !model.attributes.contains_key(name) {
                    return Err(ValidationError::UnknownAttribute {
                        name: name.clone(),
                        referent: side.to_string(),
                    });
                }
            }
            for name in &selector.indices {
                if !model.indices.contains_key(name) {
                    return Err(ValidationError::UnknownCollection {
                        name: name.clone(),
                        referent: side.to_string(),
                    });
                }
            }
            for name in &selector.resolvers {
                if !model.resolvers.contains_key(name) {
                    return Err(ValidationError::UnknownResolver {
                        name: name.clone(),
                        referent: side.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Builder for resolution requests.
///
/// # Example
/// ```rust,ignore
/// let request = ResolutionRequestBuilder::new()
///     .attribute("name", vec![json!("alice")])
///     .term("555-123-4567")
///     .exclude_index("archived_people")
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResolutionRequestBuilder {
    attributes: BTreeMap<String, InputAttribute>,
    terms: Vec<String>,
    ids: BTreeMap<String, Vec<String>>,
    scope: Scope,
    config: ResolutionConfig,
}

impl ResolutionRequestBuilder {
    /// Creates a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds values for an attribute, appending to any already given.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.attributes.entry(name.into()).or_default().values.extend(values);
        self
    }

    /// Sets params for an attribute, replacing any already given.
    #[must_use]
    pub fn attribute_params(
        mut self,
        name: impl Into<String>,
        params: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        self.attributes.entry(name.into()).or_default().params = params;
        self
    }

    /// Adds one free-text term.
    #[must_use]
    pub fn term(mut self, term: impl Into<String>) -> Self {
        self.terms.push(term.into());
        self
    }

    /// Seeds the job with explicit document ids for a collection.
    #[must_use]
    pub fn ids<I, S>(mut self, collection: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids
            .entry(collection.into())
            .or_default()
            .extend(ids.into_iter().map(Into::into));
        self
    }

    /// Restricts the job to a collection. May be called repeatedly.
    #[must_use]
    pub fn include_index(mut self, collection: impl Into<String>) -> Self {
        self.scope.include.indices.insert(collection.into());
        self
    }

    /// Bans a collection from the job.
    #[must_use]
    pub fn exclude_index(mut self, collection: impl Into<String>) -> Self {
        self.scope.exclude.indices.insert(collection.into());
        self
    }

    /// Restricts the job to a resolver. May be called repeatedly.
    #[must_use]
    pub fn include_resolver(mut self, resolver: impl Into<String>) -> Self {
        self.scope.include.resolvers.insert(resolver.into());
        self
    }

    /// Bans a resolver from the job.
    #[must_use]
    pub fn exclude_resolver(mut self, resolver: impl Into<String>) -> Self {
        self.scope.exclude.resolvers.insert(resolver.into());
        self
    }

    /// Pins matched documents to these values for an attribute.
    #[must_use]
    pub fn include_attribute(
        mut self,
        name: impl Into<String>,
        values: Vec<serde_json::Value>,
    ) -> Self {
        self.scope.include.attributes.entry(name.into()).or_default().extend(values);
        self
    }

    /// Bans these values for an attribute from matched documents.
    #[must_use]
    pub fn exclude_attribute(
        mut self,
        name: impl Into<String>,
        values: Vec<serde_json::Value>,
    ) -> Self {
        self.scope.exclude.attributes.entry(name.into()).or_default().extend(values);
        self
    }

    /// Replaces the job settings.
    #[must_use]
    pub fn config(mut self, config: ResolutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the request.
    ///
    /// Returns `ValidationError` if no attribute values, terms, or ids were
    /// supplied. Model references are checked later by
    /// [`ResolutionRequest::validate`].
    pub fn build(self) -> Result<ResolutionRequest, ValidationError> {
        let request = ResolutionRequest {
            attributes: self.attributes,
            terms: self.terms,
            ids: self.ids,
            scope: self.scope,
            config: self.config,
        };
        if request.is_empty() {
            return Err(ValidationError::InvalidRequest {
                reason: "request supplies no attribute values, terms, or ids".to_string(),
            });
        }
        Ok(request)
    }
}
