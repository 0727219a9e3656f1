//! Live attribute state for a running resolution job.
//!
//! An [`Attribute`] pairs a declared name and type with the set of distinct
//! values known so far. The set only grows: the hop loop merges values
//! extracted from matched documents into it, and a hop that adds nothing new
//! to any attribute is the loop's termination signal.

use std::collections::BTreeMap;

use crate::value::{AttributeValue, ValueType};

/// One attribute of the entity being resolved, with every distinct value
/// discovered for it so far.
///
/// Values are keyed by their canonical serialization, so `1` and `1.0` are
/// one value, and iteration order is the sorted canonical order. Sorted
/// iteration keeps generated queries byte-stable across runs.
#[derive(Debug, Clone)]
pub struct Attribute {
    name: String,
    value_type: ValueType,
    params: BTreeMap<String, serde_json::Value>,
    values: BTreeMap<String, AttributeValue>,
}

impl Attribute {
    /// Creates an empty attribute with no values and no params.
    #[must_use]
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            params: BTreeMap::new(),
            values: BTreeMap::new(),
        }
    }

    /// Attaches caller-supplied params. These override model and matcher
    /// params of the same name during clause construction.
    #[must_use]
    pub fn with_params(mut self, params: BTreeMap<String, serde_json::Value>) -> Self {
        self.params = params;
        self
    }

    /// The attribute name, as declared in the entity model.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared value type.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Caller-supplied params attached to this attribute.
    #[must_use]
    pub const fn params(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.params
    }

    /// Looks up a single caller-supplied param.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    /// Adds a value. Returns true when the value was not already present.
    pub fn insert(&mut self, value: AttributeValue) -> bool {
        let key = value.serialized().into_owned();
        self.values.insert(key, value).is_none()
    }

    /// Adds every value from `values`, returning how many were new.
    pub fn extend<I>(&mut self, values: I) -> usize
    where
        I: IntoIterator<Item = AttributeValue>,
    {
        values.into_iter().filter(|v| self.insert(v.clone())).count()
    }

    /// All values, in sorted canonical order.
    pub fn values(&self) -> impl Iterator<Item = &AttributeValue> {
        self.values.values()
    }

    /// Values that can appear in a query clause, in sorted canonical order.
    /// Blank values are held in the set but never queried.
    pub fn queryable_values(&self) -> impl Iterator<Item = &AttributeValue> {
        self.values.values().filter(|v| !v.is_blank())
    }

    /// True when at least one non-blank value is present.
    #[must_use]
    pub fn is_queryable(&self) -> bool {
        self.values.values().any(|v| !v.is_blank())
    }

    /// Number of distinct values, blank ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no values have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_reports_novelty() {
        let mut attr = Attribute::new("name", ValueType::String);
        assert!(attr.insert("alice".into()));
        assert!(!attr.insert("alice".into()));
        assert_eq!(attr.len(), 1);
    }

    #[test]
    fn values_dedup_by_canonical_form() {
        let mut attr = Attribute::new("age", ValueType::Number);
        assert!(attr.insert(AttributeValue::number(30.0).unwrap()));
        let same = AttributeValue::from_json(ValueType::Number, &serde_json::json!("30.0")).unwrap();
        assert!(!attr.insert(same));
        assert_eq!(attr.len(), 1);
    }

    #[test]
    fn iteration_is_sorted_by_canonical_form() {
        let mut attr = Attribute::new("name", ValueType::String);
        attr.insert("charlie".into());
        attr.insert("alice".into());
        attr.insert("bob".into());
        let order: Vec<String> = attr.values().map(ToString::to_string).collect();
        assert_eq!(order, vec!["alice", "bob", "charlie"]);
    }

    #[test]
    fn extend_counts_only_new_values() {
        let mut attr = Attribute::new("name", ValueType::String);
        attr.insert("alice".into());
        let added = attr.extend(vec!["alice".into(), "bob".into(), "bob".into()]);
        assert_eq!(added, 1);
        assert_eq!(attr.len(), 2);
    }

    #[test]
    fn blank_values_do_not_make_an_attribute_queryable() {
        let mut attr = Attribute::new("name", ValueType::String);
        attr.insert("  ".into());
        assert!(!attr.is_queryable());
        assert_eq!(attr.queryable_values().count(), 0);

        attr.insert("alice".into());
        assert!(attr.is_queryable());
        assert_eq!(attr.queryable_values().count(), 1);
        assert_eq!(attr.len(), 2);
    }

    #[test]
    fn params_ride_along() {
        let mut params = BTreeMap::new();
        params.insert("format".to_string(), serde_json::json!("%Y-%m-%d"));
        let attr = Attribute::new("dob", ValueType::Date).with_params(params);
        assert_eq!(attr.param("format"), Some(&serde_json::json!("%Y-%m-%d")));
        assert_eq!(attr.param("missing"), None);
    }
}
