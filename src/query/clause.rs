//! Matcher template instantiation.
//!
//! A matcher's clause template is a JSON object with `{{ field }}`,
//! `{{ value }}`, and `{{ params.* }}` placeholders in its keys and string
//! values. Instantiation substitutes the target field name, the value's
//! canonical serialization, and merged params, producing the concrete clause
//! sent to the backend. When tagging is on, each value clause is wrapped in
//! a named bool so a matched document reveals exactly which attribute,
//! field, matcher, and value fired.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use regex::Regex;

use crate::attribute::Attribute;
use crate::error::ValidationError;
use crate::model::{EntityModel, IndexDef, MatcherDef};
use crate::value::{json_scalar_text, AttributeValue};

/// How sibling clauses combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combiner {
    /// All siblings must match.
    Filter,
    /// At least one sibling must match.
    Should,
}

impl Combiner {
    /// The bool-query occurrence key for this combiner.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Should => "should",
        }
    }
}

/// Job-wide counter for named-tag sequence ids.
///
/// Sequence ids make every tag unique across all queries of one job, even
/// when the same attribute, field, matcher, and value recur on later hops.
#[derive(Debug, Default)]
pub struct TagSequence {
    next: u64,
}

impl TagSequence {
    /// Creates a counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next sequence id.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// A parsed named-match tag.
///
/// Rendered as `attribute:field:matcher:base64(value):sequence`. The value
/// travels base64-encoded so its serialization cannot collide with the
/// separator. Names containing `:` cannot be represented and such tags are
/// skipped by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchTag {
    /// Attribute whose value produced the clause.
    pub attribute: String,
    /// Queried field name.
    pub field: String,
    /// Matcher that produced the clause.
    pub matcher: String,
    /// The value's canonical serialization.
    pub value: String,
    /// Job-wide sequence id.
    pub sequence: u64,
}

impl MatchTag {
    /// Parses a rendered tag. Returns `None` for anything malformed.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        let parts: Vec<&str> = tag.split(':').collect();
        let [attribute, field, matcher, encoded, sequence] = parts.as_slice() else {
            return None;
        };
        let value = String::from_utf8(BASE64.decode(encoded.as_bytes()).ok()?).ok()?;
        Some(Self {
            attribute: (*attribute).to_string(),
            field: (*field).to_string(),
            matcher: (*matcher).to_string(),
            value,
            sequence: sequence.parse().ok()?,
        })
    }
}

impl fmt::Display for MatchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.attribute,
            self.field,
            self.matcher,
            BASE64.encode(self.value.as_bytes()),
            self.sequence
        )
    }
}

/// Everything clause construction needs about the current collection.
#[derive(Debug, Clone, Copy)]
pub struct ClauseContext<'a> {
    /// The model the job runs against.
    pub model: &'a EntityModel,
    /// Target collection name.
    pub collection: &'a str,
    /// The collection's field mappings.
    pub index: &'a IndexDef,
    /// Whether value clauses are wrapped with named tags.
    pub named_tags: bool,
}

impl<'a> ClauseContext<'a> {
    /// Builds a context for `collection`, if the model maps it.
    #[must_use]
    pub fn for_collection(
        model: &'a EntityModel,
        collection: &'a str,
        named_tags: bool,
    ) -> Option<Self> {
        model.index(collection).map(|index| Self {
            model,
            collection,
            index,
            named_tags,
        })
    }
}

/// Merges the three param layers, lowest precedence first.
///
/// A later non-null value overwrites an earlier one. A later null never
/// erases an earlier non-null value; it only claims keys nothing else set.
#[must_use]
pub fn merge_params(
    matcher: &BTreeMap<String, serde_json::Value>,
    model_attribute: &BTreeMap<String, serde_json::Value>,
    request_attribute: &BTreeMap<String, serde_json::Value>,
) -> BTreeMap<String, serde_json::Value> {
    let mut merged = BTreeMap::new();
    for layer in [matcher, model_attribute, request_attribute] {
        for (key, value) in layer {
            if value.is_null() {
                merged.entry(key.clone()).or_insert(serde_json::Value::Null);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

/// Params in effect for `attribute` when queried through `matcher`, taking
/// the request-level params riding on the live attribute into account.
#[must_use]
pub fn resolved_params(
    model: &EntityModel,
    matcher: &MatcherDef,
    attribute: &str,
    live: Option<&Attribute>,
) -> BTreeMap<String, serde_json::Value> {
    static EMPTY: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    let model_params = model.attribute(attribute).map_or(&EMPTY, |def| &def.params);
    let request_params = live.map_or(&EMPTY, Attribute::params);
    merge_params(&matcher.params, model_params, request_params)
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*(field|value|params\.[A-Za-z0-9_.\-]+)\s*\}\}")
            .expect("placeholder pattern compiles")
    })
}

enum Substituted {
    Text(String),
    Structural(serde_json::Value),
}

fn resolve_placeholder(
    target: &str,
    matcher_name: &str,
    field: &str,
    value_text: &str,
    params: &BTreeMap<String, serde_json::Value>,
) -> Result<String, ValidationError> {
    match target {
        "field" => Ok(field.to_string()),
        "value" => Ok(value_text.to_string()),
        name => {
            // Only the leading "params." is placeholder syntax; the rest is
            // the key verbatim, even when it starts with "params." itself.
            let key = name.strip_prefix("params.").unwrap_or(name);
            params
                .get(key)
                .filter(|v| !v.is_null())
                .map(json_scalar_text)
                .ok_or_else(|| ValidationError::MissingMatcherParam {
                    matcher: matcher_name.to_string(),
                    param: key.to_string(),
                })
        }
    }
}

fn substitute_string(
    text: &str,
    matcher_name: &str,
    field: &str,
    value_text: &str,
    params: &BTreeMap<String, serde_json::Value>,
) -> Result<Substituted, ValidationError> {
    let re = placeholder_regex();

    // A string that is exactly one params placeholder may substitute the
    // param's JSON value structurally, so templates can splice in arrays and
    // objects, not just scalar text.
    if let Some(caps) = re.captures(text) {
        if let Some(whole) = caps.get(0) {
            if whole.start() == 0 && whole.end() == text.len() {
                let target = &caps[1];
                if let Some(key) = target.strip_prefix("params.") {
                    let value = params.get(key).filter(|v| !v.is_null()).ok_or_else(|| {
                        ValidationError::MissingMatcherParam {
                            matcher: matcher_name.to_string(),
                            param: key.to_string(),
                        }
                    })?;
                    if value.is_object() || value.is_array() {
                        return Ok(Substituted::Structural(value.clone()));
                    }
                }
            }
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&resolve_placeholder(
            &caps[1],
            matcher_name,
            field,
            value_text,
            params,
        )?);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(Substituted::Text(out))
}

fn substitute_node(
    node: &serde_json::Value,
    matcher_name: &str,
    field: &str,
    value_text: &str,
    params: &BTreeMap<String, serde_json::Value>,
) -> Result<serde_json::Value, ValidationError> {
    match node {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                let substituted_key =
                    match substitute_string(key, matcher_name, field, value_text, params)? {
                        Substituted::Text(text) => text,
                        Substituted::Structural(v) => json_scalar_text(&v),
                    };
                out.insert(
                    substituted_key,
                    substitute_node(value, matcher_name, field, value_text, params)?,
                );
            }
            Ok(serde_json::Value::Object(out))
        }
        serde_json::Value::Array(items) => Ok(serde_json::Value::Array(
            items
                .iter()
                .map(|item| substitute_node(item, matcher_name, field, value_text, params))
                .collect::<Result<_, _>>()?,
        )),
        serde_json::Value::String(text) => {
            Ok(match substitute_string(text, matcher_name, field, value_text, params)? {
                Substituted::Text(out) => serde_json::Value::String(out),
                Substituted::Structural(value) => value,
            })
        }
        other => Ok(other.clone()),
    }
}

/// Instantiates a matcher template for one field and one value.
pub fn build_clause(
    matcher_name: &str,
    matcher: &MatcherDef,
    field: &str,
    value: &AttributeValue,
    params: &BTreeMap<String, serde_json::Value>,
) -> Result<serde_json::Value, ValidationError> {
    substitute_node(&matcher.clause, matcher_name, field, &value.serialized(), params)
}

/// Combines sibling clauses. Zero clauses vanish; a single clause passes
/// through unwrapped; more nest under one bool.
#[must_use]
pub fn combine(mut clauses: Vec<serde_json::Value>, combiner: Combiner) -> Option<serde_json::Value> {
    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(serde_json::json!({"bool": {combiner.key(): clauses}})),
    }
}

/// Builds the clause for one attribute in one collection.
///
/// One clause per non-blank value per mapped-and-matchable field, values
/// combined per field with `combiner`, fields combined the same way. Returns
/// `Ok(None)` when the attribute has no queryable value or no matchable
/// field here.
pub fn build_attribute_clause(
    ctx: &ClauseContext<'_>,
    attributes: &BTreeMap<String, Attribute>,
    name: &str,
    combiner: Combiner,
    seq: &mut TagSequence,
) -> Result<Option<serde_json::Value>, ValidationError> {
    let Some(attribute) = attributes.get(name) else {
        return Ok(None);
    };

    let mut field_clauses = Vec::new();
    for (field_name, field) in ctx.index.fields_for_attribute(name) {
        let Some(matcher_name) = field.matcher.as_deref() else {
            continue;
        };
        let Some(matcher) = ctx.model.matcher(matcher_name) else {
            continue;
        };
        let params = resolved_params(ctx.model, matcher, name, Some(attribute));

        let mut value_clauses = Vec::new();
        for value in attribute.queryable_values() {
            let clause = build_clause(matcher_name, matcher, field_name, value, &params)?;
            value_clauses.push(if ctx.named_tags {
                let tag = MatchTag {
                    attribute: name.to_string(),
                    field: field_name.clone(),
                    matcher: matcher_name.to_string(),
                    value: value.serialized().into_owned(),
                    sequence: seq.next_id(),
                };
                serde_json::json!({"bool": {"_name": tag.to_string(), "filter": [clause]}})
            } else {
                clause
            });
        }
        if let Some(clause) = combine(value_clauses, combiner) {
            field_clauses.push(clause);
        }
    }
    Ok(combine(field_clauses, combiner))
}

/// Builds one clause per queryable attribute in `names`, in the given order.
pub fn build_attribute_clauses<'n, I>(
    ctx: &ClauseContext<'_>,
    attributes: &BTreeMap<String, Attribute>,
    names: I,
    combiner: Combiner,
    seq: &mut TagSequence,
) -> Result<Vec<serde_json::Value>, ValidationError>
where
    I: IntoIterator<Item = &'n String>,
{
    let mut clauses = Vec::new();
    for name in names {
        if let Some(clause) = build_attribute_clause(ctx, attributes, name, combiner, seq)? {
            clauses.push(clause);
        }
    }
    Ok(clauses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;
    use serde_json::json;

    fn model() -> EntityModel {
        EntityModel::from_json(
            r#"{
                "attributes": {
                    "name": {"type": "string"},
                    "phone": {"type": "string", "params": {"fuzziness": 1}}
                },
                "resolvers": {"name_only": {"attributes": ["name"]}},
                "matchers": {
                    "exact": {"clause": {"term": {"{{ field }}": "{{ value }}"}}},
                    "fuzzy": {
                        "clause": {"match": {"{{ field }}": {"query": "{{ value }}", "fuzziness": "{{ params.fuzziness }}"}}},
                        "params": {"fuzziness": "auto"}
                    }
                },
                "indices": {
                    "people": {
                        "fields": {
                            "full_name": {"attribute": "name", "matcher": "exact"},
                            "nickname": {"attribute": "name", "matcher": "exact"},
                            "phone_e164": {"attribute": "phone", "matcher": "fuzzy"}
                        }
                    }
                }
            }"#,
        )
        .unwrap()
    }

    fn live(name: &str, value_type: ValueType, values: &[&str]) -> BTreeMap<String, Attribute> {
        let mut attribute = Attribute::new(name, value_type);
        for v in values {
            attribute.insert((*v).into());
        }
        BTreeMap::from([(name.to_string(), attribute)])
    }

    #[test]
    fn template_substitutes_field_and_value() {
        let model = model();
        let matcher = model.matcher("exact").unwrap();
        let clause = build_clause(
            "exact",
            matcher,
            "full_name",
            &AttributeValue::from("alice"),
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(clause, json!({"term": {"full_name": "alice"}}));
    }

    #[test]
    fn missing_param_names_matcher_and_param() {
        let model = model();
        let matcher = model.matcher("fuzzy").unwrap();
        let err = build_clause(
            "fuzzy",
            matcher,
            "phone_e164",
            &AttributeValue::from("555"),
            &BTreeMap::new(),
        )
        .unwrap_err();
        let ValidationError::MissingMatcherParam { matcher, param } = err else {
            panic!("expected MissingMatcherParam, got {err:?}");
        };
        assert_eq!(matcher, "fuzzy");
        assert_eq!(param, "fuzziness");
    }

    #[test]
    fn unused_params_are_ignored() {
        let model = model();
        let matcher = model.matcher("exact").unwrap();
        let params = BTreeMap::from([("y".to_string(), json!("unused"))]);
        let clause = build_clause(
            "exact",
            matcher,
            "f",
            &AttributeValue::from("v"),
            &params,
        )
        .unwrap();
        assert_eq!(clause, json!({"term": {"f": "v"}}));
    }

    #[test]
    fn param_merge_precedence() {
        let matcher = BTreeMap::from([
            ("fuzziness".to_string(), json!("auto")),
            ("slop".to_string(), json!(0)),
        ]);
        let model_attr = BTreeMap::from([("fuzziness".to_string(), json!(2))]);
        let request_attr = BTreeMap::from([("fuzziness".to_string(), json!(1))]);
        let merged = merge_params(&matcher, &model_attr, &request_attr);
        assert_eq!(merged["fuzziness"], json!(1));
        assert_eq!(merged["slop"], json!(0));
    }

    #[test]
    fn null_at_higher_level_does_not_erase() {
        let matcher = BTreeMap::from([("fuzziness".to_string(), json!("auto"))]);
        let request_attr = BTreeMap::from([("fuzziness".to_string(), serde_json::Value::Null)]);
        let merged = merge_params(&matcher, &BTreeMap::new(), &request_attr);
        assert_eq!(merged["fuzziness"], json!("auto"));
    }

    #[test]
    fn resolved_params_blend_all_three_layers() {
        // Matcher declares window and format, the model attribute overrides
        // format, the request attribute overrides window.
        let model = EntityModel::from_json(
            r#"{
                "attributes": {"signup": {"type": "date", "params": {"format": "%Y-%m-%d"}}},
                "resolvers": {"signup_only": {"attributes": ["signup"]}},
                "matchers": {
                    "recent": {
                        "clause": {"range": {"{{ field }}": {"gte": "{{ value }}||-{{ params.window }}"}}},
                        "params": {"window": "1h", "format": "%d/%m/%Y"}
                    }
                },
                "indices": {
                    "people": {"fields": {"signup_at": {"attribute": "signup", "matcher": "recent"}}}
                }
            }"#,
        )
        .unwrap();
        let live = Attribute::new("signup", ValueType::Date)
            .with_params(BTreeMap::from([("window".to_string(), json!("15m"))]));
        let matcher = model.matcher("recent").unwrap();
        let params = resolved_params(&model, matcher, "signup", Some(&live));
        assert_eq!(params["format"], json!("%Y-%m-%d"));
        assert_eq!(params["window"], json!("15m"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn numeric_params_render_canonically() {
        let model = model();
        let matcher = model.matcher("fuzzy").unwrap();
        let params = BTreeMap::from([("fuzziness".to_string(), json!(1.0))]);
        let clause = build_clause(
            "fuzzy",
            matcher,
            "phone_e164",
            &AttributeValue::from("555"),
            &params,
        )
        .unwrap();
        assert_eq!(
            clause,
            json!({"match": {"phone_e164": {"query": "555", "fuzziness": "1"}}})
        );
    }

    #[test]
    fn whole_string_param_substitutes_structurally() {
        let matcher = MatcherDef {
            clause: json!({"terms": {"{{ field }}": "{{ params.candidates }}"}}),
            params: BTreeMap::new(),
            quality: None,
        };
        let params = BTreeMap::from([("candidates".to_string(), json!(["a", "b"]))]);
        let clause =
            build_clause("set", &matcher, "f", &AttributeValue::from("v"), &params).unwrap();
        assert_eq!(clause, json!({"terms": {"f": ["a", "b"]}}));
    }

    #[test]
    fn param_keys_may_themselves_start_with_params() {
        let matcher = MatcherDef {
            clause: json!({
                "terms": {"{{ field }}": "{{ params.params.candidates }}"},
                "boost": "b{{ params.params.boost }}"
            }),
            params: BTreeMap::new(),
            quality: None,
        };
        let params = BTreeMap::from([
            ("params.candidates".to_string(), json!(["a", "b"])),
            ("params.boost".to_string(), json!(2)),
        ]);
        let clause =
            build_clause("set", &matcher, "f", &AttributeValue::from("v"), &params).unwrap();
        // The inline and whole-string paths resolve the same key.
        assert_eq!(
            clause,
            json!({"terms": {"f": ["a", "b"]}, "boost": "b2"})
        );
    }

    #[test]
    fn attribute_clause_ors_fields_and_values() {
        let model = model();
        let ctx = ClauseContext::for_collection(&model, "people", false).unwrap();
        let attributes = live("name", ValueType::String, &["alice", "bob"]);
        let mut seq = TagSequence::new();
        let clause = build_attribute_clause(&ctx, &attributes, "name", Combiner::Should, &mut seq)
            .unwrap()
            .unwrap();
        assert_eq!(
            clause,
            json!({"bool": {"should": [
                {"bool": {"should": [
                    {"term": {"full_name": "alice"}},
                    {"term": {"full_name": "bob"}}
                ]}},
                {"bool": {"should": [
                    {"term": {"nickname": "alice"}},
                    {"term": {"nickname": "bob"}}
                ]}}
            ]}})
        );
    }

    #[test]
    fn single_value_single_field_stays_unwrapped() {
        let model = model();
        let ctx = ClauseContext::for_collection(&model, "people", false).unwrap();
        let attributes = live("phone", ValueType::String, &["555"]);
        let mut seq = TagSequence::new();
        let clause = build_attribute_clause(&ctx, &attributes, "phone", Combiner::Should, &mut seq)
            .unwrap()
            .unwrap();
        assert_eq!(
            clause,
            json!({"match": {"phone_e164": {"query": "555", "fuzziness": "1"}}})
        );
    }

    #[test]
    fn blank_values_produce_no_clause() {
        let model = model();
        let ctx = ClauseContext::for_collection(&model, "people", false).unwrap();
        let attributes = live("name", ValueType::String, &["  "]);
        let mut seq = TagSequence::new();
        let clause =
            build_attribute_clause(&ctx, &attributes, "name", Combiner::Should, &mut seq).unwrap();
        assert!(clause.is_none());
    }

    #[test]
    fn named_tags_wrap_value_clauses_with_unique_sequences() {
        let model = model();
        let ctx = ClauseContext::for_collection(&model, "people", true).unwrap();
        let attributes = live("phone", ValueType::String, &["555"]);
        let mut seq = TagSequence::new();
        let clause = build_attribute_clause(&ctx, &attributes, "phone", Combiner::Should, &mut seq)
            .unwrap()
            .unwrap();
        let name = clause["bool"]["_name"].as_str().unwrap();
        let tag = MatchTag::parse(name).unwrap();
        assert_eq!(tag.attribute, "phone");
        assert_eq!(tag.field, "phone_e164");
        assert_eq!(tag.matcher, "fuzzy");
        assert_eq!(tag.value, "555");
        assert_eq!(tag.sequence, 0);
        assert_eq!(seq.next_id(), 1);
    }

    #[test]
    fn tag_roundtrip() {
        let tag = MatchTag {
            attribute: "dob".to_string(),
            field: "birth_date".to_string(),
            matcher: "exact".to_string(),
            value: "1984-02-15".to_string(),
            sequence: 41,
        };
        let rendered = tag.to_string();
        assert_eq!(MatchTag::parse(&rendered).unwrap(), tag);
    }

    #[test]
    fn malformed_tags_parse_to_none() {
        assert!(MatchTag::parse("not a tag").is_none());
        assert!(MatchTag::parse("a:b:c:!!!:0").is_none());
        assert!(MatchTag::parse("a:b:c:dGV4dA==:notanumber").is_none());
        assert!(MatchTag::parse("a:b:c:dGV4dA==:0:extra").is_none());
    }

    #[test]
    fn combine_shapes() {
        assert_eq!(combine(vec![], Combiner::Filter), None);
        assert_eq!(
            combine(vec![json!({"term": {"a": 1}})], Combiner::Filter),
            Some(json!({"term": {"a": 1}}))
        );
        assert_eq!(
            combine(
                vec![json!({"term": {"a": 1}}), json!({"term": {"b": 2}})],
                Combiner::Filter
            ),
            Some(json!({"bool": {"filter": [{"term": {"a": 1}}, {"term": {"b": 2}}]}}))
        );
    }
}
