//! Per-hop, per-collection query assembly.
//!
//! The planner turns the current attribute knowledge into one search body per
//! collection. A body combines up to three match sources: explicit seed ids
//! (hop 0), weight-tiered resolver clauses, and term-coerced resolver clauses
//! (hop 0). Already-seen documents and scope exclusions are masked out with
//! must-not clauses. A collection with nothing to match is skipped for the
//! hop.

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::attribute::Attribute;
use crate::error::ValidationError;
use crate::model::{EntityModel, IndexDef};
use crate::query::clause::{
    build_attribute_clauses, combine, merge_params, resolved_params, ClauseContext, Combiner,
    TagSequence,
};
use crate::query::filter_tree::{resolvers_clause, FilterTree};
use crate::query::grouping::{group_by_weight, sorted_resolver_attributes};
use crate::query::terms::term_attributes;
use crate::request::{ResolutionRequest, ScopeSelector};
use crate::value::{AttributeValue, ValueType};

/// What a query was built from, recorded alongside it in the query log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSummary {
    /// Attribute-driven resolvers that fired, with their tier-sorted
    /// attribute order.
    pub resolvers: BTreeMap<String, Vec<String>>,

    /// Term-driven resolvers that fired, with their sorted attribute order.
    pub term_resolvers: BTreeMap<String, Vec<String>>,

    /// Free-text terms coerced into the query, when any were.
    pub terms: Vec<String>,
}

impl FilterSummary {
    /// Renders the summary for the query log.
    #[must_use]
    pub fn to_json(&self) -> Value {
        fn resolver_map(resolvers: &BTreeMap<String, Vec<String>>) -> Value {
            let mut out = Map::new();
            for (name, attributes) in resolvers {
                out.insert(name.clone(), json!({ "attributes": attributes }));
            }
            Value::Object(out)
        }

        let mut out = Map::new();
        if !self.resolvers.is_empty() {
            out.insert("resolvers".to_string(), resolver_map(&self.resolvers));
        }
        if !self.term_resolvers.is_empty() {
            out.insert(
                "term_resolvers".to_string(),
                resolver_map(&self.term_resolvers),
            );
        }
        if !self.terms.is_empty() {
            out.insert("terms".to_string(), json!(self.terms));
        }
        Value::Object(out)
    }
}

/// One collection's planned query for one hop.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Target collection.
    pub collection: String,

    /// Hop the query belongs to.
    pub hop: u32,

    /// Complete search body.
    pub body: Value,

    /// What the body was built from.
    pub summary: FilterSummary,
}

/// Builds per-collection queries from a model, a request, and the job's
/// evolving attribute state.
#[derive(Debug, Clone, Copy)]
pub struct QueryPlanner<'a> {
    model: &'a EntityModel,
    request: &'a ResolutionRequest,
}

impl<'a> QueryPlanner<'a> {
    /// Creates a planner over a validated model and request.
    #[must_use]
    pub fn new(model: &'a EntityModel, request: &'a ResolutionRequest) -> Self {
        Self { model, request }
    }

    /// Collections the job may search, in name order.
    #[must_use]
    pub fn collections(&self) -> Vec<String> {
        self.model
            .indices
            .keys()
            .filter(|name| self.request.scope.allows_index(name))
            .cloned()
            .collect()
    }

    /// Attributes named by any in-scope resolver. Free-text terms may only
    /// coerce into these.
    fn term_candidates(&self) -> BTreeSet<String> {
        self.model
            .resolvers
            .iter()
            .filter(|(name, _)| self.request.scope.allows_resolver(name))
            .flat_map(|(_, def)| def.attributes.iter().cloned())
            .collect()
    }

    /// True when `attribute` can be queried in this collection at all.
    fn attribute_is_matchable(&self, index: &IndexDef, attribute: &str) -> bool {
        index.fields_for_attribute(attribute).any(|(_, field)| {
            field
                .matcher
                .as_deref()
                .is_some_and(|m| self.model.matcher(m).is_some())
        })
    }

    /// In-scope resolvers whose every attribute has a queryable value and a
    /// matchable field in this collection.
    fn queryable_resolvers(
        &self,
        index: &IndexDef,
        attributes: &BTreeMap<String, Attribute>,
    ) -> Vec<String> {
        self.model
            .resolvers
            .iter()
            .filter(|(name, _)| self.request.scope.allows_resolver(name))
            .filter(|(_, def)| {
                def.attributes.iter().all(|attribute| {
                    attributes.get(attribute).is_some_and(Attribute::is_queryable)
                        && self.attribute_is_matchable(index, attribute)
                })
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Coerces one scope side's attribute values into typed attributes.
    fn scope_attributes(
        &self,
        selector: &ScopeSelector,
    ) -> Result<BTreeMap<String, Attribute>, ValidationError> {
        let mut out = BTreeMap::new();
        for (name, values) in &selector.attributes {
            let def = self.model.attribute(name).ok_or_else(|| {
                ValidationError::UnknownAttribute {
                    name: name.clone(),
                    referent: "scope attributes".to_string(),
                }
            })?;
            let mut attribute = Attribute::new(name.clone(), def.value_type);
            for value in values {
                attribute.insert(AttributeValue::from_json(def.value_type, value)?);
            }
            out.insert(name.clone(), attribute);
        }
        Ok(out)
    }

    /// The tiered resolvers clause and the resolvers it drew on.
    ///
    /// Tiers run from heaviest to lightest. A lighter tier's clause is fenced
    /// by every heavier resolver: a document may satisfy the lighter tier
    /// only where the heavier resolver's attributes are entirely absent or
    /// the heavier resolver itself also matches. Heavier clauses are rebuilt
    /// for each lighter tier, so the fence always reflects the same values.
    fn tiered_resolvers_clause(
        &self,
        ctx: &ClauseContext<'_>,
        attributes: &BTreeMap<String, Attribute>,
        queryable: &[String],
        sequence: &mut TagSequence,
        summary: &mut BTreeMap<String, Vec<String>>,
    ) -> Result<Option<Value>, ValidationError> {
        let groups = group_by_weight(self.model, queryable);
        let mut parents: Vec<Vec<String>> = Vec::new();
        let mut tier_clauses = Vec::new();

        for group in groups.values().rev() {
            let sorted = sorted_resolver_attributes(self.model, group);
            let tree = FilterTree::from_lists(group.iter().map(|name| sorted[name].clone()));
            let Some(tier_clause) = resolvers_clause(ctx, attributes, &tree, sequence)? else {
                continue;
            };

            let clause = if parents.is_empty() {
                tier_clause
            } else {
                let mut constraints = Vec::with_capacity(parents.len() + 1);
                for parent_attributes in &parents {
                    constraints.push(self.parent_fence(
                        ctx,
                        attributes,
                        parent_attributes,
                        sequence,
                    )?);
                }
                constraints.push(tier_clause);
                json!({"bool": {"filter": constraints}})
            };
            tier_clauses.push(clause);

            for name in group {
                summary.insert(name.clone(), sorted[name].clone());
                parents.push(sorted[name].clone());
            }
        }

        Ok(combine(tier_clauses, Combiner::Should))
    }

    /// The fence for one heavier resolver: none of its attributes exist on
    /// the document, or its own clause matches.
    fn parent_fence(
        &self,
        ctx: &ClauseContext<'_>,
        attributes: &BTreeMap<String, Attribute>,
        parent_attributes: &[String],
        sequence: &mut TagSequence,
    ) -> Result<Value, ValidationError> {
        let mut exists = Vec::new();
        for attribute in parent_attributes {
            for (field_name, _) in ctx.index.fields_for_attribute(attribute) {
                exists.push(json!({"exists": {"field": field_name}}));
            }
        }
        let absent = json!({"bool": {"must_not": exists}});

        let tree = FilterTree::from_lists([parent_attributes.to_vec()]);
        Ok(match resolvers_clause(ctx, attributes, &tree, sequence)? {
            Some(parent_clause) => json!({"bool": {"should": [absent, parent_clause]}}),
            None => absent,
        })
    }

    /// The term-coerced resolvers clause for hop 0, untiered.
    fn term_resolvers_clause(
        &self,
        ctx: &ClauseContext<'_>,
        attributes: &BTreeMap<String, Attribute>,
        sequence: &mut TagSequence,
        summary: &mut FilterSummary,
    ) -> Result<Option<Value>, ValidationError> {
        let candidates = self.term_candidates();
        let coerced = term_attributes(
            self.model,
            ctx.index,
            &self.request.terms,
            &candidates,
            attributes,
        );
        let queryable = self.queryable_resolvers(ctx.index, &coerced);
        if queryable.is_empty() {
            return Ok(None);
        }

        let sorted = sorted_resolver_attributes(self.model, &queryable);
        let tree = FilterTree::from_lists(queryable.iter().map(|name| sorted[name].clone()));
        let clause = resolvers_clause(ctx, &coerced, &tree, sequence)?;
        if clause.is_some() {
            summary.terms = self.request.terms.clone();
            for name in &queryable {
                summary.term_resolvers.insert(name.clone(), sorted[name].clone());
            }
        }
        Ok(clause)
    }

    /// Resolved date format for a date-typed field, if one is configured.
    fn date_format(
        &self,
        index: &IndexDef,
        field_name: &str,
        attributes: &BTreeMap<String, Attribute>,
    ) -> Option<String> {
        let field = index.fields.get(field_name)?;
        let def = self.model.attribute(&field.attribute)?;
        if def.value_type != ValueType::Date {
            return None;
        }
        let live = attributes.get(&field.attribute);
        let empty = BTreeMap::new();
        let request_params = live.map_or(&empty, Attribute::params);
        let params = match field.matcher.as_deref().and_then(|m| self.model.matcher(m)) {
            Some(matcher) => resolved_params(self.model, matcher, &field.attribute, live),
            None => merge_params(&empty, &def.params, request_params),
        };
        params
            .get("format")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Docvalue requests for every date field with a resolvable format, so
    /// the backend returns dates already rendered in the caller's format.
    /// Directives are keyed by document path, which is also where the
    /// rendered values come back in each hit's field map.
    fn docvalue_fields(
        &self,
        index: &IndexDef,
        attributes: &BTreeMap<String, Attribute>,
    ) -> Vec<Value> {
        let mut formats: BTreeMap<&str, String> = BTreeMap::new();
        for (field_name, field) in &index.fields {
            if let Some(format) = self.date_format(index, field_name, attributes) {
                formats
                    .entry(field.document_path(field_name))
                    .or_insert(format);
            }
        }
        formats
            .into_iter()
            .map(|(path, format)| json!({"field": path, "format": format}))
            .collect()
    }

    /// Plans one collection's query for one hop.
    ///
    /// Returns `Ok(None)` when no resolver, seed id, or term clause can be
    /// built, meaning the collection is skipped this hop.
    pub fn plan(
        &self,
        collection: &str,
        hop: u32,
        attributes: &BTreeMap<String, Attribute>,
        seen_ids: &BTreeSet<String>,
        sequence: &mut TagSequence,
    ) -> Result<Option<QueryPlan>, ValidationError> {
        let config = &self.request.config;
        let ctx = ClauseContext::for_collection(self.model, collection, config.names_queries())
            .ok_or_else(|| ValidationError::UnknownCollection {
                name: collection.to_string(),
                referent: "query planner".to_string(),
            })?;
        // Scope pins and bans never carry match tags.
        let scope_ctx = ClauseContext {
            named_tags: false,
            ..ctx
        };

        let mut summary = FilterSummary::default();

        // Pins are conjunctive: a document must carry every pinned value.
        let include_attributes = self.scope_attributes(&self.request.scope.include)?;
        let include_clauses = build_attribute_clauses(
            &scope_ctx,
            &include_attributes,
            include_attributes.keys(),
            Combiner::Filter,
            sequence,
        )?;
        let exclude_attributes = self.scope_attributes(&self.request.scope.exclude)?;
        let exclude_clause = combine(
            build_attribute_clauses(
                &scope_ctx,
                &exclude_attributes,
                exclude_attributes.keys(),
                Combiner::Should,
                sequence,
            )?,
            Combiner::Should,
        );

        let seed_ids_clause = if hop == 0 {
            self.request
                .ids
                .get(collection)
                .filter(|ids| !ids.is_empty())
                .map(|ids| json!({"ids": {"values": ids}}))
        } else {
            None
        };

        let queryable = self.queryable_resolvers(ctx.index, attributes);
        let resolvers = self.tiered_resolvers_clause(
            &ctx,
            attributes,
            &queryable,
            sequence,
            &mut summary.resolvers,
        )?;

        let terms = if hop == 0 && !self.request.terms.is_empty() {
            self.term_resolvers_clause(&ctx, attributes, sequence, &mut summary)?
        } else {
            None
        };

        let combined = match (seed_ids_clause, resolvers) {
            (Some(ids), Some(resolvers)) => Some(json!({"bool": {"should": [ids, resolvers]}})),
            (Some(ids), None) => Some(ids),
            (None, resolvers) => resolvers,
        };
        let combined = match (combined, terms) {
            (Some(combined), Some(terms)) => Some(json!({"bool": {"filter": [combined, terms]}})),
            (Some(combined), None) => Some(combined),
            (None, terms) => terms,
        };
        let Some(combined) = combined else {
            return Ok(None);
        };

        let mut filter = include_clauses;
        filter.push(combined);
        let mut must_not = Vec::new();
        if !seen_ids.is_empty() {
            let seen: Vec<&String> = seen_ids.iter().collect();
            must_not.push(json!({"ids": {"values": seen}}));
        }
        if let Some(exclude) = exclude_clause {
            must_not.push(exclude);
        }

        let mut query = Map::new();
        query.insert("filter".to_string(), Value::Array(filter));
        if !must_not.is_empty() {
            query.insert("must_not".to_string(), Value::Array(must_not));
        }

        let mut body = Map::new();
        body.insert("query".to_string(), json!({ "bool": query }));
        body.insert("size".to_string(), json!(config.max_docs_per_query));
        // Sources are always fetched; attribute extraction reads them even
        // when the caller opted out of seeing them.
        body.insert("_source".to_string(), json!(true));
        if config.include_version {
            body.insert("version".to_string(), json!(true));
        }
        if config.include_seq_no_primary_term {
            body.insert("seq_no_primary_term".to_string(), json!(true));
        }
        let docvalues = self.docvalue_fields(ctx.index, attributes);
        if !docvalues.is_empty() {
            body.insert("docvalue_fields".to_string(), Value::Array(docvalues));
        }
        if config.profile {
            body.insert("profile".to_string(), json!(true));
        }

        Ok(Some(QueryPlan {
            collection: collection.to_string(),
            hop,
            body: Value::Object(body),
            summary,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolutionConfig;
    use crate::request::{ResolutionRequest, ResolutionRequestBuilder};
    use serde_json::json;

    fn model() -> EntityModel {
        EntityModel::from_json(
            r#"{
                "attributes": {
                    "name": {"type": "string"},
                    "phone": {"type": "string"},
                    "dob": {"type": "date", "params": {"format": "%Y-%m-%d"}}
                },
                "resolvers": {
                    "strong": {"attributes": ["name"], "weight": 1},
                    "weak": {"attributes": ["phone"]}
                },
                "matchers": {
                    "exact": {"clause": {"term": {"{{ field }}": "{{ value }}"}}}
                },
                "indices": {
                    "people": {
                        "fields": {
                            "full_name": {"attribute": "name", "matcher": "exact"},
                            "tel": {"attribute": "phone", "matcher": "exact"},
                            "birth_date": {"attribute": "dob", "matcher": "exact"}
                        }
                    },
                    "workers": {
                        "fields": {
                            "employee_name": {"attribute": "name", "matcher": "exact"}
                        }
                    }
                }
            }"#,
        )
        .unwrap()
    }

    fn live(entries: &[(&str, ValueType, &[&str])]) -> BTreeMap<String, Attribute> {
        let mut out = BTreeMap::new();
        for (name, value_type, values) in entries {
            let mut attribute = Attribute::new(*name, *value_type);
            for value in *values {
                attribute.insert(AttributeValue::Text((*value).to_string()));
            }
            out.insert((*name).to_string(), attribute);
        }
        out
    }

    fn plan_with(
        model: &EntityModel,
        request: &ResolutionRequest,
        collection: &str,
        hop: u32,
        attributes: &BTreeMap<String, Attribute>,
        seen: &BTreeSet<String>,
    ) -> Option<QueryPlan> {
        let planner = QueryPlanner::new(model, request);
        let mut sequence = TagSequence::new();
        planner
            .plan(collection, hop, attributes, seen, &mut sequence)
            .unwrap()
    }

    #[test]
    fn empty_state_skips_the_collection() {
        let model = model();
        let request = ResolutionRequestBuilder::new()
            .attribute("name", vec![json!("alice")])
            .build()
            .unwrap();
        let plan = plan_with(
            &model,
            &request,
            "people",
            1,
            &BTreeMap::new(),
            &BTreeSet::new(),
        );
        assert!(plan.is_none());
    }

    #[test]
    fn single_resolver_body_shape() {
        let model = model();
        let request = ResolutionRequestBuilder::new()
            .attribute("name", vec![json!("alice")])
            .build()
            .unwrap();
        let attributes = live(&[("name", ValueType::String, &["alice"])]);
        let plan = plan_with(&model, &request, "workers", 0, &attributes, &BTreeSet::new())
            .unwrap();

        assert_eq!(
            plan.body,
            json!({
                "query": {"bool": {"filter": [
                    {"term": {"employee_name": "alice"}}
                ]}},
                "size": 1000,
                "_source": true
            })
        );
        assert_eq!(plan.summary.resolvers["strong"], vec!["name"]);
        assert!(plan.summary.terms.is_empty());
    }

    #[test]
    fn seen_ids_are_masked_out() {
        let model = model();
        let request = ResolutionRequestBuilder::new()
            .attribute("name", vec![json!("alice")])
            .build()
            .unwrap();
        let attributes = live(&[("name", ValueType::String, &["alice"])]);
        let seen: BTreeSet<String> = ["d1".to_string(), "d0".to_string()].into();
        let plan =
            plan_with(&model, &request, "workers", 2, &attributes, &seen).unwrap();

        assert_eq!(
            plan.body["query"]["bool"]["must_not"],
            json!([{"ids": {"values": ["d0", "d1"]}}])
        );
    }

    #[test]
    fn seed_ids_or_with_resolvers_on_hop_zero_only() {
        let model = model();
        let request = ResolutionRequestBuilder::new()
            .attribute("name", vec![json!("alice")])
            .ids("workers", ["w1", "w2"])
            .build()
            .unwrap();
        let attributes = live(&[("name", ValueType::String, &["alice"])]);

        let plan = plan_with(&model, &request, "workers", 0, &attributes, &BTreeSet::new())
            .unwrap();
        assert_eq!(
            plan.body["query"]["bool"]["filter"][0],
            json!({"bool": {"should": [
                {"ids": {"values": ["w1", "w2"]}},
                {"term": {"employee_name": "alice"}}
            ]}})
        );

        let plan = plan_with(&model, &request, "workers", 1, &attributes, &BTreeSet::new())
            .unwrap();
        assert_eq!(
            plan.body["query"]["bool"]["filter"][0],
            json!({"term": {"employee_name": "alice"}})
        );
    }

    #[test]
    fn seed_ids_alone_still_query() {
        let model = model();
        let request = ResolutionRequestBuilder::new()
            .ids("workers", ["w1"])
            .build()
            .unwrap();
        let plan = plan_with(
            &model,
            &request,
            "workers",
            0,
            &BTreeMap::new(),
            &BTreeSet::new(),
        )
        .unwrap();
        assert_eq!(
            plan.body["query"]["bool"]["filter"][0],
            json!({"ids": {"values": ["w1"]}})
        );
    }

    #[test]
    fn lighter_tier_is_fenced_by_heavier_resolvers() {
        let model = model();
        let request = ResolutionRequestBuilder::new()
            .attribute("name", vec![json!("alice")])
            .build()
            .unwrap();
        let attributes = live(&[
            ("name", ValueType::String, &["alice"]),
            ("phone", ValueType::String, &["555"]),
        ]);
        let plan = plan_with(&model, &request, "people", 0, &attributes, &BTreeSet::new())
            .unwrap();

        let tiers = plan.body["query"]["bool"]["filter"][0]["bool"]["should"]
            .as_array()
            .unwrap();
        assert_eq!(tiers.len(), 2);
        // Heaviest tier queries unfenced.
        assert_eq!(tiers[0], json!({"term": {"full_name": "alice"}}));
        // Lighter tier: (name absent OR strong matches) AND weak's clause.
        assert_eq!(
            tiers[1],
            json!({"bool": {"filter": [
                {"bool": {"should": [
                    {"bool": {"must_not": [{"exists": {"field": "full_name"}}]}},
                    {"term": {"full_name": "alice"}}
                ]}},
                {"term": {"tel": "555"}}
            ]}})
        );
        assert_eq!(plan.summary.resolvers["strong"], vec!["name"]);
        assert_eq!(plan.summary.resolvers["weak"], vec!["phone"]);
    }

    #[test]
    fn terms_clause_ands_with_the_rest() {
        let model = model();
        let request = ResolutionRequestBuilder::new()
            .attribute("phone", vec![json!("555")])
            .term("bob")
            .build()
            .unwrap();
        let attributes = live(&[("phone", ValueType::String, &["555"])]);
        let plan = plan_with(&model, &request, "people", 0, &attributes, &BTreeSet::new())
            .unwrap();

        let filter = plan.body["query"]["bool"]["filter"][0]["bool"]["filter"]
            .as_array()
            .unwrap();
        // Attribute resolvers clause first, term resolvers clause second.
        assert_eq!(filter[0], json!({"term": {"tel": "555"}}));
        let term_tiers = filter[1]["bool"]["should"].as_array().unwrap();
        // Term set holds name="bob" and phone in {"555", "bob"}.
        assert_eq!(term_tiers[0], json!({"term": {"full_name": "bob"}}));
        assert_eq!(
            term_tiers[1],
            json!({"bool": {"should": [
                {"term": {"tel": "555"}},
                {"term": {"tel": "bob"}}
            ]}})
        );
        assert_eq!(plan.summary.terms, vec!["bob"]);
        assert_eq!(plan.summary.term_resolvers["strong"], vec!["name"]);
        assert_eq!(plan.summary.term_resolvers["weak"], vec!["phone"]);
        assert_eq!(plan.summary.resolvers["weak"], vec!["phone"]);
        assert_eq!(plan.summary.resolvers.get("strong"), None);
    }

    #[test]
    fn terms_alone_can_seed_hop_zero() {
        let model = model();
        let request = ResolutionRequestBuilder::new().term("alice").build().unwrap();
        let plan = plan_with(
            &model,
            &request,
            "workers",
            0,
            &BTreeMap::new(),
            &BTreeSet::new(),
        )
        .unwrap();
        assert_eq!(
            plan.body["query"]["bool"]["filter"][0],
            json!({"term": {"employee_name": "alice"}})
        );
        assert!(plan.summary.resolvers.is_empty());
        assert_eq!(plan.summary.term_resolvers["strong"], vec!["name"]);
    }

    #[test]
    fn scope_pins_filter_and_bans_mask() {
        let model = model();
        let request = ResolutionRequestBuilder::new()
            .attribute("name", vec![json!("alice")])
            .include_attribute("phone", vec![json!("555")])
            .exclude_attribute("name", vec![json!("mallory")])
            .build()
            .unwrap();
        let attributes = live(&[("name", ValueType::String, &["alice"])]);
        let plan = plan_with(&model, &request, "people", 0, &attributes, &BTreeSet::new())
            .unwrap();

        let filter = plan.body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(filter[0], json!({"term": {"tel": "555"}}));
        assert_eq!(
            plan.body["query"]["bool"]["must_not"],
            json!([{"term": {"full_name": "mallory"}}])
        );
    }

    #[test]
    fn pins_with_several_values_demand_every_one() {
        let model = model();
        let request = ResolutionRequestBuilder::new()
            .attribute("name", vec![json!("alice")])
            .include_attribute("phone", vec![json!("555"), json!("556")])
            .build()
            .unwrap();
        let attributes = live(&[("name", ValueType::String, &["alice"])]);
        let plan = plan_with(&model, &request, "people", 0, &attributes, &BTreeSet::new())
            .unwrap();

        // Both pinned numbers are required, not either one.
        let filter = plan.body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(
            filter[0],
            json!({"bool": {"filter": [
                {"term": {"tel": "555"}},
                {"term": {"tel": "556"}}
            ]}})
        );
    }

    #[test]
    fn excluded_resolver_never_queries() {
        let model = model();
        let request = ResolutionRequestBuilder::new()
            .attribute("name", vec![json!("alice")])
            .exclude_resolver("strong")
            .build()
            .unwrap();
        let attributes = live(&[("name", ValueType::String, &["alice"])]);
        let plan = plan_with(&model, &request, "workers", 0, &attributes, &BTreeSet::new());
        assert!(plan.is_none());
    }

    #[test]
    fn scope_gates_collections() {
        let model = model();
        let request = ResolutionRequestBuilder::new()
            .attribute("name", vec![json!("alice")])
            .exclude_index("workers")
            .build()
            .unwrap();
        let planner = QueryPlanner::new(&model, &request);
        assert_eq!(planner.collections(), vec!["people"]);
    }

    #[test]
    fn date_fields_request_docvalues_in_their_format() {
        let model = model();
        let request = ResolutionRequestBuilder::new()
            .attribute("name", vec![json!("alice")])
            .build()
            .unwrap();
        let attributes = live(&[("name", ValueType::String, &["alice"])]);
        let plan = plan_with(&model, &request, "people", 0, &attributes, &BTreeSet::new())
            .unwrap();
        assert_eq!(
            plan.body["docvalue_fields"],
            json!([{"field": "birth_date", "format": "%Y-%m-%d"}])
        );
    }

    #[test]
    fn version_and_seq_no_flags_shape_the_body() {
        let model = model();
        let config = ResolutionConfig {
            include_version: true,
            include_seq_no_primary_term: true,
            profile: true,
            max_docs_per_query: 25,
            ..ResolutionConfig::default()
        };
        let request = ResolutionRequestBuilder::new()
            .attribute("name", vec![json!("alice")])
            .config(config)
            .build()
            .unwrap();
        let attributes = live(&[("name", ValueType::String, &["alice"])]);
        let plan = plan_with(&model, &request, "workers", 0, &attributes, &BTreeSet::new())
            .unwrap();
        assert_eq!(plan.body["version"], json!(true));
        assert_eq!(plan.body["seq_no_primary_term"], json!(true));
        assert_eq!(plan.body["profile"], json!(true));
        assert_eq!(plan.body["size"], json!(25));
    }

    #[test]
    fn score_request_tags_value_clauses() {
        let model = model();
        let config = ResolutionConfig {
            include_score: true,
            ..ResolutionConfig::default()
        };
        let request = ResolutionRequestBuilder::new()
            .attribute("name", vec![json!("alice")])
            .config(config)
            .build()
            .unwrap();
        let attributes = live(&[("name", ValueType::String, &["alice"])]);
        let plan = plan_with(&model, &request, "workers", 0, &attributes, &BTreeSet::new())
            .unwrap();
        let clause = &plan.body["query"]["bool"]["filter"][0];
        let tag = clause["bool"]["_name"].as_str().unwrap();
        let parsed = crate::query::clause::MatchTag::parse(tag).unwrap();
        assert_eq!(parsed.attribute, "name");
        assert_eq!(parsed.field, "employee_name");
        assert_eq!(parsed.value, "alice");
    }

    #[test]
    fn planning_is_deterministic() {
        let model = model();
        let config = ResolutionConfig {
            include_explanation: true,
            ..ResolutionConfig::default()
        };
        let request = ResolutionRequestBuilder::new()
            .attribute("name", vec![json!("alice")])
            .attribute("phone", vec![json!("555"), json!("556")])
            .term("carol")
            .config(config)
            .build()
            .unwrap();
        let attributes = live(&[
            ("name", ValueType::String, &["alice"]),
            ("phone", ValueType::String, &["555", "556"]),
        ]);

        let first = plan_with(&model, &request, "people", 0, &attributes, &BTreeSet::new())
            .unwrap();
        let second = plan_with(&model, &request, "people", 0, &attributes, &BTreeSet::new())
            .unwrap();
        assert_eq!(first.body, second.body);
        assert_eq!(first.summary, second.summary);
    }

    #[test]
    fn summary_renders_for_the_query_log() {
        let summary = FilterSummary {
            resolvers: BTreeMap::from([("strong".to_string(), vec!["name".to_string()])]),
            term_resolvers: BTreeMap::new(),
            terms: vec!["alice".to_string()],
        };
        assert_eq!(
            summary.to_json(),
            json!({
                "resolvers": {"strong": {"attributes": ["name"]}},
                "terms": ["alice"]
            })
        );
    }
}
