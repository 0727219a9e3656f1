//! The multi-hop resolution engine.
//!
//! [`ResolutionEngine::resolve`] runs one job: it plans one query per
//! in-scope collection, dispatches the hop, folds extracted attribute values
//! back into the job state, and repeats until a hop discovers nothing new or
//! the hop ceiling is reached. Search execution sits behind two seams: a
//! [`SearchBackend`] evaluates single queries, and a [`SearchDispatcher`]
//! decides how a hop's queries run, inline or fanned out to worker pools as
//! [`runtime`] does.

pub mod runtime;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use uuid::Uuid;

use crate::attribute::Attribute;
use crate::config::ResolutionConfig;
use crate::error::{EntwineError, ValidationError};
use crate::model::{EntityModel, IndexDef};
use crate::query::clause::{MatchTag, TagSequence};
use crate::query::planner::{QueryPlan, QueryPlanner};
use crate::report::{
    ErrorOrigin, ErrorReport, Explanation, MatchDetail, QueryLogEntry, ResolutionHit,
    ResolutionResult,
};
use crate::request::ResolutionRequest;
use crate::score::{score_composite, score_match, ScoreCache};
use crate::search::{
    values_at_path, SearchBackend, SearchFailure, SearchHit, SearchOutcome, SearchRequest,
    SearchResponse,
};
use crate::value::{AttributeValue, ValueType};

/// Fans one hop's queries out to the backend.
///
/// The engine plans every hop sequentially so clause tags stay stable, then
/// hands the whole hop over. Implementations may run the queries on worker
/// threads; the returned outcomes must line up with the requests by
/// position.
pub trait SearchDispatcher: Send + Sync {
    /// Runs every request, returning outcomes in request order.
    fn dispatch(
        &self,
        backend: &Arc<dyn SearchBackend>,
        requests: Vec<SearchRequest>,
    ) -> Vec<SearchOutcome>;
}

/// Runs a hop's queries one after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDispatcher;

impl SearchDispatcher for DirectDispatcher {
    fn dispatch(
        &self,
        backend: &Arc<dyn SearchBackend>,
        requests: Vec<SearchRequest>,
    ) -> Vec<SearchOutcome> {
        requests
            .iter()
            .map(|request| backend.search(request))
            .collect()
    }
}

/// The multi-hop resolution engine.
///
/// Cheap to clone and safe to share across threads. A running job borrows
/// the engine immutably and keeps every piece of per-job state to itself.
#[derive(Clone)]
pub struct ResolutionEngine {
    backend: Arc<dyn SearchBackend>,
    dispatcher: Arc<dyn SearchDispatcher>,
}

impl ResolutionEngine {
    /// Creates an engine that searches through `backend`, running each hop's
    /// queries sequentially on the job's thread.
    #[must_use]
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            backend,
            dispatcher: Arc::new(DirectDispatcher),
        }
    }

    /// Creates an engine with a custom dispatch strategy.
    #[must_use]
    pub fn with_dispatcher(
        backend: Arc<dyn SearchBackend>,
        dispatcher: Arc<dyn SearchDispatcher>,
    ) -> Self {
        Self {
            backend,
            dispatcher,
        }
    }

    /// Runs one resolution job to completion.
    ///
    /// Returns `Err` only when the model, the request, or the seeded input
    /// values fail validation before any search runs. Failures after that
    /// point travel inside the result, so hits accumulated by completed hops
    /// are never lost to a late error.
    pub fn resolve(
        &self,
        model: &EntityModel,
        request: &ResolutionRequest,
    ) -> Result<ResolutionResult, EntwineError> {
        model.validate()?;
        request.validate(model)?;
        let job = ResolutionJob::new(self, model, request)?;
        Ok(job.run())
    }
}

/// State of one running job.
struct ResolutionJob<'a> {
    engine: &'a ResolutionEngine,
    model: &'a EntityModel,
    request: &'a ResolutionRequest,
    config: &'a ResolutionConfig,
    planner: QueryPlanner<'a>,
    request_id: String,

    /// Live attribute state, growing as hops extract values.
    attributes: BTreeMap<String, Attribute>,

    /// Ids already returned, per collection. Doubles as the at-most-once
    /// guard and the mask excluding prior hits from later queries.
    seen: BTreeMap<String, BTreeSet<String>>,

    /// Collections whose backing index is missing, skipped for the rest of
    /// the job.
    missing: BTreeSet<String>,

    hits: Vec<ResolutionHit>,
    queries: Vec<QueryLogEntry>,
    error: Option<ErrorReport>,
    hop: u32,

    /// Job-wide query numbering, in dispatch order.
    next_query: u64,
    tags: TagSequence,
    scores: ScoreCache,
}

impl<'a> ResolutionJob<'a> {
    fn new(
        engine: &'a ResolutionEngine,
        model: &'a EntityModel,
        request: &'a ResolutionRequest,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            engine,
            model,
            request,
            config: &request.config,
            planner: QueryPlanner::new(model, request),
            request_id: Uuid::new_v4().to_string(),
            attributes: seed_attributes(model, request)?,
            seen: BTreeMap::new(),
            missing: BTreeSet::new(),
            hits: Vec::new(),
            queries: Vec::new(),
            error: None,
            hop: 0,
            next_query: 0,
            tags: TagSequence::new(),
            scores: ScoreCache::new(),
        })
    }

    fn run(mut self) -> ResolutionResult {
        let started = Instant::now();
        tracing::debug!(
            "resolution job {} starting with {} input attributes, {} terms, ids for {} collections",
            self.request_id,
            self.attributes.len(),
            self.request.terms.len(),
            self.request.ids.len()
        );

        loop {
            let grew = self.run_hop();
            if self.error.is_some() || !grew || !self.config.allows_hop(self.hop + 1) {
                break;
            }
            self.hop += 1;
        }

        let took = started.elapsed();
        tracing::debug!(
            "resolution job {} stopped at hop {}: {} hits, {} logged queries, took {:?}",
            self.request_id,
            self.hop,
            self.hits.len(),
            self.queries.len(),
            took
        );
        ResolutionResult {
            request_id: self.request_id,
            took,
            hits: self.hits,
            queries: self.queries,
            error: self.error,
            config: self.config.clone(),
        }
    }

    /// Plans, dispatches, and folds in one hop. Returns true when the hop
    /// discovered at least one new attribute value.
    fn run_hop(&mut self) -> bool {
        static NO_IDS: BTreeSet<String> = BTreeSet::new();

        let mut plans = Vec::new();
        for collection in self.planner.collections() {
            if self.missing.contains(&collection) {
                continue;
            }
            let seen = self.seen.get(&collection).unwrap_or(&NO_IDS);
            match self
                .planner
                .plan(&collection, self.hop, &self.attributes, seen, &mut self.tags)
            {
                Ok(Some(plan)) => plans.push(plan),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        "job {} failed planning hop {} for collection '{}': {}",
                        self.request_id,
                        self.hop,
                        collection,
                        err
                    );
                    self.error = Some(ErrorReport {
                        origin: ErrorOrigin::Engine,
                        kind: "validation".to_string(),
                        message: err.to_string(),
                        trace: None,
                    });
                    return false;
                }
            }
        }
        if plans.is_empty() {
            return false;
        }

        let requests: Vec<SearchRequest> = plans
            .iter()
            .map(|plan| SearchRequest {
                collection: plan.collection.clone(),
                body: plan.body.clone(),
                timeout: self.config.max_time_per_query(),
                tuning: self.config.search.clone(),
            })
            .collect();
        let first_query = self.next_query;
        self.next_query += plans.len() as u64;
        let outcomes = self
            .engine
            .dispatcher
            .dispatch(&self.engine.backend, requests);

        let mut grew = false;
        for (offset, (plan, outcome)) in plans.into_iter().zip(outcomes).enumerate() {
            let query = first_query + offset as u64;
            match outcome {
                SearchOutcome::Ok(response) => {
                    if self.process_response(&plan, query, &response) {
                        grew = true;
                    }
                }
                SearchOutcome::IndexMissing => self.skip_collection(&plan, query),
                SearchOutcome::Fatal(failure) => {
                    self.abort(&plan, query, &failure);
                    break;
                }
            }
        }
        grew
    }

    /// Folds one successful response into the job. Returns true when it
    /// contributed a new attribute value.
    fn process_response(&mut self, plan: &QueryPlan, query: u64, response: &SearchResponse) -> bool {
        if self.config.logs_queries() {
            self.queries.push(QueryLogEntry {
                collection: plan.collection.clone(),
                hop: plan.hop,
                query,
                request: plan.body.clone(),
                response: Some(response.raw.clone()),
                error: None,
                filters: plan.summary.clone(),
            });
        }
        let Some(index) = self.model.index(&plan.collection) else {
            return false;
        };

        let mut grew = false;
        for hit in &response.hits {
            let first_sighting = self
                .seen
                .entry(plan.collection.clone())
                .or_default()
                .insert(hit.id.clone());
            if !first_sighting {
                continue;
            }
            let extracted = extract_hit(self.model, &plan.collection, index, hit);
            if self.merge_attributes(&extracted.attributes) {
                grew = true;
            }
            let annotated = self.annotate_hit(plan, query, hit, extracted);
            self.hits.push(annotated);
        }
        grew
    }

    /// Merges extracted values into the live attribute state. Returns true
    /// when any value was new.
    fn merge_attributes(&mut self, discovered: &BTreeMap<String, Vec<AttributeValue>>) -> bool {
        let mut grew = false;
        for (name, values) in discovered {
            let Some(def) = self.model.attribute(name) else {
                continue;
            };
            let attribute = self
                .attributes
                .entry(name.clone())
                .or_insert_with(|| Attribute::new(name.clone(), def.value_type));
            if attribute.extend(values.iter().cloned()) > 0 {
                grew = true;
            }
        }
        grew
    }

    fn annotate_hit(
        &mut self,
        plan: &QueryPlan,
        query: u64,
        hit: &SearchHit,
        extracted: ExtractedHit,
    ) -> ResolutionHit {
        let tags: Vec<MatchTag> = if self.config.names_queries() {
            hit.matched_queries
                .iter()
                .filter_map(|tag| MatchTag::parse(tag))
                .collect()
        } else {
            Vec::new()
        };
        let score = if self.config.include_score {
            self.score_hit(&plan.collection, &tags)
        } else {
            None
        };
        let explanation = if self.config.include_explanation {
            Some(self.explain_hit(&plan.collection, &tags, &extracted))
        } else {
            None
        };
        ResolutionHit {
            collection: plan.collection.clone(),
            id: hit.id.clone(),
            hop: plan.hop,
            query,
            score,
            attributes: extracted.attributes,
            explanation,
            source: if self.config.include_source {
                hit.source.clone()
            } else {
                None
            },
            version: hit.version,
            seq_no: hit.seq_no,
            primary_term: hit.primary_term,
        }
    }

    /// Composite confidence for one hit: the best score per attribute across
    /// the value clauses that fired, conflated across attributes. Attributes
    /// without a base score never contribute.
    fn score_hit(&mut self, collection: &str, tags: &[MatchTag]) -> Option<f64> {
        let mut best: BTreeMap<&String, f64> = BTreeMap::new();
        for tag in tags {
            if let Some(score) = self.tag_score(collection, tag) {
                let entry = best.entry(&tag.attribute).or_insert(score);
                if score > *entry {
                    *entry = score;
                }
            }
        }
        score_composite(best.into_values().map(Some))
    }

    fn tag_score(&mut self, collection: &str, tag: &MatchTag) -> Option<f64> {
        let model = self.model;
        let index = model.index(collection)?;
        self.scores.score_or_insert_with(
            &tag.attribute,
            &tag.matcher,
            collection,
            &tag.field,
            || {
                let base = model.attribute(&tag.attribute).and_then(|def| def.score);
                let matcher_quality = model.matcher(&tag.matcher).and_then(|def| def.quality);
                let field_quality = index.fields.get(&tag.field).and_then(|def| def.quality);
                score_match(base, matcher_quality, field_quality)
            },
        )
    }

    fn explain_hit(
        &mut self,
        collection: &str,
        tags: &[MatchTag],
        extracted: &ExtractedHit,
    ) -> Explanation {
        let matched: BTreeSet<&String> = tags.iter().map(|tag| &tag.attribute).collect();
        let mut resolvers = BTreeMap::new();
        for (name, def) in &self.model.resolvers {
            if !self.request.scope.allows_resolver(name) || def.attributes.is_empty() {
                continue;
            }
            if def.attributes.iter().all(|attribute| matched.contains(attribute)) {
                resolvers.insert(name.clone(), def.attributes.clone());
            }
        }

        let mut ordered: Vec<&MatchTag> = tags.iter().collect();
        ordered.sort_by(|a, b| {
            (&a.attribute, &a.field, &a.matcher, &a.value)
                .cmp(&(&b.attribute, &b.field, &b.matcher, &b.value))
        });
        ordered.dedup_by(|a, b| {
            a.attribute == b.attribute
                && a.field == b.field
                && a.matcher == b.matcher
                && a.value == b.value
        });

        let mut matches = Vec::new();
        for tag in ordered {
            let score = self.tag_score(collection, tag);
            let params = self
                .attributes
                .get(&tag.attribute)
                .map(|attribute| attribute.params().clone())
                .unwrap_or_default();
            matches.push(MatchDetail {
                attribute: tag.attribute.clone(),
                target_field: tag.field.clone(),
                target_value: extracted
                    .fields
                    .get(&tag.field)
                    .cloned()
                    .unwrap_or(Value::Null),
                input_value: tag.value.clone(),
                input_matcher: tag.matcher.clone(),
                input_matcher_params: params,
                score,
            });
        }
        Explanation { resolvers, matches }
    }

    fn skip_collection(&mut self, plan: &QueryPlan, query: u64) {
        tracing::warn!(
            "job {}: collection '{}' has no backing index, skipping it for all remaining hops",
            self.request_id,
            plan.collection
        );
        self.missing.insert(plan.collection.clone());
        if self.config.logs_queries() {
            self.queries.push(QueryLogEntry {
                collection: plan.collection.clone(),
                hop: plan.hop,
                query,
                request: plan.body.clone(),
                response: None,
                error: Some(ErrorReport {
                    origin: ErrorOrigin::Backend,
                    kind: "index_missing".to_string(),
                    message: format!("collection '{}' has no backing index", plan.collection),
                    trace: None,
                }),
                filters: plan.summary.clone(),
            });
        }
    }

    fn abort(&mut self, plan: &QueryPlan, query: u64, failure: &SearchFailure) {
        tracing::warn!(
            "job {}: search against collection '{}' failed on hop {}: {}",
            self.request_id,
            failure.collection,
            plan.hop,
            failure.message
        );
        let report = ErrorReport {
            origin: ErrorOrigin::Backend,
            kind: "search_failed".to_string(),
            message: format!(
                "search against collection '{}' failed: {}",
                failure.collection, failure.message
            ),
            trace: if self.config.include_error_trace {
                failure.trace.clone()
            } else {
                None
            },
        };
        if self.config.logs_queries() {
            self.queries.push(QueryLogEntry {
                collection: plan.collection.clone(),
                hop: plan.hop,
                query,
                request: plan.body.clone(),
                response: None,
                error: Some(report.clone()),
                filters: plan.summary.clone(),
            });
        }
        self.error = Some(report);
    }
}

/// Coerces the request's input attributes into live attribute state.
/// Attributes with params but no values are kept; their params still apply
/// to values discovered later.
fn seed_attributes(
    model: &EntityModel,
    request: &ResolutionRequest,
) -> Result<BTreeMap<String, Attribute>, ValidationError> {
    let mut attributes = BTreeMap::new();
    for (name, input) in &request.attributes {
        let def = model
            .attribute(name)
            .ok_or_else(|| ValidationError::UnknownAttribute {
                name: name.clone(),
                referent: "request attributes".to_string(),
            })?;
        let mut attribute =
            Attribute::new(name.clone(), def.value_type).with_params(input.params.clone());
        for value in &input.values {
            attribute.insert(AttributeValue::from_json(def.value_type, value)?);
        }
        attributes.insert(name.clone(), attribute);
    }
    Ok(attributes)
}

/// What one document contributed: coerced values per attribute, and the raw
/// document value per field for explanations.
struct ExtractedHit {
    attributes: BTreeMap<String, Vec<AttributeValue>>,
    fields: BTreeMap<String, Value>,
}

/// Pulls attribute values out of one returned document.
///
/// Walks every mapped field of the collection, reads the document at the
/// field's path, and coerces what it finds to the attribute's type. Blank
/// values and values that refuse coercion are dropped; each attribute's
/// values are deduplicated into sorted canonical order.
fn extract_hit(
    model: &EntityModel,
    collection: &str,
    index: &IndexDef,
    hit: &SearchHit,
) -> ExtractedHit {
    let mut attributes: BTreeMap<String, BTreeMap<String, AttributeValue>> = BTreeMap::new();
    let mut fields = BTreeMap::new();
    for (field_name, field) in &index.fields {
        let Some(def) = model.attribute(&field.attribute) else {
            continue;
        };
        let path = field.document_path(field_name);
        let raw = raw_field_values(def.value_type, hit, path);
        if raw.is_empty() {
            continue;
        }
        fields.insert(field_name.clone(), summarize_raw(&raw));
        let bucket = attributes.entry(field.attribute.clone()).or_default();
        for value in raw {
            match AttributeValue::from_json(def.value_type, value) {
                Ok(coerced) => {
                    if !coerced.is_blank() {
                        bucket.insert(coerced.serialized().into_owned(), coerced);
                    }
                }
                Err(reason) => tracing::debug!(
                    "dropping value at '{}' in collection '{}' for attribute '{}': {}",
                    path,
                    collection,
                    field.attribute,
                    reason
                ),
            }
        }
    }
    ExtractedHit {
        attributes: attributes
            .into_iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| (name, values.into_values().collect()))
            .collect(),
        fields,
    }
}

/// Raw values behind one field of a returned document. Date fields prefer
/// the docvalue rendering, which arrives in the attribute's declared format,
/// and fall back to the source. Everything else reads the source.
fn raw_field_values<'h>(value_type: ValueType, hit: &'h SearchHit, path: &str) -> Vec<&'h Value> {
    if value_type == ValueType::Date {
        match hit.fields.get(path) {
            Some(Value::Array(items)) => return items.iter().filter(|v| !v.is_null()).collect(),
            Some(other) if !other.is_null() => return vec![other],
            _ => {}
        }
    }
    hit.source
        .as_ref()
        .map(|source| values_at_path(source, path))
        .unwrap_or_default()
}

fn summarize_raw(values: &[&Value]) -> Value {
    match values {
        [single] => (*single).clone(),
        many => Value::Array(many.iter().map(|v| (*v).clone()).collect()),
    }
}
