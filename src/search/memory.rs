//! In-memory search backend.
//!
//! A thread-safe backend that evaluates the boolean query language the
//! engine generates: `bool` (with `filter`, `must`, `should`, `must_not`,
//! and `_name` tagging), `term`, `match`, `exists`, `ids`, and `match_all`.
//! It is intended for embedded usage, tests, and as a reference
//! implementation of the backend contract.
//!
//! Documents are plain JSON objects. Evaluation walks them in id order, so
//! results are deterministic for a given set of inserts.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::search::{
    values_at_path, SearchBackend, SearchFailure, SearchHit, SearchOutcome, SearchRequest,
    SearchResponse,
};
use crate::value::json_scalar_text;

#[derive(Debug, Clone)]
struct StoredDocument {
    source: serde_json::Value,
    seq_no: i64,
}

#[derive(Debug, Default)]
struct BackendState {
    collections: BTreeMap<String, BTreeMap<String, StoredDocument>>,
    forced_failures: BTreeMap<String, String>,
    next_seq_no: i64,
}

/// A thread-safe in-memory [`SearchBackend`].
#[derive(Debug, Default)]
pub struct MemorySearchBackend {
    state: RwLock<BackendState>,
}

impl MemorySearchBackend {
    /// Creates an empty backend with no collections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty collection. Searching an empty collection succeeds
    /// with zero hits; searching an absent one reports IndexMissing.
    pub fn create_collection(&self, collection: impl Into<String>) {
        if let Ok(mut state) = self.state.write() {
            state.collections.entry(collection.into()).or_default();
        }
    }

    /// Inserts or replaces a document, creating the collection if needed.
    pub fn insert(
        &self,
        collection: impl Into<String>,
        id: impl Into<String>,
        source: serde_json::Value,
    ) {
        if let Ok(mut state) = self.state.write() {
            state.next_seq_no += 1;
            let seq_no = state.next_seq_no;
            state
                .collections
                .entry(collection.into())
                .or_default()
                .insert(id.into(), StoredDocument { source, seq_no });
        }
    }

    /// Removes a collection entirely. Subsequent searches against it report
    /// IndexMissing.
    pub fn remove_collection(&self, collection: &str) {
        if let Ok(mut state) = self.state.write() {
            state.collections.remove(collection);
        }
    }

    /// Forces every search against a collection to fail fatally.
    pub fn fail_collection(&self, collection: impl Into<String>, message: impl Into<String>) {
        if let Ok(mut state) = self.state.write() {
            state.forced_failures.insert(collection.into(), message.into());
        }
    }

    fn fatal(collection: &str, message: impl Into<String>) -> SearchOutcome {
        SearchOutcome::Fatal(SearchFailure {
            collection: collection.to_string(),
            message: message.into(),
            trace: None,
        })
    }
}

impl SearchBackend for MemorySearchBackend {
    fn search(&self, request: &SearchRequest) -> SearchOutcome {
        let started = Instant::now();
        let state = match self.state.read() {
            Ok(state) => state,
            Err(_) => return Self::fatal(&request.collection, "poisoned backend lock"),
        };

        if let Some(message) = state.forced_failures.get(&request.collection) {
            return Self::fatal(&request.collection, message.clone());
        }
        let Some(documents) = state.collections.get(&request.collection) else {
            return SearchOutcome::IndexMissing;
        };

        let body = &request.body;
        let query = body.get("query").cloned().unwrap_or_else(|| {
            serde_json::json!({"match_all": {}})
        });
        let size = body
            .get("size")
            .and_then(serde_json::Value::as_u64)
            .map_or(10, |n| n as usize);
        let want_source = body
            .get("_source")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);
        let want_version = body
            .get("version")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let want_seq_no = body
            .get("seq_no_primary_term")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let docvalue_fields = body
            .get("docvalue_fields")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut hits = Vec::new();
        let mut total = 0_u64;
        for (id, document) in documents {
            let mut tags = Vec::new();
            match evaluate(&query, &document.source, id, &mut tags) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(message) => return Self::fatal(&request.collection, message),
            }
            total += 1;
            if hits.len() >= size {
                continue;
            }

            let mut fields = serde_json::Map::new();
            for directive in &docvalue_fields {
                let Some(path) = directive.get("field").and_then(serde_json::Value::as_str) else {
                    continue;
                };
                let format = directive.get("format").and_then(serde_json::Value::as_str);
                let values: Vec<serde_json::Value> = values_at_path(&document.source, path)
                    .into_iter()
                    .map(|v| render_docvalue(v, format))
                    .collect();
                if !values.is_empty() {
                    fields.insert(path.to_string(), serde_json::Value::Array(values));
                }
            }

            hits.push(SearchHit {
                id: id.clone(),
                score: Some(0.0),
                source: want_source.then(|| document.source.clone()),
                fields,
                matched_queries: tags,
                version: want_version.then_some(1),
                seq_no: want_seq_no.then_some(document.seq_no),
                primary_term: want_seq_no.then_some(1),
            });
        }

        let took = started.elapsed();
        let raw = raw_response(&request.collection, &hits, total, took);
        SearchOutcome::Ok(SearchResponse { hits, total, took, raw })
    }
}

/// Evaluates one query clause against one document.
///
/// Returns an error for clause kinds this backend does not understand, which
/// the engine surfaces as a fatal query failure.
fn evaluate(
    query: &serde_json::Value,
    document: &serde_json::Value,
    document_id: &str,
    tags: &mut Vec<String>,
) -> Result<bool, String> {
    let Some(clause) = query.as_object() else {
        return Err(format!("query clause must be an object, got: {query}"));
    };
    let Some((kind, body)) = clause.iter().next() else {
        return Err("query clause is empty".to_string());
    };
    match kind.as_str() {
        "match_all" => Ok(true),
        "bool" => evaluate_bool(body, document, document_id, tags),
        "term" => Ok(evaluate_term(body, document)),
        "match" => Ok(evaluate_match(body, document)),
        "exists" => Ok(body
            .get("field")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|path| !values_at_path(document, path).is_empty())),
        "ids" => Ok(body
            .get("values")
            .and_then(serde_json::Value::as_array)
            .is_some_and(|values| {
                values.iter().any(|v| v.as_str() == Some(document_id))
            })),
        other => Err(format!("unsupported query clause: {other}")),
    }
}

fn clause_list(value: Option<&serde_json::Value>) -> Vec<&serde_json::Value> {
    match value {
        None => Vec::new(),
        Some(serde_json::Value::Array(items)) => items.iter().collect(),
        Some(single) => vec![single],
    }
}

fn evaluate_bool(
    body: &serde_json::Value,
    document: &serde_json::Value,
    document_id: &str,
    tags: &mut Vec<String>,
) -> Result<bool, String> {
    let filters = clause_list(body.get("filter"));
    let musts = clause_list(body.get("must"));
    let shoulds = clause_list(body.get("should"));
    let must_nots = clause_list(body.get("must_not"));

    let mut local_tags = Vec::new();
    for clause in filters.iter().chain(musts.iter()) {
        if !evaluate(clause, document, document_id, &mut local_tags)? {
            return Ok(false);
        }
    }

    // Matches inside a non-matching or negated branch never surface.
    let mut discarded = Vec::new();
    for clause in &must_nots {
        if evaluate(clause, document, document_id, &mut discarded)? {
            return Ok(false);
        }
    }

    let minimum_should = usize::from(!shoulds.is_empty() && filters.is_empty() && musts.is_empty());
    let mut should_matches = 0;
    for clause in &shoulds {
        let mut branch_tags = Vec::new();
        if evaluate(clause, document, document_id, &mut branch_tags)? {
            should_matches += 1;
            local_tags.append(&mut branch_tags);
        }
    }
    if should_matches < minimum_should {
        return Ok(false);
    }

    tags.append(&mut local_tags);
    if let Some(name) = body.get("_name").and_then(serde_json::Value::as_str) {
        tags.push(name.to_string());
    }
    Ok(true)
}

fn term_argument(body: &serde_json::Value) -> Option<(&String, &serde_json::Value)> {
    let object = body.as_object()?;
    let (path, argument) = object.iter().find(|(k, _)| *k != "_name" && *k != "boost")?;
    let value = match argument {
        serde_json::Value::Object(inner) => inner.get("value").or_else(|| inner.get("query"))?,
        other => other,
    };
    Some((path, value))
}

fn evaluate_term(body: &serde_json::Value, document: &serde_json::Value) -> bool {
    let Some((path, value)) = term_argument(body) else {
        return false;
    };
    let expected = json_scalar_text(value);
    values_at_path(document, path)
        .into_iter()
        .any(|v| json_scalar_text(v) == expected)
}

fn evaluate_match(body: &serde_json::Value, document: &serde_json::Value) -> bool {
    let Some((path, value)) = term_argument(body) else {
        return false;
    };
    let query_tokens = analyze(&json_scalar_text(value));
    if query_tokens.is_empty() {
        return false;
    }
    values_at_path(document, path).into_iter().any(|v| {
        let document_tokens = analyze(&json_scalar_text(v));
        query_tokens.iter().all(|t| document_tokens.contains(t))
    })
}

fn analyze(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Renders one docvalue. With a format, date-like values are re-rendered in
/// that format: numbers are read as epoch milliseconds, strings are parsed
/// against common date shapes. Values that cannot be read as dates pass
/// through unchanged.
fn render_docvalue(value: &serde_json::Value, format: Option<&str>) -> serde_json::Value {
    let Some(format) = format else {
        return value.clone();
    };
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map_or_else(|| value.clone(), |dt| {
                serde_json::Value::String(dt.naive_utc().format(format).to_string())
            }),
        serde_json::Value::String(s) => parse_datetime(s).map_or_else(
            || value.clone(),
            |dt| serde_json::Value::String(dt.format(format).to_string()),
        ),
        other => other.clone(),
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
}

fn raw_response(
    collection: &str,
    hits: &[SearchHit],
    total: u64,
    took: Duration,
) -> serde_json::Value {
    let rendered: Vec<serde_json::Value> = hits
        .iter()
        .map(|hit| {
            let mut entry = serde_json::Map::new();
            entry.insert("_index".to_string(), serde_json::json!(collection));
            entry.insert("_id".to_string(), serde_json::json!(hit.id));
            entry.insert("_score".to_string(), serde_json::json!(hit.score));
            if let Some(version) = hit.version {
                entry.insert("_version".to_string(), serde_json::json!(version));
            }
            if let Some(seq_no) = hit.seq_no {
                entry.insert("_seq_no".to_string(), serde_json::json!(seq_no));
            }
            if let Some(primary_term) = hit.primary_term {
                entry.insert("_primary_term".to_string(), serde_json::json!(primary_term));
            }
            if let Some(source) = &hit.source {
                entry.insert("_source".to_string(), source.clone());
            }
            if !hit.fields.is_empty() {
                entry.insert(
                    "fields".to_string(),
                    serde_json::Value::Object(hit.fields.clone()),
                );
            }
            if !hit.matched_queries.is_empty() {
                entry.insert(
                    "matched_queries".to_string(),
                    serde_json::json!(hit.matched_queries),
                );
            }
            serde_json::Value::Object(entry)
        })
        .collect();

    serde_json::json!({
        "took": took.as_millis().min(u128::from(u64::MAX)) as u64,
        "timed_out": false,
        "hits": {
            "total": {"value": total, "relation": "eq"},
            "max_score": hits.first().and_then(|h| h.score),
            "hits": rendered,
        }
    })
}
