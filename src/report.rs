//! Job output types and their wire shapes.
//!
//! Every exposed shape renders through an explicit `to_json` so the wire
//! format is spelled out in one place and cannot drift with serde attribute
//! changes. What a result carries is decided while the job runs; what it
//! shows is decided here from the config snapshot the result keeps.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::config::ResolutionConfig;
use crate::error::EntwineError;
use crate::query::planner::FilterSummary;
use crate::value::AttributeValue;

/// Which side of the backend seam an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// The search backend failed or refused the query.
    Backend,
    /// The engine itself failed while building or processing.
    Engine,
}

impl ErrorOrigin {
    /// Wire name of the origin.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Engine => "engine",
        }
    }
}

/// One reported error, terminal or logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Where the error came from.
    pub origin: ErrorOrigin,

    /// Stable machine-readable kind, such as `index_missing`.
    pub kind: String,

    /// Human-readable description.
    pub message: String,

    /// Stack trace or backend failure detail, when captured and requested.
    pub trace: Option<String>,
}

impl ErrorReport {
    /// Renders the error for the response body or the query log.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("source".to_string(), json!(self.origin.as_str()));
        out.insert("type".to_string(), json!(self.kind));
        out.insert("message".to_string(), json!(self.message));
        if let Some(trace) = &self.trace {
            out.insert("stack_trace".to_string(), json!(trace));
        }
        Value::Object(out)
    }
}

/// One matched value behind a hit: which input value, through which matcher,
/// hit which field, and what the document holds there.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchDetail {
    /// Attribute the match belongs to.
    pub attribute: String,

    /// Field of the document that matched.
    pub target_field: String,

    /// The document's value at that field. A string for single values, an
    /// array for multi-valued fields, null when the field was absent.
    pub target_value: Value,

    /// Canonical serialization of the input value that matched.
    pub input_value: String,

    /// Matcher that produced the clause.
    pub input_matcher: String,

    /// Request-level params that rode on the input attribute.
    pub input_matcher_params: BTreeMap<String, Value>,

    /// Damped confidence contribution of this match, when the attribute
    /// carries a base score.
    pub score: Option<f64>,
}

impl MatchDetail {
    fn to_json(&self) -> Value {
        json!({
            "attribute": self.attribute,
            "target_field": self.target_field,
            "target_value": self.target_value,
            "input_value": self.input_value,
            "input_matcher": self.input_matcher,
            "input_matcher_params": self.input_matcher_params,
            "score": self.score,
        })
    }
}

/// Why a hit is believed to be the same entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Explanation {
    /// Resolvers whose every attribute matched on this hit, with their
    /// declared attribute lists.
    pub resolvers: BTreeMap<String, Vec<String>>,

    /// The individual value matches.
    pub matches: Vec<MatchDetail>,
}

impl Explanation {
    /// Renders the explanation for a hit.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut resolvers = Map::new();
        for (name, attributes) in &self.resolvers {
            resolvers.insert(name.clone(), json!({ "attributes": attributes }));
        }
        json!({
            "resolvers": resolvers,
            "matches": self.matches.iter().map(MatchDetail::to_json).collect::<Vec<_>>(),
        })
    }
}

/// One discovered document.
#[derive(Debug, Clone, Default)]
pub struct ResolutionHit {
    /// Collection the document lives in.
    pub collection: String,

    /// Document id.
    pub id: String,

    /// Hop on which the document was first seen.
    pub hop: u32,

    /// Job-wide sequence number of the query that returned it.
    pub query: u64,

    /// Composite confidence score, when scoring was requested and any
    /// scored attribute matched.
    pub score: Option<f64>,

    /// Attribute values extracted from this document.
    pub attributes: BTreeMap<String, Vec<AttributeValue>>,

    /// Match explanation, when requested.
    pub explanation: Option<Explanation>,

    /// Raw document source, when requested.
    pub source: Option<Value>,

    /// Document version, when the backend reported one.
    pub version: Option<i64>,

    /// Sequence number, when the backend reported one.
    pub seq_no: Option<i64>,

    /// Primary term, when the backend reported one.
    pub primary_term: Option<i64>,
}

impl ResolutionHit {
    /// Renders the hit under the job's output flags.
    #[must_use]
    pub fn to_json(&self, config: &ResolutionConfig) -> Value {
        let mut out = Map::new();
        out.insert("_index".to_string(), json!(self.collection));
        out.insert("_id".to_string(), json!(self.id));
        out.insert("_hop".to_string(), json!(self.hop));
        out.insert("_query".to_string(), json!(self.query));
        if config.include_version {
            if let Some(version) = self.version {
                out.insert("_version".to_string(), json!(version));
            }
        }
        if config.include_seq_no_primary_term {
            if let Some(seq_no) = self.seq_no {
                out.insert("_seq_no".to_string(), json!(seq_no));
            }
            if let Some(primary_term) = self.primary_term {
                out.insert("_primary_term".to_string(), json!(primary_term));
            }
        }
        if config.include_score {
            out.insert("_score".to_string(), json!(self.score));
        }
        if config.include_attributes {
            let mut attributes = Map::new();
            for (name, values) in &self.attributes {
                attributes.insert(
                    name.clone(),
                    Value::Array(values.iter().map(AttributeValue::to_json).collect()),
                );
            }
            out.insert("_attributes".to_string(), Value::Object(attributes));
        }
        if config.include_explanation {
            out.insert(
                "_explanation".to_string(),
                self.explanation
                    .as_ref()
                    .map_or(Value::Null, Explanation::to_json),
            );
        }
        if config.include_source {
            out.insert(
                "_source".to_string(),
                self.source.clone().unwrap_or(Value::Null),
            );
        }
        Value::Object(out)
    }
}

/// One query the job sent, with what came back.
#[derive(Debug, Clone)]
pub struct QueryLogEntry {
    /// Collection the query targeted.
    pub collection: String,

    /// Hop the query belonged to.
    pub hop: u32,

    /// Job-wide sequence number of the query.
    pub query: u64,

    /// The search body as sent.
    pub request: Value,

    /// The backend's raw response, when the query succeeded.
    pub response: Option<Value>,

    /// The failure recorded for this query, when it did not.
    pub error: Option<ErrorReport>,

    /// What the query was built from.
    pub filters: FilterSummary,
}

impl QueryLogEntry {
    /// Renders the entry for the query log.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("collection".to_string(), json!(self.collection));
        out.insert("hop".to_string(), json!(self.hop));
        out.insert("query".to_string(), json!(self.query));
        out.insert("request".to_string(), self.request.clone());
        if let Some(response) = &self.response {
            out.insert("response".to_string(), response.clone());
        }
        if let Some(error) = &self.error {
            out.insert("error".to_string(), error.to_json());
        }
        out.insert("filters".to_string(), self.filters.to_json());
        Value::Object(out)
    }
}

/// Everything a finished job reports.
///
/// The job populates only what its config asked for; rendering reads the
/// same config snapshot, so a field the caller opted out of never appears
/// on the wire.
#[derive(Debug, Clone)]
pub struct ResolutionResult {
    /// Correlation id for logging. Not part of the wire shape.
    pub request_id: String,

    /// Wall-clock duration of the whole job.
    pub took: Duration,

    /// Discovered documents, in discovery order.
    pub hits: Vec<ResolutionHit>,

    /// The query log, when the job recorded one.
    pub queries: Vec<QueryLogEntry>,

    /// Terminal error, if the job aborted. Collections flagged missing do
    /// not set this.
    pub error: Option<ErrorReport>,

    /// The config the job ran under.
    pub config: ResolutionConfig,
}

impl ResolutionResult {
    /// True when the job ran to completion without a terminal error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Renders the response body.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        #[allow(clippy::cast_possible_truncation)]
        out.insert(
            "took".to_string(),
            json!(self.took.as_millis().min(u128::from(u64::MAX)) as u64),
        );
        if self.config.include_hits {
            let hits: Vec<Value> = self
                .hits
                .iter()
                .map(|hit| hit.to_json(&self.config))
                .collect();
            out.insert(
                "hits".to_string(),
                json!({"total": hits.len(), "hits": hits}),
            );
        }
        if self.config.include_queries || self.config.profile {
            out.insert(
                "queries".to_string(),
                Value::Array(self.queries.iter().map(QueryLogEntry::to_json).collect()),
            );
        }
        if let Some(error) = &self.error {
            out.insert("error".to_string(), error.to_json());
        }
        Value::Object(out)
    }

    /// Renders the response body as pretty JSON text.
    pub fn to_json_pretty(&self) -> Result<String, EntwineError> {
        serde_json::to_string_pretty(&self.to_json())
            .map_err(|e| EntwineError::internal(format!("serialize resolution result: {e}")))
    }
}
