//! The search backend seam.
//!
//! The engine never talks to a concrete search service. It builds one
//! [`SearchRequest`] per collection per hop and hands it to a
//! [`SearchBackend`], which answers with a three-way [`SearchOutcome`]:
//! documents, a missing-index signal, or a fatal failure. Keeping
//! index-not-found out of the error channel lets a job skip a collection
//! without giving up on the rest.

pub mod memory;

pub use memory::MemorySearchBackend;

use std::time::Duration;

use crate::config::SearchTuning;

/// One query bound for one collection.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Target collection name.
    pub collection: String,

    /// Full search body: the boolean query plus size, source, and field
    /// rendering directives.
    pub body: serde_json::Value,

    /// Per-query timeout.
    pub timeout: Duration,

    /// Backend knobs forwarded verbatim.
    pub tuning: SearchTuning,
}

/// One matched document.
#[derive(Debug, Clone, Default)]
pub struct SearchHit {
    /// Document id, unique within its collection.
    pub id: String,

    /// Backend relevance score, if the backend produced one.
    pub score: Option<f64>,

    /// The raw document, if source was requested.
    pub source: Option<serde_json::Value>,

    /// Rendered field values keyed by document path. Date-typed paths are
    /// rendered in the caller-specified format.
    pub fields: serde_json::Map<String, serde_json::Value>,

    /// Names of the tagged sub-clauses this document matched.
    pub matched_queries: Vec<String>,

    /// Document version, if requested.
    pub version: Option<i64>,

    /// Sequence number, if requested.
    pub seq_no: Option<i64>,

    /// Primary term, if requested.
    pub primary_term: Option<i64>,
}

/// A completed search.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    /// Matched documents, at most the requested size.
    pub hits: Vec<SearchHit>,

    /// Total number of documents matching the query.
    pub total: u64,

    /// How long the backend spent on the query.
    pub took: Duration,

    /// The backend-shaped response body, recorded verbatim in the query log.
    pub raw: serde_json::Value,
}

/// Detail for a search failure that aborts the job.
#[derive(Debug, Clone)]
pub struct SearchFailure {
    /// Collection the failed query targeted.
    pub collection: String,

    /// Failure description.
    pub message: String,

    /// Backend stack trace, when one is available.
    pub trace: Option<String>,
}

/// Three-way outcome of one search.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    /// The query ran; zero hits is still a success.
    Ok(SearchResponse),

    /// The collection's backing index does not exist. The job skips this
    /// collection for all remaining hops and continues.
    IndexMissing,

    /// The query failed. The job aborts, keeping everything accumulated in
    /// completed hops.
    Fatal(SearchFailure),
}

impl SearchOutcome {
    /// True for [`SearchOutcome::Ok`].
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// True for [`SearchOutcome::IndexMissing`].
    #[must_use]
    pub const fn is_index_missing(&self) -> bool {
        matches!(self, Self::IndexMissing)
    }

    /// True for [`SearchOutcome::Fatal`].
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Contract for search backends.
///
/// Implementations must evaluate the boolean query in the request body,
/// honor the `size`, `_source`, and `docvalue_fields` directives, and report
/// which tagged sub-clauses each matched document fired.
pub trait SearchBackend: Send + Sync {
    /// Runs one query against one collection.
    fn search(&self, request: &SearchRequest) -> SearchOutcome;
}

/// Collects leaf values at a dotted path, unrolling arrays at every step.
/// Nulls are dropped. Used both to evaluate queries against stored documents
/// and to extract attribute values from returned sources.
pub(crate) fn values_at_path<'a>(
    document: &'a serde_json::Value,
    path: &str,
) -> Vec<&'a serde_json::Value> {
    let mut current = vec![document];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                serde_json::Value::Object(map) => {
                    if let Some(child) = map.get(segment) {
                        next.push(child);
                    }
                }
                serde_json::Value::Array(items) => {
                    for item in items {
                        if let Some(child) = item.get(segment) {
                            next.push(child);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }

    let mut leaves = Vec::new();
    for value in current {
        flatten_leaves(value, &mut leaves);
    }
    leaves
}

fn flatten_leaves<'a>(value: &'a serde_json::Value, out: &mut Vec<&'a serde_json::Value>) {
    match value {
        serde_json::Value::Null => {}
        serde_json::Value::Array(items) => {
            for item in items {
                flatten_leaves(item, out);
            }
        }
        other => out.push(other),
    }
}
