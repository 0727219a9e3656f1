//! Per-job resolution settings.
//!
//! [`ResolutionConfig`] controls what a job returns and how far it is allowed
//! to traverse. Every field has a serving default, so a request may specify
//! none, some, or all of them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Output and traversal settings for one resolution job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Include each hit's extracted attribute values in the output.
    #[serde(default = "default_true")]
    pub include_attributes: bool,

    /// Include stack traces in reported errors.
    #[serde(default = "default_true")]
    pub include_error_trace: bool,

    /// Include per-hit match explanations. Forces query logging.
    #[serde(default)]
    pub include_explanation: bool,

    /// Include the hits array in the output.
    #[serde(default = "default_true")]
    pub include_hits: bool,

    /// Include the query log in the output.
    #[serde(default)]
    pub include_queries: bool,

    /// Include per-hit composite confidence scores.
    #[serde(default)]
    pub include_score: bool,

    /// Include sequence number and primary term metadata on hits.
    #[serde(default)]
    pub include_seq_no_primary_term: bool,

    /// Include each hit's raw document source in the output.
    #[serde(default = "default_true")]
    pub include_source: bool,

    /// Include document version metadata on hits.
    #[serde(default)]
    pub include_version: bool,

    /// Upper bound on documents returned by a single query.
    #[serde(default = "default_max_docs_per_query")]
    pub max_docs_per_query: usize,

    /// Hop ceiling. Negative means unbounded.
    #[serde(default = "default_max_hops")]
    pub max_hops: i32,

    /// Per-query timeout in milliseconds.
    #[serde(default = "default_max_time_per_query_millis")]
    pub max_time_per_query_millis: u64,

    /// Record timing detail for every query. Forces query logging.
    #[serde(default)]
    pub profile: bool,

    /// Backend passthrough knobs applied to every query.
    #[serde(default, skip_serializing_if = "SearchTuning::is_default")]
    pub search: SearchTuning,
}

fn default_true() -> bool {
    true
}

fn default_max_docs_per_query() -> usize {
    1000
}

fn default_max_hops() -> i32 {
    100
}

fn default_max_time_per_query_millis() -> u64 {
    10_000
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            include_attributes: true,
            include_error_trace: true,
            include_explanation: false,
            include_hits: true,
            include_queries: false,
            include_score: false,
            include_seq_no_primary_term: false,
            include_source: true,
            include_version: false,
            max_docs_per_query: default_max_docs_per_query(),
            max_hops: default_max_hops(),
            max_time_per_query_millis: default_max_time_per_query_millis(),
            profile: false,
            search: SearchTuning::default(),
        }
    }
}

impl ResolutionConfig {
    /// Per-query timeout as a [`Duration`].
    #[must_use]
    pub const fn max_time_per_query(&self) -> Duration {
        Duration::from_millis(self.max_time_per_query_millis)
    }

    /// True when the hop at index `hop` may run under the hop ceiling.
    #[must_use]
    pub fn allows_hop(&self, hop: u32) -> bool {
        self.max_hops < 0 || hop <= self.max_hops.unsigned_abs()
    }

    /// True when the job must record every query it sends. Explanations are
    /// derived from logged queries, so requesting them implies logging, as
    /// does profiling.
    #[must_use]
    pub const fn logs_queries(&self) -> bool {
        self.include_queries || self.include_explanation || self.profile
    }

    /// True when generated queries carry named match tags. Explanations and
    /// scores both need to know which value clauses fired on each hit.
    #[must_use]
    pub const fn names_queries(&self) -> bool {
        self.include_explanation || self.include_score
    }
}

/// Backend tuning knobs forwarded verbatim with every search.
///
/// All fields are optional; the backend applies its own defaults for any
/// left unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTuning {
    /// Whether a query may succeed with partial results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_partial_results: Option<bool>,

    /// Batch size for shard-level result reduction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batched_reduce_size: Option<u32>,

    /// Ceiling on concurrently queried shards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_shard_requests: Option<u32>,

    /// Shard count threshold for pre-filtering round trips.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_filter_shard_size: Option<u32>,

    /// Shard routing preference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preference: Option<String>,

    /// Whether the backend may serve the query from its request cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_cache: Option<bool>,
}

impl SearchTuning {
    fn is_default(&self) -> bool {
        *self == Self::default()
    }
}
