//! Query construction.
//!
//! Everything between "what the job knows" and "the JSON sent to the
//! backend" lives here. [`clause`] instantiates matcher templates,
//! [`grouping`] orders resolvers into weight tiers, [`filter_tree`] collapses
//! a tier's resolvers into a shared-prefix trie and renders it as a boolean
//! clause, [`terms`] coerces free-text terms into typed attribute values,
//! and [`planner`] assembles the final per-collection query for a hop.

pub mod clause;
pub mod filter_tree;
pub mod grouping;
pub mod planner;
pub mod terms;

pub use clause::{ClauseContext, Combiner, MatchTag, TagSequence};
pub use filter_tree::FilterTree;
pub use planner::{FilterSummary, QueryPlan, QueryPlanner};
