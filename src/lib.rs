//! # Entwine - Multi-Hop Identity Resolution
//!
//! Entwine finds the many documents that describe one real-world entity.
//! A declarative entity model maps the attributes of an identity onto the
//! fields of one or more document collections; a resolution job starts from
//! whatever is known about the entity and alternates between searching and
//! learning. Each hop queries every collection for documents matching the
//! known attribute values, extracts fresh values from whatever comes back,
//! and queries again until nothing new turns up.
//!
//! ## Core Concepts
//!
//! - **Attribute**: One typed property of the modeled identity
//! - **Matcher**: A reusable query clause template instantiated per field and value
//! - **Resolver**: A minimal combination of attributes that identifies an entity on its own
//! - **Hit**: A resolved document, annotated with the hop and query that found it
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entwine::{EntityModel, MemorySearchBackend, ResolutionEngine, ResolutionRequestBuilder};
//! use std::sync::Arc;
//!
//! let model = EntityModel::from_json(model_json)?;
//!
//! let backend = Arc::new(MemorySearchBackend::new());
//! backend.insert("people", "d1", serde_json::json!({"full_name": "alice"}));
//!
//! let request = ResolutionRequestBuilder::new()
//!     .attribute("name", vec![serde_json::json!("alice")])
//!     .build()?;
//!
//! let engine = ResolutionEngine::new(backend);
//! let result = engine.resolve(&model, &request)?;
//! println!("{}", result.to_json_pretty()?);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Model and input types
pub mod attribute;
pub mod config;
pub mod error;
pub mod model;
pub mod request;
pub mod value;

// Query planning and scoring
pub mod query;
pub mod score;

// Execution and output
pub mod engine;
pub mod report;
pub mod search;

// Re-export primary types at crate root for convenience
pub use attribute::Attribute;
pub use config::{ResolutionConfig, SearchTuning};
pub use error::{EntwineError, EntwineResult, ExecutionError, ValidationError};
pub use model::{AttributeDef, EntityModel, FieldDef, IndexDef, MatcherDef, ResolverDef};
pub use request::{InputAttribute, ResolutionRequest, ResolutionRequestBuilder, Scope};
pub use value::{AttributeValue, ValueType};

// Execution re-exports
pub use engine::runtime::{PooledDispatcher, ResolutionHandle, ResolutionRuntime, RuntimeConfig};
pub use engine::{DirectDispatcher, ResolutionEngine, SearchDispatcher};
pub use report::{
    ErrorOrigin, ErrorReport, Explanation, MatchDetail, QueryLogEntry, ResolutionHit,
    ResolutionResult,
};
pub use search::{
    MemorySearchBackend, SearchBackend, SearchFailure, SearchHit, SearchOutcome, SearchRequest,
    SearchResponse,
};
