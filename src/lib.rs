//! Taskpulse - Analytics and scoring engine for personal activity tracking
//!
//! Taskpulse turns raw activity-instance records into behavioral metrics
//! through a deterministic pipeline: record normalization → baseline
//! computation → metric formulas → composite aggregation, with ranking and
//! cached invalidation layered on top.
//!
//! ## Modules
//!
//! - **Normalizer**: Parse raw instance records into typed, deduplicated rows
//! - **Baseline**: Trailing-window aggregates with a minimum-sample floor
//! - **Formulas**: Pure metric formulas (productivity, grit, relief/effort,
//!   aversion, execution, spike)
//! - **Composite**: Weighted aggregation of metrics into summary scores
//! - **Ranker**: Deterministic recommendation ordering
//! - **Engine**: Facade tying the pipeline to a record source and cache

pub mod baseline;
pub mod cache;
pub mod composite;
pub mod engine;
pub mod error;
pub mod formulas;
pub mod normalizer;
pub mod ranker;
pub mod schema;
pub mod types;

pub use engine::{InMemorySource, InstanceSource, ScoreEngine, DEFAULT_COMPOSITE_SCORE};
pub use error::EngineError;

// Schema exports
pub use schema::{RawRecord, SCHEMA_VERSION};

// Pipeline exports
pub use baseline::{BaselineCalculator, NEUTRAL_SCORE};
pub use cache::{Clock, EngineCache, ManualClock, SystemClock};
pub use normalizer::RecordNormalizer;
pub use ranker::{CandidateFilter, RankedCandidate};
pub use types::{
    ActivityInstance, Baseline, BaselineMetric, BaselineStat, BaselineValue, Metric,
    NormalizedTable, ScoreResult, Scope, WeightVector,
};

/// Engine version embedded in score results
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for exported payloads
pub const PRODUCER_NAME: &str = "taskpulse";
