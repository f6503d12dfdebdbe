//! Aggregation Engine
//!
//! Orchestrates dispatch, merge and cache into the public query contract:
//! [`AggregationEngine::aggregate`] and [`AggregationEngine::aggregate_cached`].

mod engine;

pub use engine::{AggregationEngine, EngineBuilder, MAX_TTL};
