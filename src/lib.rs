//! ctxmesh - Multi-module context aggregation
//!
//! ctxmesh sits in front of a fixed set of business modules (finbot, mubot,
//! dese, observability). A single query fans out to the modules concurrently,
//! their answers are merged with one of three strategies, and the result can
//! be cached under a canonical key.
//!
//! # Architecture
//!
//! - **context**: Request, per-module context and aggregated result types
//! - **client**: One exchange with one module (HTTP)
//! - **dispatch**: Concurrent fan-out with per-call deadlines
//! - **merge**: Merge, priority and latest strategies
//! - **cache**: Canonical keys and TTL stores (memory, SQLite)
//! - **aggregator**: The engine tying the above together
//! - **selector**: Best single view of an aggregated result
//! - **server**: HTTP API (axum)
//! - **config**: YAML configuration

// Core modules
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod merge;
pub mod metrics;

// Components
pub mod aggregator;
pub mod cache;
pub mod client;
pub mod dispatch;
pub mod selector;
pub mod server;

// Re-exports
pub use aggregator::{AggregationEngine, EngineBuilder};
pub use context::{AggregatedResult, AggregationRequest, ModuleContext};
pub use ctxmesh_registry::{ModuleId, ModulePriority, ModuleRegistry};
pub use error::{MeshError, Result};
pub use merge::MergeStrategy;
pub use selector::{select_by_priority, Selection};
