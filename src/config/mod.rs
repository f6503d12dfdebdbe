//! Configuration system
//!
//! Loads ~/.config/ctxmesh/config.yaml with support for:
//! - Module address overrides
//! - Default module set, per-call deadline and retry policy
//! - Cache backend and TTL
//! - HTTP server bind address

mod mesh_config;
pub mod validation;

pub use mesh_config::{CacheBackend, CacheSettings, MeshConfig, ModuleAddress, ServerSettings};
pub use validation::{validate_config, validate_config_result, ValidationError};
