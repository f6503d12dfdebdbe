//! Configuration validation
//!
//! Validates ctxmesh configuration for correctness:
//! - At most one address override per module
//! - Module URLs are absolute http(s) URLs
//! - Timeouts and TTLs are non-zero, TTLs are bounded
//! - The sqlite cache backend has a path

use super::mesh_config::{CacheBackend, MeshConfig};
use crate::aggregator::MAX_TTL;
use crate::MeshError;
use std::collections::HashSet;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub module: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            module: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref module) = self.module {
            write!(f, "[{}] {}: {}", module, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a ctxmesh configuration, collecting every problem
pub fn validate_config(config: &MeshConfig) -> ValidationResult {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for address in &config.modules {
        if !seen.insert(address.id) {
            errors.push(
                ValidationError::new("modules", "Duplicate address override")
                    .with_module(address.id.as_str()),
            );
        }

        if !is_valid_http_url(&address.url) {
            errors.push(
                ValidationError::new("url", format!("Invalid module URL: {}", address.url))
                    .with_module(address.id.as_str()),
            );
        }
    }

    if config.default_modules.is_empty() {
        errors.push(ValidationError::new(
            "default_modules",
            "At least one default module must be listed",
        ));
    }

    if config.call_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "call_timeout_secs",
            "Module call timeout must be greater than 0",
        ));
    }

    if config.retry.max_retries > 0 && config.retry.initial_backoff_ms == 0 {
        errors.push(ValidationError::new(
            "retry.initial_backoff_ms",
            "Backoff must be greater than 0 when retries are enabled",
        ));
    }

    if config.cache.ttl_secs == 0 {
        errors.push(ValidationError::new(
            "cache.ttl_secs",
            "Cache TTL must be greater than 0",
        ));
    }

    if config.cache.ttl() > MAX_TTL {
        errors.push(ValidationError::new(
            "cache.ttl_secs",
            format!("Cache TTL must not exceed {}s", MAX_TTL.as_secs()),
        ));
    }

    if config.cache.backend == CacheBackend::Sqlite && config.cache.path.is_none() {
        errors.push(ValidationError::new(
            "cache.path",
            "The sqlite cache backend needs a database path",
        ));
    }

    if config.server.bind.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind",
            format!("Invalid bind address: {}", config.server.bind),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate and fold all problems into one configuration error
pub fn validate_config_result(config: &MeshConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        MeshError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}

fn is_valid_http_url(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some(),
        Err(_) => false,
    }
}
