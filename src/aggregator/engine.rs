//! Aggregation engine implementation

use crate::cache::{cache_key, CacheGateway, CacheStore, MemoryStore, SqliteStore, SqliteStoreConfig};
use crate::client::{HttpModuleClient, ModuleClient};
use crate::config::{validate_config_result, CacheBackend, MeshConfig};
use crate::context::{AggregatedResult, AggregationRequest};
use crate::dispatch::{Dispatcher, RetryPolicy, DEFAULT_CALL_TIMEOUT};
use crate::merge::merge_contexts;
use crate::{metrics, MeshError, Result};
use chrono::Utc;
use ctxmesh_registry::{ModuleId, ModuleRegistry};
use std::sync::Arc;
use std::time::Duration;

/// Default time-to-live for cached results
const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Longest TTL a caller may ask for
pub const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Multi-module context aggregation engine
///
/// Holds the module registry, the dispatcher and an optional cache. Built
/// once and shared by reference; it has no other mutable state.
pub struct AggregationEngine {
    registry: Arc<ModuleRegistry>,
    dispatcher: Dispatcher,
    cache: Option<CacheGateway>,
    default_modules: Vec<ModuleId>,
    default_ttl: Duration,
}

impl AggregationEngine {
    /// Start building an engine
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Build an engine from configuration, talking HTTP to the modules
    pub fn from_config(config: &MeshConfig) -> Result<Self> {
        validate_config_result(config)?;

        let mut client = HttpModuleClient::new();
        if let Some(token) = &config.auth_token {
            client = client.with_auth_token(token.clone());
        }

        let mut builder = Self::builder()
            .client(Arc::new(client))
            .registry(config.registry())
            .default_modules(config.default_modules.clone())
            .call_timeout(config.call_timeout())
            .retry(config.retry.clone())
            .default_ttl(config.cache.ttl());

        builder = match config.cache.backend {
            CacheBackend::Memory => builder.cache_store(Arc::new(MemoryStore::new())),
            CacheBackend::Sqlite => {
                let path = config.cache.path.clone().ok_or_else(|| {
                    MeshError::Config("cache.path is required for the sqlite backend".to_string())
                })?;
                let store = SqliteStore::new(SqliteStoreConfig {
                    path,
                    wal_mode: true,
                })?;
                builder.cache_store(Arc::new(store))
            }
            CacheBackend::Disabled => builder,
        };

        builder.build()
    }

    /// Query the targeted modules and merge their answers
    ///
    /// Fails only if the request is rejected. If every module fails, the
    /// result is well-formed with no responding modules and an empty `merged`.
    pub async fn aggregate(&self, request: &AggregationRequest) -> Result<AggregatedResult> {
        request.validate()?;

        let issued_at = Utc::now();
        let targets = request.resolve_targets(&self.default_modules);

        tracing::info!(
            query = %request.query,
            modules = ?targets,
            strategy = %request.merge_strategy,
            priority_override = ?request.priority_override,
            "Aggregating context from modules"
        );

        let contexts = self
            .dispatcher
            .dispatch(&targets, &request.module_query(), issued_at)
            .await;

        if contexts.is_empty() {
            tracing::warn!(modules = ?targets, "No module answered");
        }

        let merged = merge_contexts(&contexts, request.merge_strategy);
        let result =
            AggregatedResult::from_contexts(&contexts, merged, request.merge_strategy, Utc::now());

        metrics::record_aggregation(
            &request.merge_strategy.to_string(),
            result.metadata.module_count,
        );

        tracing::info!(
            modules = ?result.responding_modules,
            module_count = result.metadata.module_count,
            strategy = %request.merge_strategy,
            "Context aggregation completed"
        );

        Ok(result)
    }

    /// [`aggregate`](Self::aggregate) behind the cache
    ///
    /// A hit returns the stored result unchanged. A miss computes, writes
    /// through with `ttl`, and returns the fresh result with
    /// `metadata.cache_key` set; the stored copy carries no key, so callers
    /// can tell a computed answer from a cached one. Cache trouble never
    /// fails the call.
    pub async fn aggregate_cached(
        &self,
        request: &AggregationRequest,
        ttl: Duration,
    ) -> Result<AggregatedResult> {
        request.validate()?;
        if ttl > MAX_TTL {
            return Err(MeshError::InvalidRequest(format!(
                "ttl of {}s exceeds the maximum of {}s",
                ttl.as_secs(),
                MAX_TTL.as_secs()
            )));
        }

        let Some(cache) = &self.cache else {
            tracing::debug!("Cache disabled, aggregating directly");
            return self.aggregate(request).await;
        };

        let key = match cache_key(request, &self.default_modules) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build cache key, bypassing cache");
                return self.aggregate(request).await;
            }
        };

        if let Some(cached) = cache.read(&key).await {
            tracing::debug!(query = %request.query, "Aggregated context served from cache");
            return Ok(cached);
        }

        let mut result = self.aggregate(request).await?;
        cache.write(&key, &result, ttl).await;
        result.metadata.cache_key = Some(key);

        Ok(result)
    }

    /// Cache key the engine would use for `request`
    pub fn cache_key(&self, request: &AggregationRequest) -> Result<String> {
        cache_key(request, &self.default_modules)
    }

    /// Module registry
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Modules queried when a request names none
    pub fn default_modules(&self) -> &[ModuleId] {
        &self.default_modules
    }

    /// TTL used when the caller does not pick one
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Whether a cache store is attached
    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }
}

/// Builder for [`AggregationEngine`]
#[derive(Default)]
pub struct EngineBuilder {
    client: Option<Arc<dyn ModuleClient>>,
    registry: Option<ModuleRegistry>,
    cache_store: Option<Arc<dyn CacheStore>>,
    default_modules: Option<Vec<ModuleId>>,
    call_timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    default_ttl: Option<Duration>,
}

impl EngineBuilder {
    /// Module client (default: [`HttpModuleClient`])
    pub fn client(mut self, client: Arc<dyn ModuleClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Module registry (default: built-in addresses)
    pub fn registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Cache store (default: none, the cached path recomputes)
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Modules queried when a request names none (default: all)
    pub fn default_modules(mut self, modules: Vec<ModuleId>) -> Self {
        self.default_modules = Some(modules);
        self
    }

    /// Deadline for each module call
    pub fn call_timeout(mut self, deadline: Duration) -> Self {
        self.call_timeout = Some(deadline);
        self
    }

    /// Retry policy for module calls (default: none)
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// TTL used when the caller does not pick one
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<AggregationEngine> {
        let default_modules = self
            .default_modules
            .unwrap_or_else(|| ModuleId::ALL.to_vec());
        if default_modules.is_empty() {
            return Err(MeshError::Config(
                "At least one default module is required".to_string(),
            ));
        }

        let call_timeout = self.call_timeout.unwrap_or(DEFAULT_CALL_TIMEOUT);
        if call_timeout.is_zero() {
            return Err(MeshError::Config(
                "Module call timeout must be greater than 0".to_string(),
            ));
        }

        let default_ttl = self.default_ttl.unwrap_or(DEFAULT_TTL);
        if default_ttl > MAX_TTL {
            return Err(MeshError::Config(format!(
                "Default TTL must not exceed {}s",
                MAX_TTL.as_secs()
            )));
        }

        let registry = Arc::new(self.registry.unwrap_or_default());
        let client = self
            .client
            .unwrap_or_else(|| Arc::new(HttpModuleClient::new()));

        let dispatcher = Dispatcher::new(client, Arc::clone(&registry))
            .with_call_timeout(call_timeout)
            .with_retry(self.retry.unwrap_or_default());

        Ok(AggregationEngine {
            registry,
            dispatcher,
            cache: self.cache_store.map(CacheGateway::new),
            default_modules,
            default_ttl,
        })
    }
}
