//! Read-through/write-through gateway over a cache store

use super::CacheStore;
use crate::context::{AggregatedResult, AggregationRequest, Payload};
use crate::merge::MergeStrategy;
use crate::{metrics, Result};
use ctxmesh_registry::ModuleId;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Prefix of every aggregation cache key
pub const CACHE_KEY_PREFIX: &str = "ctxmesh:aggregated:";

/// Normalized request used for the cache key
///
/// Field order here is the serialization order.
#[derive(Serialize)]
struct CanonicalRequest {
    query: Value,
    modules: Vec<ModuleId>,
    strategy: MergeStrategy,
    filter_context: Value,
}

/// Cache key for a request
///
/// Structurally identical requests share a key: module order and duplicates
/// are ignored, an absent module list equals the default set, the priority
/// override only adds its module to the set, and object keys in `query` and
/// `filterContext` are sorted recursively.
pub fn cache_key(request: &AggregationRequest, default_modules: &[ModuleId]) -> Result<String> {
    let mut modules = request.resolve_targets(default_modules);
    modules.sort();
    modules.dedup();

    let canonical = CanonicalRequest {
        query: canonicalize(&request.query),
        modules,
        strategy: request.merge_strategy,
        filter_context: request
            .filter_context
            .as_ref()
            .map(|context| canonicalize(&Value::Object(context.clone())))
            .unwrap_or_else(|| Value::Object(Payload::new())),
    };

    Ok(format!(
        "{}{}",
        CACHE_KEY_PREFIX,
        serde_json::to_string(&canonical)?
    ))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort();
            let mut sorted = Payload::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&object[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Cache policy around a [`CacheStore`]
///
/// Never fails: a broken store reads as a miss and drops writes.
#[derive(Clone)]
pub struct CacheGateway {
    store: Arc<dyn CacheStore>,
}

impl CacheGateway {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Cached result for `key`, if any
    pub async fn read(&self, key: &str) -> Option<AggregatedResult> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                metrics::record_cache_miss();
                tracing::debug!(cache_key = key, "Cache miss");
                return None;
            }
            Err(e) => {
                metrics::record_cache_error();
                tracing::warn!(cache_key = key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(result) => {
                metrics::record_cache_hit();
                tracing::debug!(cache_key = key, "Cache hit");
                Some(result)
            }
            Err(e) => {
                metrics::record_cache_error();
                tracing::warn!(cache_key = key, error = %e, "Discarding unreadable cache entry");
                None
            }
        }
    }

    /// Store `result` under `key` for `ttl`
    pub async fn write(&self, key: &str, result: &AggregatedResult, ttl: Duration) {
        let serialized = match serde_json::to_string(result) {
            Ok(serialized) => serialized,
            Err(e) => {
                metrics::record_cache_error();
                tracing::warn!(cache_key = key, error = %e, "Failed to serialize result for cache");
                return;
            }
        };

        match self.store.set_ex(key, ttl, &serialized).await {
            Ok(()) => {
                metrics::record_cache_write();
                tracing::debug!(cache_key = key, ttl_secs = ttl.as_secs(), "Result cached");
            }
            Err(e) => {
                metrics::record_cache_error();
                tracing::warn!(cache_key = key, error = %e, "Cache write failed, continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::context::ModuleContext;
    use crate::MeshError;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(MeshError::Cache("connection refused".into()))
        }

        async fn set_ex(&self, _key: &str, _ttl: Duration, _value: &str) -> Result<()> {
            Err(MeshError::Cache("connection refused".into()))
        }
    }

    fn sample_result() -> AggregatedResult {
        let payload = json!({"a": 1}).as_object().cloned().unwrap();
        let contexts = vec![ModuleContext::new(ModuleId::Finbot, payload.clone(), "test")];
        AggregatedResult::from_contexts(&contexts, payload, MergeStrategy::Priority, Utc::now())
    }

    #[test]
    fn test_key_ignores_module_order() {
        let a = AggregationRequest::new("q").with_modules([ModuleId::Finbot, ModuleId::Mubot]);
        let b = AggregationRequest::new("q").with_modules([ModuleId::Mubot, ModuleId::Finbot]);
        assert_eq!(
            cache_key(&a, &ModuleId::ALL).unwrap(),
            cache_key(&b, &ModuleId::ALL).unwrap()
        );
    }

    #[test]
    fn test_key_absent_modules_equals_default_set() {
        let implicit = AggregationRequest::new("q");
        let explicit = AggregationRequest::new("q").with_modules(ModuleId::ALL.iter().rev().copied());
        assert_eq!(
            cache_key(&implicit, &ModuleId::ALL).unwrap(),
            cache_key(&explicit, &ModuleId::ALL).unwrap()
        );
    }

    #[test]
    fn test_key_sorts_nested_objects() {
        let mut first = Payload::new();
        first.insert("tenant".into(), json!("acme"));
        first.insert("range".into(), json!({"to": 2, "from": 1}));

        let mut second = Payload::new();
        second.insert("range".into(), json!({"from": 1, "to": 2}));
        second.insert("tenant".into(), json!("acme"));

        let a = AggregationRequest::new("q").with_filter_context(first);
        let b = AggregationRequest::new("q").with_filter_context(second);
        assert_eq!(
            cache_key(&a, &ModuleId::ALL).unwrap(),
            cache_key(&b, &ModuleId::ALL).unwrap()
        );
    }

    #[test]
    fn test_key_distinguishes_strategy_and_query() {
        let base = AggregationRequest::new("q");
        let priority = AggregationRequest::new("q").with_strategy(MergeStrategy::Priority);
        let other = AggregationRequest::new("other");

        let key = cache_key(&base, &ModuleId::ALL).unwrap();
        assert!(key.starts_with(CACHE_KEY_PREFIX));
        assert_ne!(key, cache_key(&priority, &ModuleId::ALL).unwrap());
        assert_ne!(key, cache_key(&other, &ModuleId::ALL).unwrap());
    }

    #[test]
    fn test_key_folds_priority_override_into_set() {
        let a = AggregationRequest::new("q")
            .with_modules([ModuleId::Finbot, ModuleId::Mubot])
            .with_priority_override(ModuleId::Mubot);
        let b = AggregationRequest::new("q").with_modules([ModuleId::Mubot, ModuleId::Finbot]);
        assert_eq!(
            cache_key(&a, &ModuleId::ALL).unwrap(),
            cache_key(&b, &ModuleId::ALL).unwrap()
        );
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let gateway = CacheGateway::new(Arc::new(MemoryStore::new()));
        let result = sample_result();

        assert!(gateway.read("k").await.is_none());
        gateway.write("k", &result, Duration::from_secs(60)).await;
        assert_eq!(gateway.read("k").await, Some(result));
    }

    #[tokio::test]
    async fn test_broken_store_degrades() {
        let gateway = CacheGateway::new(Arc::new(BrokenStore));

        gateway
            .write("k", &sample_result(), Duration::from_secs(60))
            .await;
        assert!(gateway.read("k").await.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_ex("k", Duration::from_secs(60), "not json")
            .await
            .unwrap();

        let gateway = CacheGateway::new(store);
        assert!(gateway.read("k").await.is_none());
    }
}
