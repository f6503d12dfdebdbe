//! Fan-out dispatcher implementation

use super::retry::{with_retry, RetryPolicy};
use crate::client::{ModuleClient, ModuleError};
use crate::context::{ModuleContext, ModuleQuery};
use crate::metrics;
use chrono::{DateTime, Utc};
use ctxmesh_registry::{ModuleId, ModuleRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::timeout;

/// Default deadline for a single module call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Concurrent fan-out over module clients
///
/// Each call runs on its own task under a deadline. `dispatch` returns only
/// after every call has settled.
#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<dyn ModuleClient>,
    registry: Arc<ModuleRegistry>,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl Dispatcher {
    /// Create a dispatcher with the default deadline and no retries
    pub fn new(client: Arc<dyn ModuleClient>, registry: Arc<ModuleRegistry>) -> Self {
        Self {
            client,
            registry,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            retry: RetryPolicy::none(),
        }
    }

    /// Bound every module call by `deadline`
    pub fn with_call_timeout(mut self, deadline: Duration) -> Self {
        self.call_timeout = deadline;
        self
    }

    /// Retry transient failures within the deadline
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Per-call deadline
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Query every target concurrently and collect the successes
    ///
    /// Failures are logged and dropped. The result is in settle order, not
    /// request order. `issued_at` is the request's issue time: no returned
    /// context is observed before it.
    pub async fn dispatch(
        &self,
        targets: &[ModuleId],
        query: &ModuleQuery,
        issued_at: DateTime<Utc>,
    ) -> Vec<ModuleContext> {
        let dispatched_at = Instant::now();
        let mut calls = JoinSet::new();
        let mut task_modules = HashMap::with_capacity(targets.len());

        for &module in targets {
            let client = Arc::clone(&self.client);
            let endpoint = self.registry.endpoint(module).clone();
            let query = query.clone();
            let deadline = self.call_timeout;
            let retry = self.retry.clone();

            let handle = calls.spawn(async move {
                let started = Instant::now();
                let attempt = with_retry(&retry, module.as_str(), || {
                    client.query(&endpoint, &query)
                });
                let outcome = match timeout(deadline, attempt).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ModuleError::DeadlineExceeded(deadline)),
                };
                (module, started.elapsed(), outcome)
            });
            task_modules.insert(handle.id(), module);
        }

        let mut contexts = Vec::with_capacity(targets.len());

        while let Some(settled) = calls.join_next_with_id().await {
            match settled {
                Ok((_, (module, elapsed, Ok(mut context)))) => {
                    if context.observed_at < issued_at {
                        context.observed_at = issued_at;
                    }
                    metrics::record_module_call(module.as_str(), "ok", elapsed.as_secs_f64());
                    tracing::debug!(
                        module = %module,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Module answered"
                    );
                    contexts.push(context);
                }
                Ok((_, (module, elapsed, Err(e)))) => {
                    metrics::record_module_call(module.as_str(), e.kind(), elapsed.as_secs_f64());
                    tracing::warn!(
                        module = %module,
                        error = %e,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Module excluded from aggregation"
                    );
                }
                Err(e) => {
                    let elapsed = dispatched_at.elapsed();
                    match task_modules.get(&e.id()) {
                        Some(module) => {
                            metrics::record_module_call(
                                module.as_str(),
                                "panic",
                                elapsed.as_secs_f64(),
                            );
                            tracing::error!(
                                module = %module,
                                error = %e,
                                "Module call task failed"
                            );
                        }
                        None => tracing::error!(error = %e, "Module call task failed"),
                    }
                }
            }
        }

        contexts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Payload;
    use async_trait::async_trait;
    use ctxmesh_registry::ModuleEndpoint;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Answer(Value, Duration),
        Fail,
        Hang,
        Panic,
    }

    struct ScriptedClient {
        script: HashMap<ModuleId, Behaviour>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(script: Vec<(ModuleId, Behaviour)>) -> Self {
            Self {
                script: script.into_iter().collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModuleClient for ScriptedClient {
        async fn query(
            &self,
            endpoint: &ModuleEndpoint,
            _request: &ModuleQuery,
        ) -> Result<ModuleContext, ModuleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.get(&endpoint.id) {
                Some(Behaviour::Answer(data, delay)) => {
                    tokio::time::sleep(*delay).await;
                    let payload: Payload = data.as_object().cloned().unwrap_or_default();
                    Ok(ModuleContext::new(endpoint.id, payload, "scripted"))
                }
                Some(Behaviour::Hang) => std::future::pending().await,
                Some(Behaviour::Panic) => panic!("module client bug"),
                Some(Behaviour::Fail) | None => Err(ModuleError::Status(500)),
            }
        }
    }

    fn dispatcher(client: ScriptedClient) -> (Dispatcher, Arc<ScriptedClient>) {
        let client = Arc::new(client);
        let dispatcher = Dispatcher::new(client.clone(), Arc::new(ModuleRegistry::new()))
            .with_call_timeout(Duration::from_millis(200));
        (dispatcher, client)
    }

    fn query() -> ModuleQuery {
        ModuleQuery {
            query: json!("q"),
            context: Payload::new(),
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let (dispatcher, client) = dispatcher(ScriptedClient::new(vec![
            (ModuleId::Finbot, Behaviour::Answer(json!({"a": 1}), Duration::ZERO)),
            (ModuleId::Mubot, Behaviour::Fail),
            (ModuleId::Dese, Behaviour::Answer(json!({"b": 2}), Duration::ZERO)),
        ]));

        let contexts = dispatcher
            .dispatch(
                &[ModuleId::Finbot, ModuleId::Mubot, ModuleId::Dese],
                &query(),
                Utc::now(),
            )
            .await;

        let mut modules: Vec<_> = contexts.iter().map(|c| c.module).collect();
        modules.sort();
        assert_eq!(modules, vec![ModuleId::Finbot, ModuleId::Dese]);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_hung_module_hits_deadline() {
        let (dispatcher, _) = dispatcher(ScriptedClient::new(vec![
            (ModuleId::Finbot, Behaviour::Hang),
            (ModuleId::Mubot, Behaviour::Answer(json!({"a": 2}), Duration::ZERO)),
        ]));

        let started = Instant::now();
        let contexts = dispatcher
            .dispatch(&[ModuleId::Finbot, ModuleId::Mubot], &query(), Utc::now())
            .await;

        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].module, ModuleId::Mubot);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_panicking_module_is_dropped() {
        let (dispatcher, _) = dispatcher(ScriptedClient::new(vec![
            (ModuleId::Dese, Behaviour::Panic),
            (ModuleId::Observability, Behaviour::Answer(json!({"up": true}), Duration::ZERO)),
        ]));

        let contexts = dispatcher
            .dispatch(&[ModuleId::Dese, ModuleId::Observability], &query(), Utc::now())
            .await;

        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].module, ModuleId::Observability);

        let panics = metrics::MODULE_CALLS
            .with_label_values(&["dese", "panic"])
            .get();
        assert!(panics >= 1.0);
    }

    #[tokio::test]
    async fn test_waits_for_slow_modules_and_orders_by_arrival() {
        let (dispatcher, _) = dispatcher(ScriptedClient::new(vec![
            (
                ModuleId::Finbot,
                Behaviour::Answer(json!({"a": 1}), Duration::from_millis(80)),
            ),
            (ModuleId::Mubot, Behaviour::Answer(json!({"a": 2}), Duration::ZERO)),
        ]));

        let contexts = dispatcher
            .dispatch(&[ModuleId::Finbot, ModuleId::Mubot], &query(), Utc::now())
            .await;

        let modules: Vec<_> = contexts.iter().map(|c| c.module).collect();
        assert_eq!(modules, vec![ModuleId::Mubot, ModuleId::Finbot]);
    }

    #[tokio::test]
    async fn test_observed_at_not_before_issue_time() {
        let (dispatcher, _) = dispatcher(ScriptedClient::new(vec![(
            ModuleId::Finbot,
            Behaviour::Answer(json!({"a": 1}), Duration::ZERO),
        )]));

        let issued_at = Utc::now() + chrono::Duration::seconds(30);
        let contexts = dispatcher
            .dispatch(&[ModuleId::Finbot], &query(), issued_at)
            .await;

        assert_eq!(contexts[0].observed_at, issued_at);
    }

    #[tokio::test]
    async fn test_all_failed_yields_empty() {
        let (dispatcher, _) = dispatcher(ScriptedClient::new(vec![]));

        let contexts = dispatcher
            .dispatch(&ModuleId::ALL, &query(), Utc::now())
            .await;

        assert!(contexts.is_empty());
    }
}
