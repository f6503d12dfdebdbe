//! Data model for context aggregation
//!
//! Requests, per-module answers and the aggregated result. Module payloads
//! are opaque JSON objects; the engine never looks inside them.

use crate::merge::MergeStrategy;
use crate::{MeshError, Result};
use chrono::{DateTime, Utc};
use ctxmesh_registry::{ModuleId, ModulePriority};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Opaque module payload
pub type Payload = Map<String, Value>;

/// One aggregation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationRequest {
    /// Free text or structured query, forwarded verbatim to every module
    pub query: Value,

    /// Explicit subset of modules to query (default: engine's default set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_modules: Option<Vec<ModuleId>>,

    /// Module to front-load ahead of the default ordering
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_priority_override"
    )]
    pub priority_override: Option<ModuleId>,

    /// How per-module answers are combined
    #[serde(default)]
    pub merge_strategy: MergeStrategy,

    /// Forwarded to modules, ignored by the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_context: Option<Payload>,
}

/// "auto" means no override
fn deserialize_priority_override<'de, D>(deserializer: D) -> std::result::Result<Option<ModuleId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("auto") => Ok(None),
        Some(name) => name.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

impl AggregationRequest {
    /// Request querying the default module set with the `merge` strategy
    pub fn new(query: impl Into<Value>) -> Self {
        Self {
            query: query.into(),
            target_modules: None,
            priority_override: None,
            merge_strategy: MergeStrategy::default(),
            filter_context: None,
        }
    }

    /// Restrict the request to an explicit module set
    pub fn with_modules(mut self, modules: impl IntoIterator<Item = ModuleId>) -> Self {
        self.target_modules = Some(modules.into_iter().collect());
        self
    }

    /// Restrict the request to modules given by name
    ///
    /// Unknown names are rejected here, before anything is dispatched.
    pub fn with_module_names<I, S>(self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let modules = ctxmesh_registry::parse_modules(names)?;
        Ok(self.with_modules(modules))
    }

    /// Front-load one module
    pub fn with_priority_override(mut self, module: ModuleId) -> Self {
        self.priority_override = Some(module);
        self
    }

    /// Select the merge strategy
    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = strategy;
        self
    }

    /// Attach an opaque filter context
    pub fn with_filter_context(mut self, context: Payload) -> Self {
        self.filter_context = Some(context);
        self
    }

    /// Reject requests that must not reach the network
    pub fn validate(&self) -> Result<()> {
        if let Some(targets) = &self.target_modules {
            if targets.is_empty() {
                return Err(MeshError::InvalidRequest(
                    "targetModules must not be empty when present".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Modules to dispatch to, in dispatch order
    ///
    /// Explicit targets (or `defaults`) deduplicated in first-seen order, with
    /// the priority override moved (or added) to the front.
    pub fn resolve_targets(&self, defaults: &[ModuleId]) -> Vec<ModuleId> {
        let base = self.target_modules.as_deref().unwrap_or(defaults);

        let mut resolved = Vec::with_capacity(base.len() + 1);
        if let Some(preferred) = self.priority_override {
            resolved.push(preferred);
        }
        for module in base {
            if !resolved.contains(module) {
                resolved.push(*module);
            }
        }

        resolved
    }

    /// Body sent to each module endpoint
    pub fn module_query(&self) -> ModuleQuery {
        ModuleQuery {
            query: self.query.clone(),
            context: self.filter_context.clone().unwrap_or_default(),
        }
    }
}

/// Wire body of a module query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleQuery {
    pub query: Value,
    #[serde(default)]
    pub context: Payload,
}

/// Successful answer from one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleContext {
    pub module: ModuleId,
    pub payload: Payload,
    pub priority: ModulePriority,
    pub observed_at: DateTime<Utc>,
    /// Endpoint that produced the answer, for diagnostics
    pub source: String,
}

impl ModuleContext {
    /// Context observed now, with the module's registered priority
    pub fn new(module: ModuleId, payload: Payload, source: impl Into<String>) -> Self {
        Self {
            module,
            payload,
            priority: module.priority(),
            observed_at: Utc::now(),
            source: source.into(),
        }
    }

    /// Override the observation time
    pub fn observed(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }
}

/// One module's value for one key under the `merge` strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub module: ModuleId,
    pub value: Value,
    pub priority: ModulePriority,
    pub observed_at: DateTime<Utc>,
}

impl Contribution {
    /// JSON object form stored in `merged`
    pub fn into_value(self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Parse a contribution back out of `merged`
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Bookkeeping attached to every aggregated result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub module_count: usize,
    pub produced_at: DateTime<Utc>,
    pub strategy: MergeStrategy,
    /// Present only on a freshly computed result from the cached path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
}

/// The engine's answer
///
/// `responding_modules`, `priorities` and `observed_at` always cover the same
/// modules. With no responding module, `merged` is an empty object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResult {
    /// Modules that answered, in arrival order
    pub responding_modules: Vec<ModuleId>,
    pub merged: Payload,
    pub priorities: BTreeMap<ModuleId, ModulePriority>,
    pub observed_at: BTreeMap<ModuleId, DateTime<Utc>>,
    pub metadata: ResultMetadata,
}

impl AggregatedResult {
    /// Build a result from the settled module answers
    pub fn from_contexts(
        contexts: &[ModuleContext],
        merged: Payload,
        strategy: MergeStrategy,
        produced_at: DateTime<Utc>,
    ) -> Self {
        let responding_modules: Vec<ModuleId> = contexts.iter().map(|c| c.module).collect();
        let priorities = contexts.iter().map(|c| (c.module, c.priority)).collect();
        let observed_at = contexts.iter().map(|c| (c.module, c.observed_at)).collect();

        Self {
            metadata: ResultMetadata {
                module_count: responding_modules.len(),
                produced_at,
                strategy,
                cache_key: None,
            },
            responding_modules,
            merged: if contexts.is_empty() { Payload::new() } else { merged },
            priorities,
            observed_at,
        }
    }

    /// Whether every targeted module failed
    pub fn is_degraded(&self) -> bool {
        self.responding_modules.is_empty()
    }
}
