//! Merger
//!
//! Combines the successful per-module answers into one payload.
//!
//! - `priority`: payload of the highest-priority module (newest wins ties)
//! - `latest`: payload of the newest answer (higher priority wins ties)
//! - `merge`: every top-level key maps to the list of contributions from
//!   each module that reported it, so no module's view is lost
//!
//! Under `merge`, two modules using one key for unrelated data both end up
//! in that key's list. Payloads have no shared schema to check against.

use crate::context::{Contribution, ModuleContext, Payload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How per-module answers are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Keep every module's value per key
    #[default]
    Merge,
    /// Highest-priority module wins outright
    Priority,
    /// Most recent answer wins outright
    Latest,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::Merge => write!(f, "merge"),
            MergeStrategy::Priority => write!(f, "priority"),
            MergeStrategy::Latest => write!(f, "latest"),
        }
    }
}

impl FromStr for MergeStrategy {
    type Err = crate::MeshError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(MergeStrategy::Merge),
            "priority" => Ok(MergeStrategy::Priority),
            "latest" => Ok(MergeStrategy::Latest),
            other => Err(crate::MeshError::InvalidRequest(format!(
                "Unknown merge strategy '{}'. Must be one of: merge, priority, latest",
                other
            ))),
        }
    }
}

/// Ranking used by the `priority` strategy
pub fn by_priority(a: &ModuleContext, b: &ModuleContext) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.observed_at.cmp(&b.observed_at))
        .then_with(|| b.module.cmp(&a.module))
}

/// Ranking used by the `latest` strategy
pub fn by_recency(a: &ModuleContext, b: &ModuleContext) -> Ordering {
    a.observed_at
        .cmp(&b.observed_at)
        .then_with(|| a.priority.cmp(&b.priority))
        .then_with(|| b.module.cmp(&a.module))
}

/// Merge module answers with the given strategy
///
/// Returns an empty object when `contexts` is empty, whatever the strategy.
pub fn merge_contexts(contexts: &[ModuleContext], strategy: MergeStrategy) -> Payload {
    match strategy {
        MergeStrategy::Priority => winner(contexts, by_priority),
        MergeStrategy::Latest => winner(contexts, by_recency),
        MergeStrategy::Merge => merge_with_provenance(contexts),
    }
}

fn winner<F>(contexts: &[ModuleContext], rank: F) -> Payload
where
    F: Fn(&ModuleContext, &ModuleContext) -> Ordering,
{
    contexts
        .iter()
        .max_by(|a, b| rank(a, b))
        .map(|best| best.payload.clone())
        .unwrap_or_default()
}

fn merge_with_provenance(contexts: &[ModuleContext]) -> Payload {
    let mut by_key: BTreeMap<&str, Vec<Value>> = BTreeMap::new();

    for context in contexts {
        for (key, value) in &context.payload {
            let contribution = Contribution {
                module: context.module,
                value: value.clone(),
                priority: context.priority,
                observed_at: context.observed_at,
            };
            match contribution.into_value() {
                Ok(value) => by_key.entry(key.as_str()).or_default().push(value),
                Err(e) => tracing::warn!(
                    module = %context.module,
                    key = %key,
                    error = %e,
                    "Dropping unserializable contribution"
                ),
            }
        }
    }

    by_key
        .into_iter()
        .map(|(key, contributions)| (key.to_string(), Value::Array(contributions)))
        .collect()
}
