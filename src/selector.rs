//! Priority Selector
//!
//! Picks "the best single view" out of an already produced
//! [`AggregatedResult`], without touching any module.
//!
//! The preferred module wins when it responded; otherwise the responding
//! module with the highest priority does (newest answer on ties). Under the
//! `merge` strategy the chosen module's own view is rebuilt from its
//! contributions. Under `priority` and `latest`, `merged` already is a single
//! module's payload with no per-module sub-view, so it is returned as is.

use crate::context::{AggregatedResult, Contribution, Payload};
use crate::merge::MergeStrategy;
use ctxmesh_registry::ModuleId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The view chosen by [`select_by_priority`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    /// Module whose view was chosen (`None` when nothing responded)
    pub module: Option<ModuleId>,
    pub view: Payload,
}

/// Select the best single view from `result`
pub fn select_by_priority(result: &AggregatedResult, preferred: Option<ModuleId>) -> Selection {
    let chosen = preferred
        .filter(|module| result.responding_modules.contains(module))
        .or_else(|| top_module(result));

    let Some(module) = chosen else {
        return Selection {
            module: None,
            view: result.merged.clone(),
        };
    };

    let view = match result.metadata.strategy {
        MergeStrategy::Merge => module_view(&result.merged, module),
        MergeStrategy::Priority | MergeStrategy::Latest => result.merged.clone(),
    };

    Selection {
        module: Some(module),
        view,
    }
}

/// Responding module with the highest priority
fn top_module(result: &AggregatedResult) -> Option<ModuleId> {
    result
        .responding_modules
        .iter()
        .copied()
        .max_by(|a, b| {
            let priority = |m: &ModuleId| result.priorities.get(m).copied().unwrap_or(0);
            priority(a)
                .cmp(&priority(b))
                .then_with(|| result.observed_at.get(a).cmp(&result.observed_at.get(b)))
                .then_with(|| b.cmp(a))
        })
}

/// Rebuild one module's payload from merge contributions
fn module_view(merged: &Payload, module: ModuleId) -> Payload {
    merged
        .iter()
        .filter_map(|(key, contributions)| {
            let Value::Array(contributions) = contributions else {
                return None;
            };
            contributions
                .iter()
                .filter_map(Contribution::from_value)
                .find(|c| c.module == module)
                .map(|c| (key.clone(), c.value))
        })
        .collect()
}
