//! Dependency resolution: turns the enabled list into an execution plan.
//!
//! Iterative topological sort. Each pass scans the not-yet-placed modules in
//! enabled order and places the first one whose enabled dependencies are all
//! placed, then rescans from the start. Dependencies outside the enabled set
//! count as satisfied. When a full scan places nothing, the remaining modules
//! form a cycle and [`ResolutionPolicy`] decides what happens.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::RunLogger;

/// What to do when the enabled modules contain a dependency cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Warn and append the unplaced modules in enabled order.
    #[default]
    BestEffort,
    /// Fail resolution before anything runs.
    Strict,
}

/// Resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// A cycle among enabled modules under [`ResolutionPolicy::Strict`].
    #[error("dependency cycle among enabled modules: {}", unplaced.join(", "))]
    Cycle {
        /// Modules that could not be ordered, in enabled order.
        unplaced: Vec<String>,
    },
}

/// Total execution order for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    order: Vec<String>,
    degraded: Vec<String>,
}

impl ExecutionPlan {
    /// Module names in execution order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Modules appended without ordering guarantees because of a cycle.
    pub fn degraded(&self) -> &[String] {
        &self.degraded
    }

    /// Returns `true` when a cycle forced best-effort ordering.
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Position of `name` in the plan.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|n| n == name)
    }

    /// Number of planned modules.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` when nothing is planned.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Consume the plan, returning the order.
    pub fn into_order(self) -> Vec<String> {
        self.order
    }
}

/// Collapse repeated names to their first occurrence, preserving order.
pub fn dedup_enabled(enabled: &[String]) -> (Vec<String>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(enabled.len());
    let mut duplicates = Vec::new();
    for name in enabled {
        if seen.insert(name.as_str()) {
            unique.push(name.clone());
        } else {
            duplicates.push(name.clone());
        }
    }
    (unique, duplicates)
}

/// Resolve `enabled` against `deps` into an [`ExecutionPlan`].
///
/// Repeated names in `enabled` are collapsed to their first occurrence.
///
/// # Errors
///
/// Returns [`ResolveError::Cycle`] when a cycle exists and `policy` is
/// [`ResolutionPolicy::Strict`].
pub fn resolve(
    enabled: &[String],
    deps: &BTreeMap<String, BTreeSet<String>>,
    policy: ResolutionPolicy,
    logger: &dyn RunLogger,
) -> Result<ExecutionPlan, ResolveError> {
    let (mut remaining, duplicates) = dedup_enabled(enabled);
    for name in &duplicates {
        logger.warn(&format!("module '{name}' enabled more than once; using first occurrence"));
    }

    let enabled_set: HashSet<String> = remaining.iter().cloned().collect();
    let mut placed: HashSet<String> = HashSet::with_capacity(remaining.len());
    let mut plan = ExecutionPlan {
        order: Vec::with_capacity(remaining.len()),
        degraded: Vec::new(),
    };

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|name| {
            deps.get(name).map_or(true, |ds| {
                ds.iter()
                    .filter(|d| enabled_set.contains(*d))
                    .all(|d| placed.contains(d))
            })
        });

        match ready {
            Some(index) => {
                let name = remaining.remove(index);
                debug!(module = %name, position = plan.order.len(), "module placed");
                placed.insert(name.clone());
                plan.order.push(name);
            }
            None => {
                let unplaced = std::mem::take(&mut remaining);
                match policy {
                    ResolutionPolicy::Strict => {
                        logger.error(&format!(
                            "dependency cycle detected among: {}",
                            unplaced.join(", ")
                        ));
                        return Err(ResolveError::Cycle { unplaced });
                    }
                    ResolutionPolicy::BestEffort => {
                        logger.warn(&format!(
                            "dependency cycle detected among: {}; running them in enabled order",
                            unplaced.join(", ")
                        ));
                        plan.order.extend(unplaced.iter().cloned());
                        plan.degraded = unplaced;
                    }
                }
            }
        }
    }

    Ok(plan)
}
