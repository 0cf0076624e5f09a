//! Tests for `src/resolver.rs` — ordering properties over generated graphs.

use std::collections::{BTreeMap, BTreeSet};

use rampart::events::MemoryLogger;
use rampart::resolver::{resolve, ExecutionPlan, ResolutionPolicy};

fn graph(pairs: &[(&str, &[&str])]) -> BTreeMap<String, BTreeSet<String>> {
    pairs
        .iter()
        .map(|(m, ds)| ((*m).to_owned(), ds.iter().map(|d| (*d).to_owned()).collect()))
        .collect()
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_owned()).collect()
}

fn assert_topological(plan: &ExecutionPlan, deps: &BTreeMap<String, BTreeSet<String>>) {
    for (module, ds) in deps {
        let Some(at) = plan.position(module) else {
            continue;
        };
        for dep in ds {
            if let Some(dep_at) = plan.position(dep) {
                assert!(dep_at < at, "{dep} must come before {module}");
            }
        }
    }
}

#[test]
fn every_module_placed_exactly_once() {
    let deps = graph(&[
        ("fail2ban", &["ssh", "ufw"]),
        ("ssh", &["packages"]),
        ("ufw", &["packages"]),
        ("auditd", &["packages", "sysctl"]),
    ]);
    let enabled = names(&["auditd", "fail2ban", "sysctl", "ufw", "ssh", "packages"]);
    let logger = MemoryLogger::new();

    let plan = resolve(&enabled, &deps, ResolutionPolicy::Strict, &logger).expect("acyclic");

    assert_eq!(plan.len(), enabled.len());
    let unique: BTreeSet<&String> = plan.order().iter().collect();
    assert_eq!(unique.len(), enabled.len());
    assert_topological(&plan, &deps);
    assert!(logger.events().is_empty());
}

#[test]
fn resolution_is_deterministic() {
    let deps = graph(&[("b", &["a"]), ("d", &["c", "a"]), ("e", &["d"])]);
    let enabled = names(&["e", "d", "c", "b", "a"]);
    let logger = MemoryLogger::new();

    let first = resolve(&enabled, &deps, ResolutionPolicy::BestEffort, &logger).expect("plan");
    for _ in 0..10 {
        let again = resolve(&enabled, &deps, ResolutionPolicy::BestEffort, &logger).expect("plan");
        assert_eq!(first, again);
    }
    assert_eq!(first.order(), names(&["c", "a", "d", "e", "b"]).as_slice());
}

#[test]
fn cycle_with_tail_places_acyclic_part_first() {
    let deps = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"]), ("d", &[])]);
    let enabled = names(&["a", "b", "c", "d"]);
    let logger = MemoryLogger::new();

    let plan = resolve(&enabled, &deps, ResolutionPolicy::BestEffort, &logger).expect("plan");

    assert_eq!(plan.order(), names(&["d", "a", "b", "c"]).as_slice());
    assert_eq!(plan.degraded(), names(&["a", "b", "c"]).as_slice());
}

#[test]
fn dependent_of_cycle_is_degraded_too() {
    let deps = graph(&[("a", &["b"]), ("b", &["a"]), ("c", &["a"])]);
    let enabled = names(&["c", "a", "b"]);
    let logger = MemoryLogger::new();

    let plan = resolve(&enabled, &deps, ResolutionPolicy::BestEffort, &logger).expect("plan");

    assert_eq!(plan.order(), names(&["c", "a", "b"]).as_slice());
    assert!(plan.is_degraded());
    assert_eq!(plan.degraded().len(), 3);
}
