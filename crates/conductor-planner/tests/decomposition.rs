//! Plan-level properties of the decomposer.
//!
//! Checks determinism, dependency closure, phase ordering and the JSON shape
//! of emitted plans across a spread of requests.

use conductor_core::ConductorError;
use conductor_planner::*;
use std::collections::HashSet;

const REQUESTS: &[&str] = &[
    "simple task",
    "write a blog post about remote work",
    "comprehensive market research report with competitor analysis",
    "enterprise compliance review of our global data policy",
    "investigate the revenue anomaly and find the root cause",
    "design a presentation and documentation for the api launch",
];

fn decomposer() -> TaskDecomposer {
    TaskDecomposer::new(PlannerConfig::default()).expect("builtin tables are valid")
}

#[test]
fn decomposition_is_deterministic() {
    let d = decomposer();
    for request in REQUESTS {
        let a = d.decompose(request).unwrap();
        let b = d.decompose(request).unwrap();
        assert_eq!(a.complexity.tier, b.complexity.tier);
        assert_eq!(a.phases, b.phases);
        assert_eq!(a.required_specialists, b.required_specialists);
        assert_eq!(a.estimated_hours, b.estimated_hours);
        assert_eq!(a.estimated_cost, b.estimated_cost);
        assert_eq!(a.risk_level, b.risk_level);

        let shape = |p: &WorkflowPlan| -> Vec<(Specialty, Phase, usize, u8)> {
            p.subtasks
                .iter()
                .map(|t| (t.specialty, t.parallel_group, t.depends_on.len(), t.priority))
                .collect()
        };
        assert_eq!(shape(&a), shape(&b));
        assert_ne!(a.id, b.id);
    }
}

#[test]
fn dependencies_close_over_the_plan() {
    let d = decomposer();
    for request in REQUESTS {
        let plan = d.decompose(request).unwrap();
        let ids: HashSet<&str> = plan.subtasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids.len(), plan.subtasks.len(), "ids unique for {request}");
        for task in &plan.subtasks {
            for dep in &task.depends_on {
                assert!(ids.contains(dep.as_str()), "{} -> {dep}", task.id);
            }
        }
        assert!(!plan.has_cycle());
    }
}

#[test]
fn phases_follow_canonical_order() {
    let d = decomposer();
    for request in REQUESTS {
        let plan = d.decompose(request).unwrap();
        assert_eq!(plan.phases.last(), Some(&Phase::Delivery));
        let positions: Vec<usize> = plan
            .phases
            .iter()
            .map(|p| Phase::CANONICAL.iter().position(|c| c == p).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        for task in &plan.subtasks {
            assert!(plan.phases.contains(&task.parallel_group));
        }
    }
}

#[test]
fn first_ready_set_is_dependency_free() {
    let plan = decomposer()
        .decompose("comprehensive market research report with competitor analysis")
        .unwrap();
    let ready = plan.ready_tasks(&HashSet::new());
    assert!(!ready.is_empty());
    assert!(ready.iter().all(|t| t.depends_on.is_empty()));
}

#[test]
fn plan_survives_json_round_trip() {
    let plan = decomposer()
        .decompose("enterprise compliance review of our global data policy")
        .unwrap();
    let json = serde_json::to_string(&plan).unwrap();
    let parsed: WorkflowPlan = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.id, plan.id);
    assert_eq!(parsed.subtasks.len(), plan.subtasks.len());
    assert_eq!(parsed.risk_level, plan.risk_level);
    assert!(parsed.validate().is_ok());

    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["complexity"]["tier"], "enterprise");
    assert_eq!(value["subtasks"][0]["status"], "pending");
}

#[test]
fn blank_request_is_a_validation_error() {
    let err = decomposer().decompose("  \t ").unwrap_err();
    assert!(matches!(err, ConductorError::Validation(_)));
    assert!(!err.is_retryable());
}

#[test]
fn expensive_plans_carry_approval_reasons() {
    let plan = decomposer()
        .decompose(
            "enterprise market strategy with financial forecast, competitor research and \
             compliance review",
        )
        .unwrap();
    assert!(plan.requires_approval);
    assert!(!plan.approval_reasons.is_empty());
    assert!(plan.estimated_cost > 5_000.0 || plan.estimated_hours > 40.0);
}
