//! Request decomposition for the Conductor workspace.
//!
//! Classifies free-text requests by complexity, maps them onto specialties
//! through a keyword pattern table and emits dependency-ordered
//! [`WorkflowPlan`]s with phases, quality gates, cost and risk estimates.
//!
//! # Main types
//!
//! - [`TaskDecomposer`] — Turns a request into a validated plan.
//! - [`WorkflowPlan`] — Sub-tasks, phases, gates and estimates for one request.
//! - [`SubTask`] — The smallest assignable unit of work.
//! - [`Specialty`] — Closed set of specialist kinds, grouped into phases.
//! - [`PatternTable`] — Complexity signals and task patterns used for matching.

/// Planner configuration.
pub mod config;
/// The decomposition pipeline.
pub mod decomposer;
/// Dependency graph queries over a plan.
pub mod graph;
/// Keyword tables for complexity and specialty matching.
pub mod patterns;
/// Specialty catalog, groups and phases.
pub mod specialty;
/// Plan and sub-task types.
pub mod types;

pub use config::PlannerConfig;
pub use decomposer::{assess_risk, TaskDecomposer};
pub use patterns::{PatternMatch, PatternTable};
pub use specialty::{Phase, Specialty, SpecialtyCatalog, SpecialtyGroup, SpecialtyProfile};
pub use types::{
    ComplexityAssessment, ComplexityTier, QualityGate, SubTask, TaskRequirement, TaskStatus,
    WorkflowPlan,
};
