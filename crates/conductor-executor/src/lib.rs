//! Workflow execution for the Conductor workspace.
//!
//! Turns a request into a staffed plan and drives it phase by phase: tasks
//! launch as soon as their dependencies complete, failed attempts are retried
//! on reassigned agents, quality gates are checked at phase boundaries and the
//! run is judged by its completion ratio.
//!
//! # Main types
//!
//! - [`WorkflowExecutor`] — Per-execution drivers with pause, resume and cancel.
//! - [`TaskBackend`] — The opaque worker that performs a sub-task.
//! - [`ExecutionContext`] / [`ExecutionSnapshot`] — Run-time record and its read-only view.
//! - [`Conductor`] — Registry wiring bus, hierarchy, planner and executor together.
//! - [`ConductorConfig`] — TOML-loadable configuration for every component.

/// Task backend trait and quality signal extraction.
pub mod backend;
/// Executor configuration.
pub mod config;
/// Execution context and snapshots.
pub mod context;
/// The workflow executor.
pub mod engine;
/// Component registry and top-level configuration.
pub mod runtime;

pub use backend::{quality_signal, TaskBackend, TaskResult};
pub use config::{ExecutorConfig, QualityGatePolicy};
pub use context::{
    ExecutionContext, ExecutionEvent, ExecutionSnapshot, ExecutionStatus, GateResult,
};
pub use engine::{ExecutionPreferences, WorkflowExecutor, EXECUTOR_ID};
pub use runtime::{Conductor, ConductorConfig, LoggingConfig};
