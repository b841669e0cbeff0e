//! Agent hierarchy for the Conductor workspace.
//!
//! Maintains an id-indexed arena of agents across four layers (executive,
//! management, specialist, execution), staffs workflow plans with weighted
//! agent selection, monitors agent health and reports workflow progress.
//!
//! # Main types
//!
//! - [`HierarchyManager`] — Arena, pools, placement, health and progress.
//! - [`AgentInstance`] — One worker with status, capacity and metrics.
//! - [`HealthReport`] — Outcome of a health-check pass.
//! - [`WorkflowProgress`] / [`HierarchyStatus`] — Read-only snapshots.

/// Hierarchy configuration.
pub mod config;
/// Health monitoring and failure recovery.
pub mod health;
/// Arena, staffing and placement.
pub mod manager;
/// Progress and status snapshots.
pub mod progress;
/// Agent types.
pub mod types;

pub use config::{HierarchyConfig, PoolSizes};
pub use health::{HealthReport, Redistribution, HEALTH_MONITOR_ID};
pub use manager::{
    manager_id, score_agent, HierarchyManager, TaskOutcome, EXECUTIVE_ID, MANAGEMENT_TOPIC,
};
pub use progress::{HealthVerdict, HierarchyStatus, PoolStatus, WorkflowProgress};
pub use types::{
    AgentInstance, AgentLayer, AgentRole, AgentStatus, PerformanceMetrics, Urgency,
};
