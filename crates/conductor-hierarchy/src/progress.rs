use crate::manager::HierarchyManager;
use crate::types::AgentStatus;
use chrono::{DateTime, Utc};
use conductor_core::{ConductorError, ConductorResult};
use conductor_planner::{Phase, SpecialtyGroup, TaskStatus};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Coarse health of a running workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthVerdict {
    Healthy,
    Warning,
    Degraded,
}

/// Point-in-time progress of one workflow, from the hierarchy's view.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowProgress {
    pub workflow_id: String,
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub percent_complete: f64,
    /// First phase that still has unfinished work.
    pub current_phase: Option<Phase>,
    pub health: HealthVerdict,
    pub overdue_tasks: Vec<String>,
    pub agents: usize,
    pub unhealthy_agents: usize,
}

/// Occupancy of one specialist pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub group: SpecialtyGroup,
    pub size: usize,
    pub max_size: usize,
    pub idle: usize,
    pub active_tasks: usize,
}

/// Snapshot of the whole hierarchy.
#[derive(Debug, Clone, Serialize)]
pub struct HierarchyStatus {
    pub total_agents: usize,
    pub by_layer: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub pools: Vec<PoolStatus>,
    pub active_workflows: usize,
    /// Share of specialist capacity currently reserved.
    pub utilization: f64,
    pub unhealthy_ratio: f64,
}

impl HierarchyManager {
    pub async fn workflow_progress(&self, workflow_id: &str) -> ConductorResult<WorkflowProgress> {
        self.workflow_progress_at(workflow_id, Utc::now()).await
    }

    /// Progress as of `now`; overdue detection compares against it.
    pub async fn workflow_progress_at(
        &self,
        workflow_id: &str,
        now: DateTime<Utc>,
    ) -> ConductorResult<WorkflowProgress> {
        let state = self.state.read().await;
        let tracking = state
            .workflows
            .get(workflow_id)
            .ok_or_else(|| ConductorError::NotFound(format!("workflow {workflow_id}")))?;

        let count = |s: TaskStatus| tracking.tasks.iter().filter(|t| t.status == s).count();
        let total = tracking.tasks.len();
        let completed = count(TaskStatus::Completed);
        let failed = count(TaskStatus::Failed);
        let in_progress = count(TaskStatus::InProgress);

        let current_phase = tracking.phases.iter().copied().find(|phase| {
            tracking
                .tasks
                .iter()
                .any(|t| t.phase == *phase && !t.status.is_terminal())
        });

        let overdue_tasks: Vec<String> = tracking
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .filter(|t| {
                t.started_at.is_some_and(|started| {
                    let elapsed_hours = (now - started).num_seconds() as f64 / 3600.0;
                    elapsed_hours > t.estimated_hours * self.config.overdue_factor
                })
            })
            .map(|t| t.task_id.clone())
            .collect();

        let agent_ids: HashSet<&str> = tracking
            .tasks
            .iter()
            .filter_map(|t| t.agent_id.as_deref())
            .collect();
        let unhealthy_agents = agent_ids
            .iter()
            .filter(|id| {
                !state
                    .agents
                    .get(**id)
                    .is_some_and(|a| a.status.is_healthy())
            })
            .count();
        let unhealthy_ratio = if agent_ids.is_empty() {
            0.0
        } else {
            unhealthy_agents as f64 / agent_ids.len() as f64
        };

        let health = if failed > 0 || unhealthy_ratio > self.config.unhealthy_ratio_threshold {
            HealthVerdict::Degraded
        } else if !overdue_tasks.is_empty() {
            HealthVerdict::Warning
        } else {
            HealthVerdict::Healthy
        };

        Ok(WorkflowProgress {
            workflow_id: workflow_id.to_string(),
            total_tasks: total,
            completed,
            failed,
            in_progress,
            percent_complete: if total == 0 {
                100.0
            } else {
                completed as f64 / total as f64 * 100.0
            },
            current_phase,
            health,
            overdue_tasks,
            agents: agent_ids.len(),
            unhealthy_agents,
        })
    }

    pub async fn hierarchy_status(&self) -> HierarchyStatus {
        let state = self.state.read().await;
        let mut by_layer = BTreeMap::new();
        let mut by_status = BTreeMap::new();
        for agent in state.agents.values() {
            *by_layer.entry(agent.layer.as_str().to_string()).or_insert(0) += 1;
            *by_status.entry(agent.status.as_str().to_string()).or_insert(0) += 1;
        }

        let pools = SpecialtyGroup::ALL
            .into_iter()
            .map(|group| {
                let members: Vec<_> = state
                    .agents
                    .values()
                    .filter(|a| !a.layer.is_singleton() && a.group == Some(group))
                    .collect();
                PoolStatus {
                    group,
                    size: members.len(),
                    max_size: self.config.pool_sizes.max_for(group),
                    idle: members.iter().filter(|a| a.is_idle()).count(),
                    active_tasks: members.iter().map(|a| a.current_tasks.len()).sum(),
                }
            })
            .collect();

        let workers: Vec<_> = state
            .agents
            .values()
            .filter(|a| !a.layer.is_singleton())
            .collect();
        let capacity: usize = workers.iter().map(|a| a.capacity).sum();
        let reserved: usize = workers.iter().map(|a| a.current_tasks.len()).sum();
        let unhealthy = state
            .agents
            .values()
            .filter(|a| !a.status.is_healthy() && a.status != AgentStatus::Maintenance)
            .count();

        HierarchyStatus {
            total_agents: state.agents.len(),
            by_layer,
            by_status,
            pools,
            active_workflows: state.workflows.values().filter(|w| !w.finished).count(),
            utilization: if capacity == 0 {
                0.0
            } else {
                reserved as f64 / capacity as f64
            },
            unhealthy_ratio: if state.agents.is_empty() {
                0.0
            } else {
                unhealthy as f64 / state.agents.len() as f64
            },
        }
    }
}
