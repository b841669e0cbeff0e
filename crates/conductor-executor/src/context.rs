use crate::backend::TaskResult;
use chrono::{DateTime, Utc};
use conductor_planner::{Phase, TaskStatus, WorkflowPlan};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Lifecycle of one execution.
///
/// `Planned → (Approved) → Executing ⇄ Paused → Completed | Failed | Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Planned,
    Approved,
    Executing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Planned => "planned",
            ExecutionStatus::Approved => "approved",
            ExecutionStatus::Executing => "executing",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one phase-boundary quality check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub phase: Phase,
    pub threshold: f64,
    /// Mean quality of the phase's completed tasks, if any reported one.
    pub score: Option<f64>,
    pub passed: bool,
}

/// One line of an execution's audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub task_id: Option<String>,
    pub message: String,
}

/// Mutable run-time record of one execution of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub plan: WorkflowPlan,
    /// Task id → agent id, as of each task's latest launch.
    pub assignments: HashMap<String, String>,
    pub current_phase: Option<Phase>,
    pub completed_tasks: HashSet<String>,
    pub failed_tasks: HashSet<String>,
    pub blocked_tasks: HashSet<String>,
    pub in_flight: HashSet<String>,
    /// Launch count per task.
    pub attempts: HashMap<String, u32>,
    pub task_quality: HashMap<String, f64>,
    /// Actual duration of each completed task, in hours.
    pub task_durations: HashMap<String, f64>,
    #[serde(default)]
    pub task_results: HashMap<String, TaskResult>,
    pub gate_results: Vec<GateResult>,
    pub error_count: u32,
    pub retry_count: u32,
    pub escalated: bool,
    pub overall_quality: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub log: Vec<ExecutionEvent>,
}

impl ExecutionContext {
    pub fn new(execution_id: impl Into<String>, plan: WorkflowPlan) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_id: plan.id.clone(),
            status: ExecutionStatus::Planned,
            plan,
            assignments: HashMap::new(),
            current_phase: None,
            completed_tasks: HashSet::new(),
            failed_tasks: HashSet::new(),
            blocked_tasks: HashSet::new(),
            in_flight: HashSet::new(),
            attempts: HashMap::new(),
            task_quality: HashMap::new(),
            task_durations: HashMap::new(),
            task_results: HashMap::new(),
            gate_results: Vec::new(),
            error_count: 0,
            retry_count: 0,
            escalated: false,
            overall_quality: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            log: Vec::new(),
        }
    }

    pub fn record(&mut self, task_id: Option<&str>, message: impl Into<String>) {
        self.log.push(ExecutionEvent {
            timestamp: Utc::now(),
            task_id: task_id.map(str::to_string),
            message: message.into(),
        });
    }

    /// Move a plan task to `next`, leaving it where it is when the move is
    /// not a legal transition.
    fn move_task(&mut self, task_id: &str, next: TaskStatus) {
        let Some(task) = self.plan.get_mut(task_id) else {
            return;
        };
        if let Err(e) = task.transition(next) {
            warn!(
                execution_id = %self.execution_id,
                task_id,
                error = %e,
                "Task status change rejected"
            );
        }
    }

    /// Mark a task as launched on `agent_id` and return its attempt number.
    pub fn mark_launched(&mut self, task_id: &str, agent_id: &str) -> u32 {
        self.move_task(task_id, TaskStatus::InProgress);
        self.in_flight.insert(task_id.to_string());
        self.assignments
            .insert(task_id.to_string(), agent_id.to_string());
        let attempt = self.attempts.entry(task_id.to_string()).or_insert(0);
        *attempt += 1;
        *attempt
    }

    pub fn mark_completed(
        &mut self,
        task_id: &str,
        duration_hours: f64,
        quality: Option<f64>,
        result: TaskResult,
    ) {
        self.in_flight.remove(task_id);
        self.failed_tasks.remove(task_id);
        self.completed_tasks.insert(task_id.to_string());
        self.task_durations
            .insert(task_id.to_string(), duration_hours);
        if let Some(q) = quality {
            self.task_quality.insert(task_id.to_string(), q);
        }
        self.task_results.insert(task_id.to_string(), result);
        self.move_task(task_id, TaskStatus::Completed);
    }

    /// Record a failed attempt. The task stays failed unless [`Self::mark_retrying`]
    /// puts it back in line.
    pub fn mark_failed(&mut self, task_id: &str) {
        self.in_flight.remove(task_id);
        self.completed_tasks.remove(task_id);
        self.failed_tasks.insert(task_id.to_string());
        self.error_count += 1;
    }

    /// Settle a failure as permanent in the plan's task statuses.
    pub fn mark_failed_permanently(&mut self, task_id: &str) {
        self.move_task(task_id, TaskStatus::Failed);
    }

    pub fn mark_retrying(&mut self, task_id: &str, agent_id: &str) {
        self.failed_tasks.remove(task_id);
        self.retry_count += 1;
        self.assignments
            .insert(task_id.to_string(), agent_id.to_string());
        self.move_task(task_id, TaskStatus::Pending);
    }

    pub fn mark_blocked(&mut self, task_id: &str) {
        self.blocked_tasks.insert(task_id.to_string());
        self.move_task(task_id, TaskStatus::Blocked);
    }

    /// Cancel every task that is neither terminal nor blocked.
    pub fn cancel_remaining(&mut self) -> Vec<String> {
        let mut cancelled = Vec::new();
        for task in &mut self.plan.subtasks {
            if task.status.is_terminal() || task.status == TaskStatus::Blocked {
                continue;
            }
            if task.transition(TaskStatus::Cancelled).is_ok() {
                cancelled.push(task.id.clone());
            }
        }
        self.in_flight.clear();
        cancelled
    }

    /// Whether a task has settled for this run: completed, permanently
    /// failed, blocked or cancelled.
    pub fn is_settled(&self, task_id: &str) -> bool {
        self.completed_tasks.contains(task_id)
            || self.blocked_tasks.contains(task_id)
            || self
                .plan
                .get(task_id)
                .is_some_and(|t| t.status.is_terminal())
    }

    pub fn phase_settled(&self, phase: Phase) -> bool {
        self.plan
            .tasks_in_phase(phase)
            .iter()
            .all(|t| self.is_settled(&t.id))
    }

    /// Completed / total. An empty plan counts as fully successful.
    pub fn success_ratio(&self) -> f64 {
        let total = self.plan.subtasks.len();
        if total == 0 {
            1.0
        } else {
            self.completed_tasks.len() as f64 / total as f64
        }
    }

    /// Mean quality of completed tasks in a phase.
    pub fn phase_quality(&self, phase: Phase) -> Option<f64> {
        mean(
            self.plan
                .tasks_in_phase(phase)
                .iter()
                .filter_map(|t| self.task_quality.get(&t.id).copied()),
        )
    }

    pub fn mean_quality(&self) -> Option<f64> {
        mean(self.task_quality.values().copied())
    }

    /// Point-in-time snapshot with a naive linear ETA.
    pub fn snapshot(&self, now: DateTime<Utc>) -> ExecutionSnapshot {
        let total = self.plan.subtasks.len();
        let completed = self.completed_tasks.len();
        let failed = self
            .plan
            .subtasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count();
        let blocked = self.blocked_tasks.len();
        let cancelled = self
            .plan
            .subtasks
            .iter()
            .filter(|t| t.status == TaskStatus::Cancelled)
            .count();
        let remaining = total.saturating_sub(completed + failed + blocked + cancelled);

        let end = self.finished_at.unwrap_or(now);
        let elapsed_secs = self
            .started_at
            .map(|s| (end - s).num_seconds().max(0) as u64)
            .unwrap_or(0);
        let eta_secs = if self.status.is_terminal() || remaining == 0 {
            Some(0)
        } else if completed == 0 {
            None
        } else {
            Some(elapsed_secs / completed as u64 * remaining as u64)
        };

        let mut failed_task_ids: Vec<String> = self.failed_tasks.iter().cloned().collect();
        failed_task_ids.sort();

        ExecutionSnapshot {
            execution_id: self.execution_id.clone(),
            workflow_id: self.workflow_id.clone(),
            status: self.status,
            total_tasks: total,
            completed,
            failed,
            blocked,
            in_progress: self.in_flight.len(),
            percent_complete: if total == 0 {
                100.0
            } else {
                completed as f64 / total as f64 * 100.0
            },
            current_phase: self.current_phase,
            error_count: self.error_count,
            retry_count: self.retry_count,
            elapsed_secs,
            eta_secs,
            overall_quality: self.overall_quality.or_else(|| self.mean_quality()),
            failed_task_ids,
            gate_results: self.gate_results.clone(),
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// Read-only view of an execution, safe to hand to any transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub in_progress: usize,
    pub percent_complete: f64,
    pub current_phase: Option<Phase>,
    pub error_count: u32,
    pub retry_count: u32,
    pub elapsed_secs: u64,
    /// `None` until at least one task has completed.
    pub eta_secs: Option<u64>,
    pub overall_quality: Option<f64>,
    pub failed_task_ids: Vec<String>,
    pub gate_results: Vec<GateResult>,
}
