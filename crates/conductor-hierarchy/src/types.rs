use chrono::{DateTime, Utc};
use conductor_core::{ConductorError, ConductorResult};
use conductor_planner::{Specialty, SpecialtyGroup};
use serde::{Deserialize, Serialize};

/// Hierarchy tier an agent belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentLayer {
    Executive,
    Management,
    Specialist,
    Execution,
}

impl AgentLayer {
    /// Executive and management agents are singletons that are never deleted.
    pub fn is_singleton(self) -> bool {
        matches!(self, AgentLayer::Executive | AgentLayer::Management)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentLayer::Executive => "executive",
            AgentLayer::Management => "management",
            AgentLayer::Specialist => "specialist",
            AgentLayer::Execution => "execution",
        }
    }
}

impl std::fmt::Display for AgentLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an agent does within its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Director,
    Manager,
    Worker,
}

/// Operational status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Available,
    Busy,
    Overloaded,
    Offline,
    Failed,
    Maintenance,
}

impl AgentStatus {
    /// Whether the agent can take or keep work.
    pub fn is_healthy(self) -> bool {
        matches!(
            self,
            AgentStatus::Available | AgentStatus::Busy | AgentStatus::Overloaded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Available => "available",
            AgentStatus::Busy => "busy",
            AgentStatus::Overloaded => "overloaded",
            AgentStatus::Offline => "offline",
            AgentStatus::Failed => "failed",
            AgentStatus::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How hard to try when staffing a specialty.
///
/// Escalated urgency only widens which existing agents qualify; it never
/// lifts the pool cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[default]
    Normal,
    High,
}

/// Rolling performance figures used by agent selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Completed / (completed + failed); starts optimistic at 1.0.
    pub success_rate: f64,
    /// Exponential moving average, in hours.
    pub avg_completion_hours: f64,
    pub quality_score: f64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub consecutive_failures: u32,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            avg_completion_hours: 0.0,
            quality_score: 0.8,
            tasks_completed: 0,
            tasks_failed: 0,
            consecutive_failures: 0,
        }
    }
}

impl PerformanceMetrics {
    pub fn record_success(&mut self, hours: f64, quality: Option<f64>, alpha: f64) {
        self.tasks_completed += 1;
        self.consecutive_failures = 0;
        self.avg_completion_hours = if self.tasks_completed == 1 {
            hours
        } else {
            alpha * hours + (1.0 - alpha) * self.avg_completion_hours
        };
        if let Some(q) = quality {
            self.quality_score = alpha * q.clamp(0.0, 1.0) + (1.0 - alpha) * self.quality_score;
        }
        self.update_success_rate();
    }

    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
        self.consecutive_failures += 1;
        self.update_success_rate();
    }

    fn update_success_rate(&mut self) {
        let total = self.tasks_completed + self.tasks_failed;
        if total > 0 {
            self.success_rate = self.tasks_completed as f64 / total as f64;
        }
    }
}

/// A worker instance in the hierarchy arena.
///
/// `supervisor_id` is a plain id into the same arena, never an owning link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    pub specialty: Option<Specialty>,
    /// Pool for specialists, managed group for managers.
    pub group: Option<SpecialtyGroup>,
    pub layer: AgentLayer,
    pub status: AgentStatus,
    pub current_tasks: Vec<String>,
    pub capacity: usize,
    pub metrics: PerformanceMetrics,
    pub supervisor_id: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl AgentInstance {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        role: AgentRole,
        layer: AgentLayer,
        capacity: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            role,
            specialty: None,
            group: None,
            layer,
            status: AgentStatus::Available,
            current_tasks: Vec::new(),
            capacity,
            metrics: PerformanceMetrics::default(),
            supervisor_id: None,
            last_heartbeat: now,
            created_at: now,
        }
    }

    /// Fraction of capacity in use, in `[0, 1]`.
    pub fn load(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        (self.current_tasks.len() as f64 / self.capacity as f64).min(1.0)
    }

    pub fn has_capacity(&self) -> bool {
        self.current_tasks.len() < self.capacity
    }

    /// Healthy and holding no tasks.
    pub fn is_idle(&self) -> bool {
        self.status.is_healthy() && self.current_tasks.is_empty()
    }

    /// Healthy with room for another task.
    pub fn can_accept(&self) -> bool {
        self.status.is_healthy() && self.has_capacity()
    }

    /// Take a task, refusing when full.
    pub fn assign(&mut self, task_id: &str) -> ConductorResult<()> {
        if self.current_tasks.iter().any(|t| t == task_id) {
            return Ok(());
        }
        if !self.has_capacity() {
            return Err(ConductorError::ResourceExhausted(format!(
                "agent {} is at capacity ({})",
                self.id, self.capacity
            )));
        }
        self.current_tasks.push(task_id.to_string());
        self.refresh_status();
        Ok(())
    }

    /// Drop a task. Returns whether it was held.
    pub fn release(&mut self, task_id: &str) -> bool {
        let before = self.current_tasks.len();
        self.current_tasks.retain(|t| t != task_id);
        let released = self.current_tasks.len() != before;
        if released {
            self.refresh_status();
        }
        released
    }

    /// Recompute available/busy/overloaded from load. Leaves unhealthy
    /// statuses alone.
    pub fn refresh_status(&mut self) {
        if !self.status.is_healthy() {
            return;
        }
        self.status = if self.current_tasks.is_empty() {
            AgentStatus::Available
        } else if self.has_capacity() {
            AgentStatus::Busy
        } else {
            AgentStatus::Overloaded
        };
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn worker(capacity: usize) -> AgentInstance {
        AgentInstance::new("w-1", "Worker", AgentRole::Worker, AgentLayer::Specialist, capacity)
    }

    #[test]
    fn test_assign_respects_capacity() {
        let mut agent = worker(2);
        agent.assign("t1").unwrap();
        assert_eq!(agent.status, AgentStatus::Busy);
        agent.assign("t2").unwrap();
        assert_eq!(agent.status, AgentStatus::Overloaded);
        let err = agent.assign("t3").unwrap_err();
        assert!(matches!(err, ConductorError::ResourceExhausted(_)));
        assert_eq!(agent.current_tasks.len(), 2);
    }

    #[test]
    fn test_assign_is_idempotent() {
        let mut agent = worker(1);
        agent.assign("t1").unwrap();
        agent.assign("t1").unwrap();
        assert_eq!(agent.current_tasks.len(), 1);
    }

    #[test]
    fn test_release_restores_available() {
        let mut agent = worker(2);
        agent.assign("t1").unwrap();
        assert!(agent.release("t1"));
        assert!(!agent.release("t1"));
        assert_eq!(agent.status, AgentStatus::Available);
        assert!(agent.is_idle());
    }

    #[test]
    fn test_refresh_keeps_failed_status() {
        let mut agent = worker(2);
        agent.status = AgentStatus::Failed;
        agent.refresh_status();
        assert_eq!(agent.status, AgentStatus::Failed);
        assert!(!agent.can_accept());
    }

    #[test]
    fn test_metrics_ema_and_success_rate() {
        let mut metrics = PerformanceMetrics::default();
        metrics.record_success(4.0, Some(1.0), 0.5);
        assert_eq!(metrics.avg_completion_hours, 4.0);
        metrics.record_success(2.0, None, 0.5);
        assert_eq!(metrics.avg_completion_hours, 3.0);
        metrics.record_failure();
        assert_eq!(metrics.consecutive_failures, 1);
        assert!((metrics.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((metrics.quality_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_zero_capacity_is_full() {
        let agent = worker(0);
        assert_eq!(agent.load(), 1.0);
        assert!(!agent.has_capacity());
    }
}
