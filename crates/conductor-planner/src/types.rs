use crate::specialty::{Phase, Specialty};
use chrono::{DateTime, Utc};
use conductor_core::{ConductorError, ConductorResult, RiskLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Complexity tier assigned to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTier {
    Simple,
    Moderate,
    Complex,
    Enterprise,
    Investigation,
}

impl ComplexityTier {
    pub const ALL: [ComplexityTier; 5] = [
        ComplexityTier::Simple,
        ComplexityTier::Moderate,
        ComplexityTier::Complex,
        ComplexityTier::Enterprise,
        ComplexityTier::Investigation,
    ];

    /// Effort multiplier applied to a specialty's baseline hours.
    pub fn effort_multiplier(self) -> f64 {
        match self {
            ComplexityTier::Simple => 1.0,
            ComplexityTier::Moderate => 1.5,
            ComplexityTier::Complex => 2.5,
            ComplexityTier::Enterprise => 4.0,
            ComplexityTier::Investigation => 3.0,
        }
    }

    /// Tiers that always get fact-checking and quality control appended.
    pub fn needs_quality_assurance(self) -> bool {
        matches!(
            self,
            ComplexityTier::Complex | ComplexityTier::Enterprise | ComplexityTier::Investigation
        )
    }
}

impl std::fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComplexityTier::Simple => write!(f, "simple"),
            ComplexityTier::Moderate => write!(f, "moderate"),
            ComplexityTier::Complex => write!(f, "complex"),
            ComplexityTier::Enterprise => write!(f, "enterprise"),
            ComplexityTier::Investigation => write!(f, "investigation"),
        }
    }
}

/// Result of classifying a request against the complexity keyword sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityAssessment {
    pub tier: ComplexityTier,
    /// Saturating function of the winning score, in `[0, 1]`.
    pub confidence: f64,
    pub winning_score: f64,
}

/// Intermediate per-specialty requirement produced during decomposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequirement {
    pub specialty: Specialty,
    /// 1 (lowest) to 10 (highest).
    pub priority: u8,
    pub estimated_hours: f64,
    /// Phases whose tasks must finish before this requirement's task starts.
    pub depends_on_phases: Vec<Phase>,
    pub parallel_eligible: bool,
}

/// Status of a sub-task.
///
/// Forward-only, except that a reassigned task re-enters `Pending`/`Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    InProgress,
    Blocked,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Ready | InProgress | Blocked | Cancelled | Failed) => true,
            (Ready, Pending | InProgress | Blocked | Cancelled | Failed) => true,
            // Reassignment after a failed attempt puts the task back in line.
            (InProgress, Completed | Failed | Cancelled | Pending) => true,
            (Blocked, Ready | Pending | Cancelled | Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The smallest unit of assignable work within a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub specialty: Specialty,
    pub estimated_hours: f64,
    pub priority: u8,
    pub depends_on: Vec<String>,
    pub parallel_group: Phase,
    pub parallel_eligible: bool,
    pub status: TaskStatus,
    pub success_criteria: Vec<String>,
    pub quality_checkpoints: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SubTask {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        specialty: Specialty,
        estimated_hours: f64,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            specialty,
            estimated_hours,
            priority: 5,
            depends_on: Vec::new(),
            parallel_group: specialty.phase(),
            parallel_eligible: true,
            status: TaskStatus::Pending,
            success_criteria: Vec::new(),
            quality_checkpoints: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.depends_on = deps;
        self
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.parallel_group = phase;
        self
    }

    /// Whether the task can be launched given the set of completed task ids.
    pub fn is_ready(&self, completed: &HashSet<String>) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Ready)
            && self.depends_on.iter().all(|dep| completed.contains(dep))
    }

    /// Move to `next`, rejecting transitions outside the state machine.
    pub fn transition(&mut self, next: TaskStatus) -> ConductorResult<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(ConductorError::Validation(format!(
                "task {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        match next {
            TaskStatus::InProgress => self.started_at = Some(Utc::now()),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            TaskStatus::Pending => self.started_at = None,
            _ => {}
        }
        self.status = next;
        Ok(())
    }
}

/// Phase-boundary check comparing mean quality score against a threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGate {
    pub name: String,
    pub phase: Phase,
    pub threshold: f64,
}

/// The decomposed, dependency-ordered representation of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub id: String,
    pub request: String,
    pub complexity: ComplexityAssessment,
    pub subtasks: Vec<SubTask>,
    pub phases: Vec<Phase>,
    pub required_specialists: Vec<Specialty>,
    pub quality_gates: Vec<QualityGate>,
    pub estimated_hours: f64,
    pub estimated_cost: f64,
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
    #[serde(default)]
    pub approval_reasons: Vec<String>,
    /// Set when sub-tasks were dropped to respect the configured maximum.
    #[serde(default)]
    pub truncated: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_subtask_creation() {
        let task = SubTask::new("t-1", "Analyze data", Specialty::DataAnalyst, 6.0);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.parallel_group, Phase::Analysis);
        assert!(task.depends_on.is_empty());
    }

    #[test]
    fn test_subtask_is_ready_with_deps() {
        let task = SubTask::new("t-2", "Write", Specialty::ContentWriter, 4.0)
            .with_dependencies(vec!["t-1".into()]);
        assert!(!task.is_ready(&HashSet::new()));
        let done: HashSet<String> = ["t-1".to_string()].into_iter().collect();
        assert!(task.is_ready(&done));
    }

    #[test]
    fn test_subtask_not_ready_when_running() {
        let mut task = SubTask::new("t-3", "Check", Specialty::FactChecker, 2.0);
        task.transition(TaskStatus::InProgress).unwrap();
        assert!(!task.is_ready(&HashSet::new()));
        assert!(task.started_at.is_some());
    }

    #[test]
    fn test_forward_transitions() {
        let mut task = SubTask::new("t-4", "Design", Specialty::Designer, 6.0);
        task.transition(TaskStatus::Ready).unwrap();
        task.transition(TaskStatus::InProgress).unwrap();
        task.transition(TaskStatus::Completed).unwrap();
        assert!(task.completed_at.is_some());
        assert!(task.transition(TaskStatus::InProgress).is_err());
    }

    #[test]
    fn test_reassignment_reentry() {
        let mut task = SubTask::new("t-5", "Research", Specialty::ResearchAnalyst, 4.0);
        task.transition(TaskStatus::InProgress).unwrap();
        task.transition(TaskStatus::Pending).unwrap();
        assert!(task.started_at.is_none());
        task.transition(TaskStatus::Ready).unwrap();
        task.transition(TaskStatus::Pending).unwrap();
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(TaskStatus::Pending));
            assert!(!terminal.can_transition_to(TaskStatus::InProgress));
        }
    }

    #[test]
    fn test_task_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let parsed: TaskStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TaskStatus::InProgress);
    }
}
