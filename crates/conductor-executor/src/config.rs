use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a failed quality gate does to the rest of the workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityGatePolicy {
    /// Log the failure and carry on with the next phase.
    #[default]
    Advisory,
    /// Stop scheduling further phases; remaining tasks end up blocked.
    Blocking,
}

/// Configuration for the workflow executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Extra attempts a failed task gets, each on a reassigned agent.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Ceiling on how long the scheduler waits before re-evaluating progress.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_min_task_timeout_secs")]
    pub min_task_timeout_secs: u64,
    #[serde(default = "default_max_task_timeout_secs")]
    pub max_task_timeout_secs: u64,
    /// Completed / total ratio at or above which the workflow succeeds.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,
    /// Minimum quality signal for a task's success criteria to pass.
    #[serde(default = "default_criteria_threshold")]
    pub criteria_threshold: f64,
    /// Elapsed time after which a running execution is escalated.
    #[serde(default = "default_long_running_secs")]
    pub long_running_secs: u64,
    /// How long terminal executions are kept before being purged.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default)]
    pub quality_gate_policy: QualityGatePolicy,
}

fn default_max_retries() -> u32 {
    2
}
fn default_poll_interval_secs() -> u64 {
    30
}
fn default_min_task_timeout_secs() -> u64 {
    300
}
fn default_max_task_timeout_secs() -> u64 {
    8 * 3600
}
fn default_success_threshold() -> f64 {
    0.90
}
fn default_criteria_threshold() -> f64 {
    0.80
}
fn default_long_running_secs() -> u64 {
    8 * 3600
}
fn default_retention_secs() -> u64 {
    3600
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            poll_interval_secs: default_poll_interval_secs(),
            min_task_timeout_secs: default_min_task_timeout_secs(),
            max_task_timeout_secs: default_max_task_timeout_secs(),
            success_threshold: default_success_threshold(),
            criteria_threshold: default_criteria_threshold(),
            long_running_secs: default_long_running_secs(),
            retention_secs: default_retention_secs(),
            quality_gate_policy: QualityGatePolicy::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> ConductorResult<()> {
        if self.poll_interval_secs == 0 {
            return Err(ConductorError::Config(
                "executor.poll_interval_secs must be positive".into(),
            ));
        }
        if self.min_task_timeout_secs == 0
            || self.min_task_timeout_secs > self.max_task_timeout_secs
        {
            return Err(ConductorError::Config(format!(
                "executor task timeout bounds are invalid: [{}, {}]",
                self.min_task_timeout_secs, self.max_task_timeout_secs
            )));
        }
        for (name, value) in [
            ("success_threshold", self.success_threshold),
            ("criteria_threshold", self.criteria_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConductorError::Config(format!(
                    "executor.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Twice the estimate, clamped to the configured bounds.
    pub fn task_timeout(&self, estimated_hours: f64) -> Duration {
        let doubled = (estimated_hours.max(0.0) * 2.0 * 3600.0).round();
        let secs = if doubled.is_finite() && doubled < u64::MAX as f64 {
            doubled as u64
        } else {
            self.max_task_timeout_secs
        };
        Duration::from_secs(secs.clamp(self.min_task_timeout_secs, self.max_task_timeout_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_task_timeout_is_clamped() {
        let config = ExecutorConfig::default();
        assert_eq!(config.task_timeout(0.01), Duration::from_secs(300));
        assert_eq!(config.task_timeout(1.5), Duration::from_secs(3 * 3600));
        assert_eq!(config.task_timeout(10.0), Duration::from_secs(8 * 3600));
        assert_eq!(config.task_timeout(f64::INFINITY), Duration::from_secs(8 * 3600));
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        let config = ExecutorConfig {
            min_task_timeout_secs: 600,
            max_task_timeout_secs: 300,
            ..ExecutorConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ExecutorConfig {
            success_threshold: 1.5,
            ..ExecutorConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(ExecutorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_policy_parses_lowercase() {
        let config: ExecutorConfig =
            serde_json::from_str(r#"{"quality_gate_policy": "blocking"}"#).unwrap();
        assert_eq!(config.quality_gate_policy, QualityGatePolicy::Blocking);
        assert_eq!(config.max_retries, 2);
    }
}
