use crate::specialty::Specialty;
use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};

/// Tunables for [`crate::TaskDecomposer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Plans with more sub-tasks are truncated (with a warning).
    #[serde(default = "default_max_subtasks")]
    pub max_subtasks: usize,
    /// Injected when no task pattern matches the request.
    #[serde(default = "default_specialty")]
    pub default_specialty: Specialty,
    #[serde(default = "default_priority")]
    pub default_priority: u8,
    #[serde(default = "default_approval_cost")]
    pub approval_cost_threshold: f64,
    #[serde(default = "default_approval_hours")]
    pub approval_hours_threshold: f64,
    #[serde(default = "default_gate_threshold")]
    pub quality_gate_threshold: f64,
    /// Threshold for the quality-assurance phase gate.
    #[serde(default = "default_qa_gate_threshold")]
    pub qa_gate_threshold: f64,
}

fn default_max_subtasks() -> usize {
    20
}
fn default_specialty() -> Specialty {
    Specialty::ResearchAnalyst
}
fn default_priority() -> u8 {
    5
}
fn default_approval_cost() -> f64 {
    5_000.0
}
fn default_approval_hours() -> f64 {
    40.0
}
fn default_gate_threshold() -> f64 {
    0.80
}
fn default_qa_gate_threshold() -> f64 {
    0.85
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_subtasks: default_max_subtasks(),
            default_specialty: default_specialty(),
            default_priority: default_priority(),
            approval_cost_threshold: default_approval_cost(),
            approval_hours_threshold: default_approval_hours(),
            quality_gate_threshold: default_gate_threshold(),
            qa_gate_threshold: default_qa_gate_threshold(),
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> ConductorResult<()> {
        if self.max_subtasks == 0 {
            return Err(ConductorError::Config("max_subtasks must be at least 1".into()));
        }
        if !(1..=10).contains(&self.default_priority) {
            return Err(ConductorError::Config(format!(
                "default_priority must be within 1..=10, got {}",
                self.default_priority
            )));
        }
        for (name, value) in [
            ("quality_gate_threshold", self.quality_gate_threshold),
            ("qa_gate_threshold", self.qa_gate_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConductorError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.approval_cost_threshold <= 0.0 || self.approval_hours_threshold <= 0.0 {
            return Err(ConductorError::Config(
                "approval thresholds must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(PlannerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: PlannerConfig =
            serde_json::from_str(r#"{"max_subtasks": 8, "default_specialty": "data_analyst"}"#)
                .unwrap();
        assert_eq!(config.max_subtasks, 8);
        assert_eq!(config.default_specialty, Specialty::DataAnalyst);
        assert_eq!(config.default_priority, 5);
    }

    #[test]
    fn test_invalid_priority() {
        let config = PlannerConfig {
            default_priority: 11,
            ..PlannerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
