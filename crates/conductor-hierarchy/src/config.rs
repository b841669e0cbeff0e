use conductor_core::{ConductorError, ConductorResult};
use conductor_planner::SpecialtyGroup;
use serde::{Deserialize, Serialize};

/// Maximum specialists per group pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSizes {
    #[serde(default = "default_research_pool")]
    pub research: usize,
    #[serde(default = "default_analysis_pool")]
    pub analysis: usize,
    #[serde(default = "default_creative_pool")]
    pub creative: usize,
    #[serde(default = "default_quality_pool")]
    pub quality: usize,
    #[serde(default = "default_delivery_pool")]
    pub delivery: usize,
}

fn default_research_pool() -> usize {
    10
}
fn default_analysis_pool() -> usize {
    8
}
fn default_creative_pool() -> usize {
    6
}
fn default_quality_pool() -> usize {
    5
}
fn default_delivery_pool() -> usize {
    3
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            research: default_research_pool(),
            analysis: default_analysis_pool(),
            creative: default_creative_pool(),
            quality: default_quality_pool(),
            delivery: default_delivery_pool(),
        }
    }
}

impl PoolSizes {
    pub fn max_for(&self, group: SpecialtyGroup) -> usize {
        match group {
            SpecialtyGroup::Research => self.research,
            SpecialtyGroup::Analysis => self.analysis,
            SpecialtyGroup::Creative => self.creative,
            SpecialtyGroup::Quality => self.quality,
            SpecialtyGroup::Delivery => self.delivery,
        }
    }
}

/// Settings for [`crate::HierarchyManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyConfig {
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    /// Busy agents silent for longer than this are considered failed.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_unhealthy_ratio")]
    pub unhealthy_ratio_threshold: f64,
    /// Tasks running longer than `estimate * overdue_factor` are flagged.
    #[serde(default = "default_overdue_factor")]
    pub overdue_factor: f64,
    /// Concurrent tasks per specialist.
    #[serde(default = "default_capacity")]
    pub default_capacity: usize,
    /// Smoothing factor for completion-time and quality averages.
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,
    #[serde(default)]
    pub pool_sizes: PoolSizes,
}

fn default_health_interval() -> u64 {
    60
}
fn default_heartbeat_timeout() -> u64 {
    300
}
fn default_max_failures() -> u32 {
    3
}
fn default_unhealthy_ratio() -> f64 {
    0.2
}
fn default_overdue_factor() -> f64 {
    1.5
}
fn default_capacity() -> usize {
    3
}
fn default_ema_alpha() -> f64 {
    0.3
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            max_consecutive_failures: default_max_failures(),
            unhealthy_ratio_threshold: default_unhealthy_ratio(),
            overdue_factor: default_overdue_factor(),
            default_capacity: default_capacity(),
            ema_alpha: default_ema_alpha(),
            pool_sizes: PoolSizes::default(),
        }
    }
}

impl HierarchyConfig {
    pub fn validate(&self) -> ConductorResult<()> {
        if self.default_capacity == 0 {
            return Err(ConductorError::Config(
                "default_capacity must be at least 1".into(),
            ));
        }
        if self.health_check_interval_secs == 0 {
            return Err(ConductorError::Config(
                "health_check_interval_secs must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.unhealthy_ratio_threshold) {
            return Err(ConductorError::Config(
                "unhealthy_ratio_threshold must be within [0, 1]".into(),
            ));
        }
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(ConductorError::Config("ema_alpha must be within (0, 1]".into()));
        }
        if self.overdue_factor < 1.0 {
            return Err(ConductorError::Config(
                "overdue_factor must be at least 1.0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HierarchyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_sizes.max_for(SpecialtyGroup::Research), 10);
        assert_eq!(config.pool_sizes.max_for(SpecialtyGroup::Delivery), 3);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = HierarchyConfig {
            default_capacity: 0,
            ..HierarchyConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
