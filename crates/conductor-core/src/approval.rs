//! Approval types for plans that must be signed off before they run.
//!
//! These types live in `conductor-core` so that the planner (which computes the
//! risk tier) and the executor (which blocks on the decision) share them
//! without depending on each other.

use crate::ConductorResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Risk tier of a plan or an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Routine work, no sign-off needed.
    Low,
    /// Sign-off only when a cost or duration threshold is crossed.
    Medium,
    /// Always needs sign-off.
    High,
    /// Always needs sign-off; reviewers should treat it as urgent.
    Critical,
}

impl RiskLevel {
    /// High and critical plans always need approval.
    pub fn requires_approval(self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

/// A request sent to a human or management-layer reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub workflow_id: String,
    pub description: String,
    pub risk_level: RiskLevel,
    pub estimated_cost: f64,
    pub estimated_hours: f64,
    /// Why the plan was flagged (threshold exceeded, investigation tier, ...).
    pub reasons: Vec<String>,
}

/// The decision made by a reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub reason: Option<String>,
    pub reviewer: String,
}

impl ApprovalDecision {
    pub fn approve(reviewer: impl Into<String>) -> Self {
        Self {
            approved: true,
            reason: None,
            reviewer: reviewer.into(),
        }
    }

    pub fn reject(reviewer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
            reviewer: reviewer.into(),
        }
    }
}

/// Channel through which approval requests are sent and decisions are received.
/// Implementations can be CLI prompts, WebSocket handlers, ticketing bots, etc.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn request_approval(&self, request: ApprovalRequest)
        -> ConductorResult<ApprovalDecision>;
}
