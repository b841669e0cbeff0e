//! Core types and error definitions for the Conductor workspace.
//!
//! This crate provides the foundational types shared by the planner, the
//! communication bus, the agent hierarchy and the workflow executor.
//!
//! # Main types
//!
//! - [`ConductorError`] — Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`] — Convenience alias for `Result<T, ConductorError>`.
//! - [`RiskLevel`] — Risk tier attached to plans and approval requests.
//! - [`ApprovalChannel`] — Gate through which high-risk plans are approved.
//! - [`HookChain`] — Fan-out of terminal events and escalations to external sinks.

/// Approval types for plans that require sign-off before execution.
pub mod approval;
/// Notification hooks and escalation sinks.
pub mod hooks;

pub use approval::{ApprovalChannel, ApprovalDecision, ApprovalRequest, RiskLevel};
pub use hooks::{
    Escalation, EscalationKind, EscalationSink, HookChain, NotificationHook, TerminalEvent,
    TerminalSubject,
};

// --- Error types ---

/// Top-level error type for the Conductor workspace.
///
/// The first five variants are the scheduling taxonomy: what the caller sees
/// when planning, staffing or delivery cannot proceed.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    /// Malformed input (empty request, unknown message type). Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A pool or capacity limit was reached. May succeed at escalated urgency.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A task or message exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// An agent failed health or availability checks.
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    /// A required specialty could not be staffed even after retry.
    #[error("Staffing error: {0}")]
    Staffing(String),

    /// A referenced workflow, execution, agent or message does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error raised by the communication bus.
    #[error("Bus error: {0}")]
    Bus(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConductorError {
    /// Whether retrying the failed operation (possibly elsewhere) can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConductorError::ResourceExhausted(_)
                | ConductorError::Timeout(_)
                | ConductorError::AgentUnavailable(_)
        )
    }
}

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ConductorError::Timeout("task".into()).is_retryable());
        assert!(ConductorError::ResourceExhausted("pool".into()).is_retryable());
        assert!(ConductorError::AgentUnavailable("a-1".into()).is_retryable());
        assert!(!ConductorError::Validation("empty".into()).is_retryable());
        assert!(!ConductorError::Staffing("fact_checker".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = ConductorError::Staffing("no fact_checker".into());
        assert_eq!(err.to_string(), "Staffing error: no fact_checker");
    }
}
