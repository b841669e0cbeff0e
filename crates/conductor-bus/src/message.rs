use chrono::{DateTime, Duration, Utc};
use conductor_core::ConductorError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Upper bound on any timeout or expiry (one year).
const MAX_TIMEOUT_SECS: u64 = 365 * 24 * 3600;

/// Closed set of message kinds exchanged between agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Task lifecycle
    TaskAssignment,
    TaskUpdate,
    TaskCompletion,
    TaskFailure,
    // Information sharing
    InformationShare,
    DataRequest,
    // Help / assistance
    HelpRequest,
    AssistanceOffer,
    // Quality assurance
    QualityReview,
    QualityFeedback,
    // Management
    ManagementDirective,
    StatusReport,
    Escalation,
    // Infrastructure
    System,
    Error,
    Acknowledgment,
}

impl MessageType {
    pub const ALL: [MessageType; 16] = [
        MessageType::TaskAssignment,
        MessageType::TaskUpdate,
        MessageType::TaskCompletion,
        MessageType::TaskFailure,
        MessageType::InformationShare,
        MessageType::DataRequest,
        MessageType::HelpRequest,
        MessageType::AssistanceOffer,
        MessageType::QualityReview,
        MessageType::QualityFeedback,
        MessageType::ManagementDirective,
        MessageType::StatusReport,
        MessageType::Escalation,
        MessageType::System,
        MessageType::Error,
        MessageType::Acknowledgment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::TaskAssignment => "task_assignment",
            MessageType::TaskUpdate => "task_update",
            MessageType::TaskCompletion => "task_completion",
            MessageType::TaskFailure => "task_failure",
            MessageType::InformationShare => "information_share",
            MessageType::DataRequest => "data_request",
            MessageType::HelpRequest => "help_request",
            MessageType::AssistanceOffer => "assistance_offer",
            MessageType::QualityReview => "quality_review",
            MessageType::QualityFeedback => "quality_feedback",
            MessageType::ManagementDirective => "management_directive",
            MessageType::StatusReport => "status_report",
            MessageType::Escalation => "escalation",
            MessageType::System => "system",
            MessageType::Error => "error",
            MessageType::Acknowledgment => "acknowledgment",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ConductorError::Validation(format!("unknown message type '{s}'")))
    }
}

/// Message priority; determines the response timeout and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
    Critical,
}

impl MessagePriority {
    /// How long a sender waits for a response, in seconds.
    pub fn response_timeout_secs(self) -> u64 {
        match self {
            MessagePriority::Low => 600,
            MessagePriority::Normal => 300,
            MessagePriority::High => 120,
            MessagePriority::Urgent => 60,
            MessagePriority::Critical => 30,
        }
    }

    /// Whether undelivered messages of this priority expire.
    pub fn expires(self) -> bool {
        matches!(
            self,
            MessagePriority::High | MessagePriority::Urgent | MessagePriority::Critical
        )
    }
}

impl std::fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessagePriority::Low => "low",
            MessagePriority::Normal => "normal",
            MessagePriority::High => "high",
            MessagePriority::Urgent => "urgent",
            MessagePriority::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A message owned by the bus until it is delivered or dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub message_type: MessageType,
    pub priority: MessagePriority,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_attempts: u32,
    #[serde(default)]
    pub requires_response: bool,
    #[serde(default)]
    pub response_timeout_secs: Option<u64>,
    /// Id of the message this one answers.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Topic for broadcast fan-out copies.
    #[serde(default)]
    pub topic: Option<String>,
    /// Set on responses that arrived after the request timed out.
    #[serde(default)]
    pub late: bool,
}

impl AgentMessage {
    pub fn new(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        message_type: MessageType,
        payload: serde_json::Value,
        priority: MessagePriority,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            message_type,
            priority,
            payload,
            created_at: Utc::now(),
            expires_at: None,
            delivery_attempts: 0,
            requires_response: false,
            response_timeout_secs: None,
            correlation_id: None,
            topic: None,
            late: false,
        }
    }

    /// Mark as requiring a response within the priority's timeout.
    pub fn expecting_response(mut self) -> Self {
        self.requires_response = true;
        self.response_timeout_secs = Some(self.priority.response_timeout_secs());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Effective response timeout.
    pub fn response_timeout(&self) -> Duration {
        let secs = self
            .response_timeout_secs
            .unwrap_or_else(|| self.priority.response_timeout_secs());
        secs_to_duration(secs)
    }
}

/// Convert whole seconds to a chrono duration, capped at one year.
pub(crate) fn secs_to_duration(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs.min(MAX_TIMEOUT_SECS)).unwrap_or(0))
}
