//! Outbound notifications for terminal task and workflow events, and
//! escalations for a human or management-layer consumer.
//!
//! Sinks are registered on a [`HookChain`]; an empty chain is a no-op.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a terminal event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TerminalSubject {
    Task(String),
    Workflow(String),
}

/// A task or workflow reached a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalEvent {
    pub subject: TerminalSubject,
    pub execution_id: String,
    pub success: bool,
    /// Free-form numeric metrics (duration, quality, success ratio, ...).
    pub metrics: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Why an escalation was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    /// An execution ran past the long-running threshold.
    LongRunningExecution,
    /// An agent exhausted its consecutive-failure budget.
    AgentFailureBudget,
}

/// Structured payload for a human or management-layer consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub kind: EscalationKind,
    pub execution_id: Option<String>,
    pub agent_id: Option<String>,
    pub elapsed_secs: Option<u64>,
    pub recommended_actions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Receives completion and failure events for tasks and workflows.
#[async_trait]
pub trait NotificationHook: Send + Sync {
    async fn on_terminal(&self, event: &TerminalEvent);
}

/// Receives escalations that need attention outside the core.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn escalate(&self, escalation: &Escalation);
}

/// Composite hook that dispatches events to every registered hook and sink.
///
/// An empty chain is the default and behaves as a no-op.
#[derive(Clone, Default)]
pub struct HookChain {
    notifications: Vec<Arc<dyn NotificationHook>>,
    escalations: Vec<Arc<dyn EscalationSink>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a notification hook to the chain.
    pub fn add_notification(&mut self, hook: Arc<dyn NotificationHook>) {
        self.notifications.push(hook);
    }

    /// Add an escalation sink to the chain.
    pub fn add_escalation(&mut self, sink: Arc<dyn EscalationSink>) {
        self.escalations.push(sink);
    }

    /// Emit a terminal event to all notification hooks.
    pub async fn notify(&self, event: TerminalEvent) {
        for hook in &self.notifications {
            hook.on_terminal(&event).await;
        }
    }

    /// Emit an escalation to all sinks. Always logged, even with no sinks.
    pub async fn escalate(&self, escalation: Escalation) {
        tracing::warn!(
            kind = ?escalation.kind,
            execution_id = ?escalation.execution_id,
            agent_id = ?escalation.agent_id,
            "escalation raised"
        );
        for sink in &self.escalations {
            sink.escalate(&escalation).await;
        }
    }

    /// Number of registered hooks and sinks.
    pub fn hook_count(&self) -> usize {
        self.notifications.len() + self.escalations.len()
    }
}

impl std::fmt::Debug for HookChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookChain")
            .field("notifications", &self.notifications.len())
            .field("escalations", &self.escalations.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl NotificationHook for Counter {
        async fn on_terminal(&self, _event: &TerminalEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EscalationSink for Counter {
        async fn escalate(&self, _escalation: &Escalation) {
            self.0.fetch_add(10, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_chain_dispatches_to_all() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let mut chain = HookChain::new();
        chain.add_notification(counter.clone());
        chain.add_notification(counter.clone());
        chain.add_escalation(counter.clone());
        assert_eq!(chain.hook_count(), 3);

        chain
            .notify(TerminalEvent {
                subject: TerminalSubject::Workflow("wf-1".into()),
                execution_id: "ex-1".into(),
                success: true,
                metrics: serde_json::json!({}),
                timestamp: Utc::now(),
            })
            .await;
        chain
            .escalate(Escalation {
                kind: EscalationKind::LongRunningExecution,
                execution_id: Some("ex-1".into()),
                agent_id: None,
                elapsed_secs: Some(30_000),
                recommended_actions: vec![],
                timestamp: Utc::now(),
            })
            .await;

        assert_eq!(counter.0.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_empty_chain_is_noop() {
        let chain = HookChain::default();
        chain
            .notify(TerminalEvent {
                subject: TerminalSubject::Task("t-1".into()),
                execution_id: "ex-1".into(),
                success: false,
                metrics: serde_json::Value::Null,
                timestamp: Utc::now(),
            })
            .await;
        assert_eq!(chain.hook_count(), 0);
    }

    #[test]
    fn test_subject_serialization() {
        let json = serde_json::to_string(&TerminalSubject::Task("t-9".into())).unwrap();
        assert_eq!(json, r#"{"kind":"task","id":"t-9"}"#);
    }
}
