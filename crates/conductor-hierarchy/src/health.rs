use crate::manager::{HierarchyManager, HierarchyState};
use crate::types::{AgentInstance, AgentStatus};
use chrono::{DateTime, Duration, Utc};
use conductor_bus::{MessagePriority, MessageType};
use conductor_core::{Escalation, EscalationKind};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Sender id used for messages raised by the health monitor.
pub const HEALTH_MONITOR_ID: &str = "health-monitor";

const MAX_TIMEOUT_SECS: u64 = 365 * 24 * 3600;

/// A task moved off a failed agent.
#[derive(Debug, Clone, Serialize)]
pub struct Redistribution {
    pub task_id: String,
    pub from: String,
    pub to: String,
}

/// Result of one health-check pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub checked: usize,
    pub failed_agents: Vec<String>,
    pub redistributed: Vec<Redistribution>,
    pub replacements: Vec<String>,
    /// Tasks that could not be placed on any agent.
    pub unplaced: Vec<String>,
}

struct FailureNotice {
    agent_id: String,
    supervisor_id: Option<String>,
    reason: &'static str,
    tasks: usize,
}

impl HierarchyManager {
    /// Spawn the periodic health check. Calling twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.monitor.lock();
        if slot.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        let period = std::time::Duration::from_secs(self.config.health_check_interval_secs);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = manager.run_health_check(Utc::now()).await;
                if !report.failed_agents.is_empty() {
                    info!(
                        failed = report.failed_agents.len(),
                        redistributed = report.redistributed.len(),
                        unplaced = report.unplaced.len(),
                        "Health check handled failures"
                    );
                }
            }
        }));
        info!(
            interval_secs = self.config.health_check_interval_secs,
            "Health monitor started"
        );
    }

    /// Abort the health monitor.
    pub fn stop(&self) {
        if let Some(handle) = self.monitor.lock().take() {
            handle.abort();
            info!("Health monitor stopped");
        }
    }

    /// Heartbeats are only expected from agents that are running a task;
    /// slots reserved for tasks that have not started do not count.
    fn failure_reason(
        &self,
        agent: &AgentInstance,
        working: bool,
        now: DateTime<Utc>,
    ) -> Option<&'static str> {
        if agent.status == AgentStatus::Failed {
            return Some("reported failed");
        }
        if agent.metrics.consecutive_failures >= self.config.max_consecutive_failures {
            return Some("failure budget exhausted");
        }
        let timeout_secs = self.config.heartbeat_timeout_secs.min(MAX_TIMEOUT_SECS);
        let timeout = Duration::seconds(i64::try_from(timeout_secs).unwrap_or(0));
        if working && now - agent.last_heartbeat > timeout {
            return Some("heartbeat timeout");
        }
        None
    }

    /// Detect failed agents and recover their work.
    ///
    /// In-flight tasks are spread round-robin over healthy agents of the same
    /// specialty, spawning a replacement when none exist. Failed specialists
    /// are removed; executive and management agents are only marked offline.
    pub async fn run_health_check(&self, now: DateTime<Utc>) -> HealthReport {
        let mut report = HealthReport::default();
        let mut notices = Vec::new();

        {
            let mut state = self.state.write().await;
            report.checked = state.agents.len();
            let working = state.working_agents();

            let mut failing: Vec<(String, &'static str)> = state
                .agents
                .values()
                .filter(|a| !matches!(a.status, AgentStatus::Offline | AgentStatus::Maintenance))
                .filter_map(|a| {
                    self.failure_reason(a, working.contains(&a.id), now)
                        .map(|r| (a.id.clone(), r))
                })
                .collect();
            failing.sort();

            for (agent_id, reason) in failing {
                if let Some(notice) =
                    self.recover_agent(&mut state, &agent_id, reason, &mut report)
                {
                    notices.push(notice);
                }
            }
        }

        for notice in notices {
            self.escalate_failure(&notice, now).await;
        }
        for moved in &report.redistributed {
            if let Err(e) = self.bus.send(
                HEALTH_MONITOR_ID,
                &moved.to,
                MessageType::TaskAssignment,
                json!({ "task_id": moved.task_id, "reassigned_from": moved.from }),
                MessagePriority::High,
                false,
            ) {
                warn!(task_id = %moved.task_id, error = %e, "Failed to announce redistribution");
            }
        }
        report
    }

    fn recover_agent(
        &self,
        state: &mut HierarchyState,
        agent_id: &str,
        reason: &'static str,
        report: &mut HealthReport,
    ) -> Option<FailureNotice> {
        let agent = state.agents.get_mut(agent_id)?;
        agent.status = AgentStatus::Failed;
        let tasks = std::mem::take(&mut agent.current_tasks);
        let specialty = agent.specialty;
        let singleton = agent.layer.is_singleton();
        let supervisor_id = agent.supervisor_id.clone();

        warn!(agent_id, reason, tasks = tasks.len(), "Agent failed health check");
        report.failed_agents.push(agent_id.to_string());

        if let Some(specialty) = specialty.filter(|_| !tasks.is_empty()) {
            let mut targets: Vec<String> = state
                .agents
                .values()
                .filter(|a| a.id != agent_id && a.specialty == Some(specialty) && a.can_accept())
                .map(|a| a.id.clone())
                .collect();
            targets.sort();

            if targets.is_empty() {
                match self.spawn_locked(state, specialty) {
                    Ok(id) => {
                        report.replacements.push(id.clone());
                        targets.push(id);
                    }
                    Err(e) => error!(agent_id, error = %e, "No replacement could be spawned"),
                }
            }

            let mut cursor = 0;
            for task_id in &tasks {
                let mut placed = None;
                for offset in 0..targets.len() {
                    let candidate = &targets[(cursor + offset) % targets.len()];
                    if let Some(target) = state.agents.get_mut(candidate) {
                        if target.can_accept() && target.assign(task_id).is_ok() {
                            placed = Some(candidate.clone());
                            cursor = (cursor + offset + 1) % targets.len();
                            break;
                        }
                    }
                }
                state.retarget(task_id, agent_id, placed.as_deref());
                match placed {
                    Some(to) => report.redistributed.push(Redistribution {
                        task_id: task_id.clone(),
                        from: agent_id.to_string(),
                        to,
                    }),
                    None => report.unplaced.push(task_id.clone()),
                }
            }
        }

        if singleton {
            if let Some(agent) = state.agents.get_mut(agent_id) {
                agent.status = AgentStatus::Offline;
            }
        } else {
            state.agents.remove(agent_id);
            self.drop_mailbox(agent_id);
            info!(agent_id, "Failed specialist removed");
        }

        Some(FailureNotice {
            agent_id: agent_id.to_string(),
            supervisor_id,
            reason,
            tasks: tasks.len(),
        })
    }

    async fn escalate_failure(&self, notice: &FailureNotice, now: DateTime<Utc>) {
        let mut actions = vec![format!(
            "investigate agent {} ({})",
            notice.agent_id, notice.reason
        )];
        if notice.tasks > 0 {
            actions.push(format!("verify {} redistributed task(s)", notice.tasks));
        }
        if notice.supervisor_id.is_none() || notice.agent_id == crate::manager::EXECUTIVE_ID {
            actions.push("restore executive agent manually".to_string());
        }
        self.hooks
            .escalate(Escalation {
                kind: EscalationKind::AgentFailureBudget,
                execution_id: None,
                agent_id: Some(notice.agent_id.clone()),
                elapsed_secs: None,
                recommended_actions: actions,
                timestamp: now,
            })
            .await;

        if let Some(supervisor) = &notice.supervisor_id {
            if let Err(e) = self.bus.send(
                HEALTH_MONITOR_ID,
                supervisor,
                MessageType::Escalation,
                json!({
                    "agent_id": notice.agent_id,
                    "reason": notice.reason,
                    "tasks": notice.tasks,
                }),
                MessagePriority::Urgent,
                false,
            ) {
                warn!(agent_id = %notice.agent_id, error = %e, "Failed to notify supervisor");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::HierarchyConfig;
    use crate::manager::EXECUTIVE_ID;
    use conductor_bus::{BusConfig, CommunicationBus};
    use conductor_core::HookChain;

    #[tokio::test]
    async fn test_idle_agents_without_heartbeat_stay_healthy() {
        let bus = Arc::new(CommunicationBus::new(BusConfig::default()).unwrap());
        let m = HierarchyManager::new(HierarchyConfig::default(), bus, HookChain::new()).unwrap();
        let report = m.run_health_check(Utc::now() + Duration::hours(2)).await;
        assert!(report.failed_agents.is_empty());
        assert_eq!(report.checked, 6);
    }

    #[tokio::test]
    async fn test_failed_executive_goes_offline() {
        let bus = Arc::new(CommunicationBus::new(BusConfig::default()).unwrap());
        let m = HierarchyManager::new(HierarchyConfig::default(), bus, HookChain::new()).unwrap();
        m.report_status(EXECUTIVE_ID, AgentStatus::Failed).await.unwrap();
        let report = m.run_health_check(Utc::now()).await;
        assert_eq!(report.failed_agents, vec![EXECUTIVE_ID.to_string()]);
        let exec = m.agent(EXECUTIVE_ID).await.unwrap();
        assert_eq!(exec.status, AgentStatus::Offline);

        // offline agents are not re-processed
        let again = m.run_health_check(Utc::now()).await;
        assert!(again.failed_agents.is_empty());
    }
}
