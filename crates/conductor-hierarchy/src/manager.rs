use crate::config::HierarchyConfig;
use crate::types::{AgentInstance, AgentLayer, AgentRole, AgentStatus, Urgency};
use chrono::{DateTime, Utc};
use conductor_bus::{AgentMessage, CommunicationBus, MessagePriority, MessageType};
use conductor_core::{ConductorError, ConductorResult, HookChain};
use conductor_planner::{Phase, Specialty, SpecialtyGroup, TaskStatus, WorkflowPlan};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Id of the single executive agent.
pub const EXECUTIVE_ID: &str = "executive-director";

/// Topic every management agent subscribes to.
pub const MANAGEMENT_TOPIC: &str = "management";

/// Id of the management agent responsible for a specialist group.
pub fn manager_id(group: SpecialtyGroup) -> String {
    format!("manager-{group}")
}

/// Weighted placement score: lower load, higher quality, higher success
/// rate and faster average completion all rank an agent higher.
pub fn score_agent(agent: &AgentInstance) -> f64 {
    let m = &agent.metrics;
    0.30 * (1.0 - agent.load())
        + 0.30 * m.quality_score
        + 0.25 * m.success_rate
        + 0.15 * (1.0 / (1.0 + m.avg_completion_hours.max(0.0)))
}

/// Outcome of one task attempt, fed back into the agent's metrics.
#[derive(Debug, Clone, Copy)]
pub struct TaskOutcome {
    pub success: bool,
    pub duration_hours: f64,
    pub quality_score: Option<f64>,
}

/// Per-workflow view of which agent holds which task.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct TrackedTask {
    pub(crate) task_id: String,
    pub(crate) specialty: Specialty,
    pub(crate) phase: Phase,
    pub(crate) estimated_hours: f64,
    pub(crate) agent_id: Option<String>,
    pub(crate) status: TaskStatus,
    pub(crate) started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub(crate) struct WorkflowTracking {
    pub(crate) phases: Vec<Phase>,
    pub(crate) tasks: Vec<TrackedTask>,
    pub(crate) finished: bool,
}

impl WorkflowTracking {
    pub(crate) fn task_mut(&mut self, task_id: &str) -> Option<&mut TrackedTask> {
        self.tasks.iter_mut().find(|t| t.task_id == task_id)
    }
}

/// Id-indexed arena of agents plus per-workflow tracking.
#[derive(Debug, Default)]
pub(crate) struct HierarchyState {
    pub(crate) agents: HashMap<String, AgentInstance>,
    pub(crate) workflows: HashMap<String, WorkflowTracking>,
}

impl HierarchyState {
    /// Live specialists in a group's pool. Failed agents awaiting removal
    /// do not count against the cap.
    pub(crate) fn pool_size(&self, group: SpecialtyGroup) -> usize {
        self.agents
            .values()
            .filter(|a| {
                !a.layer.is_singleton() && a.group == Some(group) && a.status != AgentStatus::Failed
            })
            .count()
    }

    fn find_idle(&self, specialty: Specialty) -> Option<String> {
        let mut idle: Vec<&AgentInstance> = self
            .agents
            .values()
            .filter(|a| a.specialty == Some(specialty) && a.is_idle())
            .collect();
        idle.sort_by(|a, b| a.id.cmp(&b.id));
        idle.first().map(|a| a.id.clone())
    }

    /// Best-scoring healthy agent of the specialty with spare capacity.
    pub(crate) fn select_optimal(&self, specialty: Specialty, exclude: &[&str]) -> Option<String> {
        let mut best: Option<(&AgentInstance, f64)> = None;
        for agent in self.agents.values() {
            if agent.specialty != Some(specialty)
                || !agent.can_accept()
                || exclude.contains(&agent.id.as_str())
            {
                continue;
            }
            let score = score_agent(agent);
            let better = match best {
                None => true,
                // ties broken by id for determinism
                Some((current, s)) => score > s || (score == s && agent.id < current.id),
            };
            if better {
                best = Some((agent, score));
            }
        }
        best.map(|(a, _)| a.id.clone())
    }

    /// Agents currently running at least one tracked task.
    pub(crate) fn working_agents(&self) -> HashSet<String> {
        self.workflows
            .values()
            .flat_map(|w| w.tasks.iter())
            .filter(|t| t.status == TaskStatus::InProgress)
            .filter_map(|t| t.agent_id.clone())
            .collect()
    }

    /// Point every tracked copy of `task_id` held by `from` at `to`.
    pub(crate) fn retarget(&mut self, task_id: &str, from: &str, to: Option<&str>) {
        for tracking in self.workflows.values_mut() {
            for task in tracking
                .tasks
                .iter_mut()
                .filter(|t| t.task_id == task_id && t.agent_id.as_deref() == Some(from))
            {
                task.agent_id = to.map(str::to_string);
            }
        }
    }
}

/// Layered pool of agents: one executive, one manager per specialist group,
/// and lazily created specialists in capped per-group pools.
pub struct HierarchyManager {
    pub(crate) config: HierarchyConfig,
    pub(crate) bus: Arc<CommunicationBus>,
    pub(crate) hooks: HookChain,
    pub(crate) state: RwLock<HierarchyState>,
    pub(crate) monitor: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl HierarchyManager {
    /// Build the hierarchy with its executive and management singletons.
    pub fn new(
        config: HierarchyConfig,
        bus: Arc<CommunicationBus>,
        hooks: HookChain,
    ) -> ConductorResult<Self> {
        config.validate()?;

        let mut state = HierarchyState::default();

        let executive = AgentInstance::new(
            EXECUTIVE_ID,
            "Executive Director",
            AgentRole::Director,
            AgentLayer::Executive,
            0,
        );
        state.agents.insert(EXECUTIVE_ID.to_string(), executive);

        for group in SpecialtyGroup::ALL {
            let id = manager_id(group);
            let mut manager = AgentInstance::new(
                id.clone(),
                format!("{group} manager"),
                AgentRole::Manager,
                AgentLayer::Management,
                0,
            );
            manager.group = Some(group);
            manager.supervisor_id = Some(EXECUTIVE_ID.to_string());
            bus.subscribe(&id, MANAGEMENT_TOPIC);
            state.agents.insert(id, manager);
        }

        info!(
            agents = state.agents.len(),
            "Hierarchy booted with executive and management layers"
        );

        Ok(Self {
            config,
            bus,
            hooks,
            state: RwLock::new(state),
            monitor: parking_lot::Mutex::new(None),
        })
    }

    /// The configuration the hierarchy was built with.
    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    /// The bus agents are addressed on.
    pub fn bus(&self) -> &Arc<CommunicationBus> {
        &self.bus
    }

    /// Open a bus mailbox for an agent and hand it to the runtime that
    /// drives that agent.
    ///
    /// Agents get no mailbox until claimed, so messages for agents nobody
    /// reads exhaust their delivery attempts and land in the bus's bounded
    /// failed buffer. Claiming again replaces the previous mailbox.
    pub async fn claim_mailbox(
        &self,
        agent_id: &str,
    ) -> ConductorResult<mpsc::UnboundedReceiver<AgentMessage>> {
        if !self.state.read().await.agents.contains_key(agent_id) {
            return Err(ConductorError::NotFound(format!("agent {agent_id}")));
        }
        Ok(self.bus.register(agent_id))
    }

    /// Staff a specialty: an idle agent if one exists, else a new agent if
    /// the pool has room. At [`Urgency::High`] a partially loaded agent is
    /// also acceptable.
    pub async fn create_specialist(
        &self,
        specialty: Specialty,
        urgency: Urgency,
    ) -> ConductorResult<String> {
        let mut state = self.state.write().await;
        self.staff_locked(&mut state, specialty, urgency)
    }

    pub(crate) fn staff_locked(
        &self,
        state: &mut HierarchyState,
        specialty: Specialty,
        urgency: Urgency,
    ) -> ConductorResult<String> {
        if let Some(id) = state.find_idle(specialty) {
            return Ok(id);
        }
        if urgency == Urgency::High {
            if let Some(id) = state.select_optimal(specialty, &[]) {
                return Ok(id);
            }
        }
        self.spawn_locked(state, specialty)
    }

    /// Create a new specialist in its group pool, respecting the cap.
    pub(crate) fn spawn_locked(
        &self,
        state: &mut HierarchyState,
        specialty: Specialty,
    ) -> ConductorResult<String> {
        let group = specialty.group();
        let max = self.config.pool_sizes.max_for(group);
        if state.pool_size(group) >= max {
            return Err(ConductorError::ResourceExhausted(format!(
                "{group} pool is full ({max} agents), cannot add {specialty}"
            )));
        }

        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let id = format!("{specialty}-{suffix}");
        let layer = if group == SpecialtyGroup::Delivery {
            AgentLayer::Execution
        } else {
            AgentLayer::Specialist
        };
        let mut agent = AgentInstance::new(
            id.clone(),
            specialty.as_str().replace('_', " "),
            AgentRole::Worker,
            layer,
            self.config.default_capacity,
        );
        agent.specialty = Some(specialty);
        agent.group = Some(group);
        agent.supervisor_id = Some(manager_id(group));

        self.bus.subscribe(&id, group.as_str());
        state.agents.insert(id.clone(), agent);

        info!(agent_id = %id, specialty = %specialty, layer = %layer, "Specialist created");
        Ok(id)
    }

    /// Best available agent for a specialty, if any has spare capacity.
    pub async fn select_optimal_agent(&self, specialty: Specialty) -> Option<String> {
        self.state.read().await.select_optimal(specialty, &[])
    }

    /// Staff every sub-task of a plan. Returns the task → agent map.
    ///
    /// Each required specialty is pre-staged first; a specialty that cannot
    /// be staffed even at high urgency fails the whole assignment and any
    /// reservations already made are released.
    pub async fn assign_workflow(
        &self,
        plan: &WorkflowPlan,
    ) -> ConductorResult<HashMap<String, String>> {
        let mut state = self.state.write().await;
        if state.workflows.contains_key(&plan.id) {
            return Err(ConductorError::Validation(format!(
                "workflow {} is already staffed",
                plan.id
            )));
        }

        for &specialty in &plan.required_specialists {
            if self.staff_locked(&mut state, specialty, Urgency::Normal).is_err() {
                self.staff_locked(&mut state, specialty, Urgency::High)
                    .map_err(|e| {
                        ConductorError::Staffing(format!("cannot staff {specialty}: {e}"))
                    })?;
            }
        }

        let mut assignments: Vec<(String, String)> = Vec::with_capacity(plan.subtasks.len());
        let mut failure = None;
        for task in &plan.subtasks {
            let chosen = match state.select_optimal(task.specialty, &[]) {
                Some(id) => Ok(id),
                None => self.spawn_locked(&mut state, task.specialty),
            };
            let placed = chosen.and_then(|agent_id| {
                let agent = state.agents.get_mut(&agent_id).ok_or_else(|| {
                    ConductorError::NotFound(format!("agent {agent_id}"))
                })?;
                agent.assign(&task.id)?;
                Ok(agent_id)
            });
            match placed {
                Ok(agent_id) => assignments.push((task.id.clone(), agent_id)),
                Err(e) => {
                    failure = Some(ConductorError::Staffing(format!(
                        "cannot staff task {} ({}): {e}",
                        task.id, task.specialty
                    )));
                    break;
                }
            }
        }

        if let Some(err) = failure {
            for (task_id, agent_id) in &assignments {
                if let Some(agent) = state.agents.get_mut(agent_id) {
                    agent.release(task_id);
                }
            }
            warn!(workflow_id = %plan.id, error = %err, "Workflow staffing failed");
            return Err(err);
        }

        let map: HashMap<String, String> = assignments.iter().cloned().collect();
        let tasks = plan
            .subtasks
            .iter()
            .map(|t| TrackedTask {
                task_id: t.id.clone(),
                specialty: t.specialty,
                phase: t.parallel_group,
                estimated_hours: t.estimated_hours,
                agent_id: map.get(&t.id).cloned(),
                status: t.status,
                started_at: None,
            })
            .collect();
        state.workflows.insert(
            plan.id.clone(),
            WorkflowTracking {
                phases: plan.phases.clone(),
                tasks,
                finished: false,
            },
        );
        let agent_count = assignments
            .iter()
            .map(|(_, a)| a.as_str())
            .collect::<HashSet<_>>()
            .len();
        drop(state);

        for task in &plan.subtasks {
            if let Some(agent_id) = map.get(&task.id) {
                self.notify_assignment(&plan.id, &task.id, task.specialty, agent_id);
            }
        }
        info!(
            workflow_id = %plan.id,
            tasks = map.len(),
            agents = agent_count,
            "Workflow staffed"
        );
        Ok(map)
    }

    fn notify_assignment(
        &self,
        workflow_id: &str,
        task_id: &str,
        specialty: Specialty,
        agent_id: &str,
    ) {
        let sender = manager_id(specialty.group());
        if let Err(e) = self.bus.send(
            &sender,
            agent_id,
            MessageType::TaskAssignment,
            json!({ "workflow_id": workflow_id, "task_id": task_id }),
            MessagePriority::Normal,
            false,
        ) {
            warn!(task_id, agent_id, error = %e, "Failed to send task assignment");
        }
    }

    /// Move a task to a different healthy agent of the same specialty,
    /// creating one if the pool allows. Falls back to the current agent only
    /// when it is still healthy and nothing else is available.
    pub async fn reassign_task(&self, workflow_id: &str, task_id: &str) -> ConductorResult<String> {
        let mut state = self.state.write().await;
        let tracking = state
            .workflows
            .get(workflow_id)
            .ok_or_else(|| ConductorError::NotFound(format!("workflow {workflow_id}")))?;
        let tracked = tracking
            .tasks
            .iter()
            .find(|t| t.task_id == task_id)
            .ok_or_else(|| ConductorError::NotFound(format!("task {task_id}")))?;
        let specialty = tracked.specialty;
        let previous = tracked.agent_id.clone();

        if let Some(prev) = previous.as_deref() {
            if let Some(agent) = state.agents.get_mut(prev) {
                agent.release(task_id);
            }
        }

        let exclude: Vec<&str> = previous.as_deref().into_iter().collect();
        let candidate = match state.select_optimal(specialty, &exclude) {
            Some(id) => Some(id),
            None => match self.spawn_locked(&mut state, specialty) {
                Ok(id) => Some(id),
                Err(_) => previous
                    .clone()
                    .filter(|p| state.agents.get(p).is_some_and(|a| a.can_accept())),
            },
        };
        let Some(new_agent) = candidate else {
            if let Some(t) = state
                .workflows
                .get_mut(workflow_id)
                .and_then(|w| w.task_mut(task_id))
            {
                t.agent_id = None;
            }
            return Err(ConductorError::AgentUnavailable(format!(
                "no healthy {specialty} agent available for task {task_id}"
            )));
        };

        if let Some(agent) = state.agents.get_mut(&new_agent) {
            agent.assign(task_id)?;
        }
        if let Some(t) = state
            .workflows
            .get_mut(workflow_id)
            .and_then(|w| w.task_mut(task_id))
        {
            t.agent_id = Some(new_agent.clone());
            t.status = TaskStatus::Pending;
            t.started_at = None;
        }
        drop(state);

        info!(
            workflow_id,
            task_id,
            from = ?previous,
            to = %new_agent,
            "Task reassigned"
        );
        self.notify_assignment(workflow_id, task_id, specialty, &new_agent);
        Ok(new_agent)
    }

    /// Current agent holding a task of a workflow.
    pub async fn assignment(&self, workflow_id: &str, task_id: &str) -> Option<String> {
        let state = self.state.read().await;
        state
            .workflows
            .get(workflow_id)?
            .tasks
            .iter()
            .find(|t| t.task_id == task_id)?
            .agent_id
            .clone()
    }

    /// Distinct agents that hold or held tasks of a workflow.
    pub async fn workflow_agents(&self, workflow_id: &str) -> Vec<String> {
        let state = self.state.read().await;
        let mut agents: Vec<String> = state
            .workflows
            .get(workflow_id)
            .map(|w| w.tasks.iter().filter_map(|t| t.agent_id.clone()).collect::<HashSet<_>>())
            .unwrap_or_default()
            .into_iter()
            .collect();
        agents.sort();
        agents
    }

    /// Record that a task began running on its agent.
    pub async fn task_started(&self, workflow_id: &str, task_id: &str) -> ConductorResult<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let agent_id = {
            let task = state
                .workflows
                .get_mut(workflow_id)
                .and_then(|w| w.task_mut(task_id))
                .ok_or_else(|| ConductorError::NotFound(format!("task {task_id}")))?;
            task.status = TaskStatus::InProgress;
            task.started_at = Some(now);
            task.agent_id.clone()
        };
        if let Some(agent) = agent_id.and_then(|id| state.agents.get_mut(&id)) {
            agent.last_heartbeat = now;
        }
        Ok(())
    }

    /// Record a finished attempt: update the agent's metrics and free its slot.
    pub async fn task_finished(
        &self,
        workflow_id: &str,
        task_id: &str,
        agent_id: &str,
        outcome: TaskOutcome,
    ) -> ConductorResult<()> {
        let mut state = self.state.write().await;
        let alpha = self.config.ema_alpha;
        if let Some(agent) = state.agents.get_mut(agent_id) {
            if outcome.success {
                agent
                    .metrics
                    .record_success(outcome.duration_hours, outcome.quality_score, alpha);
            } else {
                agent.metrics.record_failure();
            }
            agent.release(task_id);
            agent.last_heartbeat = Utc::now();
        }
        let tracked_agent = {
            let task = state
                .workflows
                .get_mut(workflow_id)
                .and_then(|w| w.task_mut(task_id))
                .ok_or_else(|| ConductorError::NotFound(format!("task {task_id}")))?;
            task.status = if outcome.success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };
            task.agent_id.clone()
        };
        // the task was redistributed while this attempt ran; free the slot
        // reserved on the new holder too
        if let Some(holder) = tracked_agent.filter(|id| id != agent_id) {
            if state
                .agents
                .get_mut(&holder)
                .is_some_and(|agent| agent.release(task_id))
            {
                debug!(workflow_id, task_id, holder = %holder, "Released redistributed slot");
            }
        }
        debug!(workflow_id, task_id, agent_id, success = outcome.success, "Task attempt recorded");
        Ok(())
    }

    /// Mirror a status the executor decided on (blocked, cancelled, ...).
    pub async fn set_task_status(
        &self,
        workflow_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> ConductorResult<()> {
        let mut state = self.state.write().await;
        let agent_id = {
            let task = state
                .workflows
                .get_mut(workflow_id)
                .and_then(|w| w.task_mut(task_id))
                .ok_or_else(|| ConductorError::NotFound(format!("task {task_id}")))?;
            task.status = status;
            task.agent_id.clone()
        };
        if status.is_terminal() {
            if let Some(agent) = agent_id.and_then(|id| state.agents.get_mut(&id)) {
                agent.release(task_id);
            }
        }
        Ok(())
    }

    /// Release every reservation a workflow still holds.
    pub async fn finish_workflow(&self, workflow_id: &str) {
        let mut state = self.state.write().await;
        let held: Vec<(String, String)> = match state.workflows.get_mut(workflow_id) {
            Some(tracking) => {
                tracking.finished = true;
                tracking
                    .tasks
                    .iter()
                    .filter_map(|t| t.agent_id.clone().map(|a| (t.task_id.clone(), a)))
                    .collect()
            }
            None => return,
        };
        for (task_id, agent_id) in held {
            if let Some(agent) = state.agents.get_mut(&agent_id) {
                agent.release(&task_id);
            }
        }
    }

    /// Free an agent's slot for a task without recording an outcome.
    pub async fn release_task(&self, agent_id: &str, task_id: &str) -> bool {
        let mut state = self.state.write().await;
        state
            .agents
            .get_mut(agent_id)
            .is_some_and(|agent| agent.release(task_id))
    }

    /// Drop a workflow's tracking entirely.
    pub async fn forget_workflow(&self, workflow_id: &str) {
        self.state.write().await.workflows.remove(workflow_id);
    }

    /// Record that an agent is alive.
    pub async fn heartbeat(&self, agent_id: &str) -> ConductorResult<()> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| ConductorError::NotFound(format!("agent {agent_id}")))?;
        agent.last_heartbeat = Utc::now();
        Ok(())
    }

    /// Set an agent's status explicitly. Healthy statuses are normalized
    /// against current load.
    pub async fn report_status(&self, agent_id: &str, status: AgentStatus) -> ConductorResult<()> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| ConductorError::NotFound(format!("agent {agent_id}")))?;
        agent.status = status;
        agent.refresh_status();
        debug!(agent_id, status = %agent.status, "Agent status reported");
        Ok(())
    }

    /// Whether the agent exists and is healthy.
    pub async fn is_available(&self, agent_id: &str) -> bool {
        self.state
            .read()
            .await
            .agents
            .get(agent_id)
            .is_some_and(|a| a.status.is_healthy())
    }

    /// Ask an agent's supervisor for help with a task.
    pub async fn request_help(
        &self,
        agent_id: &str,
        task_id: &str,
        reason: &str,
    ) -> ConductorResult<String> {
        let supervisor = {
            let state = self.state.read().await;
            let agent = state
                .agents
                .get(agent_id)
                .ok_or_else(|| ConductorError::NotFound(format!("agent {agent_id}")))?;
            agent.supervisor_id.clone().ok_or_else(|| {
                ConductorError::Validation(format!("agent {agent_id} has no supervisor"))
            })?
        };
        info!(agent_id, task_id, supervisor = %supervisor, "Help requested");
        self.bus.send(
            agent_id,
            &supervisor,
            MessageType::HelpRequest,
            json!({ "task_id": task_id, "reason": reason }),
            MessagePriority::High,
            true,
        )
    }

    pub async fn agent(&self, agent_id: &str) -> Option<AgentInstance> {
        self.state.read().await.agents.get(agent_id).cloned()
    }

    /// All agents, sorted by id.
    pub async fn agents(&self) -> Vec<AgentInstance> {
        let mut agents: Vec<AgentInstance> =
            self.state.read().await.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub(crate) fn drop_mailbox(&self, agent_id: &str) {
        self.bus.unregister(agent_id);
    }
}

impl Drop for HierarchyManager {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.get_mut().take() {
            handle.abort();
        }
    }
}
