use crate::backend::{quality_signal, TaskBackend, TaskResult};
use crate::config::{ExecutorConfig, QualityGatePolicy};
use crate::context::{ExecutionContext, ExecutionSnapshot, ExecutionStatus, GateResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use conductor_bus::{MessagePriority, MessageType};
use conductor_core::{
    ApprovalChannel, ApprovalRequest, ConductorError, ConductorResult, Escalation, EscalationKind,
    HookChain, TerminalEvent, TerminalSubject,
};
use conductor_hierarchy::{HierarchyManager, TaskOutcome, MANAGEMENT_TOPIC};
use conductor_planner::{Phase, SubTask, TaskDecomposer, TaskStatus, WorkflowPlan};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sender id used for messages the executor puts on the bus.
pub const EXECUTOR_ID: &str = "workflow-executor";

const MAX_RETENTION_SECS: u64 = 100 * 365 * 24 * 3600;

/// Caller options for a single execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionPreferences {
    /// Skip the approval channel even when the plan asks for sign-off.
    #[serde(default)]
    pub pre_approved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Cancel,
}

struct ExecutionHandle {
    context: Arc<RwLock<ExecutionContext>>,
    control: watch::Sender<Control>,
    status: watch::Receiver<ExecutionStatus>,
    driver: Option<JoinHandle<()>>,
}

struct Shared {
    config: ExecutorConfig,
    decomposer: Arc<TaskDecomposer>,
    hierarchy: Arc<HierarchyManager>,
    backend: Arc<dyn TaskBackend>,
    hooks: HookChain,
    approval: Option<Arc<dyn ApprovalChannel>>,
    executions: parking_lot::RwLock<HashMap<String, ExecutionHandle>>,
}

/// Runs decomposed plans phase by phase on the agents the hierarchy staffs.
///
/// Every execution is driven by its own background task. Within a phase,
/// tasks launch as soon as their dependencies are complete and their agent
/// is healthy; the scheduler re-evaluates at least once per poll interval.
pub struct WorkflowExecutor {
    shared: Arc<Shared>,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WorkflowExecutor {
    pub fn new(
        config: ExecutorConfig,
        decomposer: Arc<TaskDecomposer>,
        hierarchy: Arc<HierarchyManager>,
        backend: Arc<dyn TaskBackend>,
        hooks: HookChain,
        approval: Option<Arc<dyn ApprovalChannel>>,
    ) -> ConductorResult<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                decomposer,
                hierarchy,
                backend,
                hooks,
                approval,
                executions: parking_lot::RwLock::new(HashMap::new()),
            }),
            sweeper: parking_lot::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    pub fn hierarchy(&self) -> &Arc<HierarchyManager> {
        &self.shared.hierarchy
    }

    /// Decompose `request` and start executing it. Returns the execution id.
    ///
    /// Only planning, approval-channel and staffing errors are returned here;
    /// task failures surface through [`Self::status`].
    pub async fn execute(
        &self,
        request: &str,
        prefs: ExecutionPreferences,
    ) -> ConductorResult<String> {
        let plan = self.shared.decomposer.decompose(request)?;
        self.execute_plan(plan, prefs).await
    }

    /// Start executing an already decomposed plan.
    pub async fn execute_plan(
        &self,
        plan: WorkflowPlan,
        prefs: ExecutionPreferences,
    ) -> ConductorResult<String> {
        plan.validate()?;
        let execution_id = Uuid::new_v4().to_string();
        let mut ctx = ExecutionContext::new(&execution_id, plan);
        ctx.record(None, format!("planned {} task(s)", ctx.plan.subtasks.len()));

        if ctx.plan.requires_approval {
            if prefs.pre_approved {
                ctx.status = ExecutionStatus::Approved;
                ctx.record(None, "pre-approved by caller");
            } else {
                let channel = self.shared.approval.as_ref().ok_or_else(|| {
                    ConductorError::Validation(format!(
                        "workflow {} requires approval ({}) and no approval channel is configured",
                        ctx.workflow_id,
                        ctx.plan.approval_reasons.join("; ")
                    ))
                })?;
                let decision = channel
                    .request_approval(ApprovalRequest {
                        workflow_id: ctx.workflow_id.clone(),
                        description: ctx.plan.request.clone(),
                        risk_level: ctx.plan.risk_level,
                        estimated_cost: ctx.plan.estimated_cost,
                        estimated_hours: ctx.plan.estimated_hours,
                        reasons: ctx.plan.approval_reasons.clone(),
                    })
                    .await?;
                if !decision.approved {
                    let reason = decision.reason.unwrap_or_else(|| "no reason given".into());
                    info!(
                        execution_id = %execution_id,
                        reviewer = %decision.reviewer,
                        reason = %reason,
                        "Execution rejected at approval"
                    );
                    ctx.record(None, format!("rejected by {}: {reason}", decision.reviewer));
                    ctx.cancel_remaining();
                    ctx.status = ExecutionStatus::Cancelled;
                    ctx.finished_at = Some(Utc::now());
                    self.shared.hooks.notify(workflow_event(&ctx, false)).await;
                    self.insert_settled(ctx);
                    return Ok(execution_id);
                }
                ctx.status = ExecutionStatus::Approved;
                ctx.record(None, format!("approved by {}", decision.reviewer));
            }
        }

        ctx.assignments = self.shared.hierarchy.assign_workflow(&ctx.plan).await?;
        info!(
            execution_id = %execution_id,
            workflow_id = %ctx.workflow_id,
            tasks = ctx.plan.subtasks.len(),
            phases = ctx.plan.phases.len(),
            "Execution staffed"
        );

        let context = Arc::new(RwLock::new(ctx));
        let (control_tx, control_rx) = watch::channel(Control::Run);
        let (status_tx, status_rx) = watch::channel(ExecutionStatus::Planned);
        let driver = Driver::new(Arc::clone(&self.shared), Arc::clone(&context), status_tx).await;
        let handle = tokio::spawn(driver.run(control_rx));

        self.shared.executions.write().insert(
            execution_id.clone(),
            ExecutionHandle {
                context,
                control: control_tx,
                status: status_rx,
                driver: Some(handle),
            },
        );
        Ok(execution_id)
    }

    fn insert_settled(&self, ctx: ExecutionContext) {
        let (control, _) = watch::channel(Control::Cancel);
        let (_, status) = watch::channel(ctx.status);
        self.shared.executions.write().insert(
            ctx.execution_id.clone(),
            ExecutionHandle {
                context: Arc::new(RwLock::new(ctx)),
                control,
                status,
                driver: None,
            },
        );
    }

    fn parts(
        &self,
        execution_id: &str,
    ) -> ConductorResult<(Arc<RwLock<ExecutionContext>>, watch::Receiver<ExecutionStatus>)> {
        let executions = self.shared.executions.read();
        let handle = executions
            .get(execution_id)
            .ok_or_else(|| ConductorError::NotFound(format!("execution {execution_id}")))?;
        Ok((Arc::clone(&handle.context), handle.status.clone()))
    }

    /// Point-in-time snapshot of an execution.
    pub async fn status(&self, execution_id: &str) -> ConductorResult<ExecutionSnapshot> {
        let (context, _) = self.parts(execution_id)?;
        let snapshot = context.read().await.snapshot(Utc::now());
        Ok(snapshot)
    }

    /// Full copy of an execution's context, including its log.
    pub async fn context(&self, execution_id: &str) -> ConductorResult<ExecutionContext> {
        let (context, _) = self.parts(execution_id)?;
        let ctx = context.read().await.clone();
        Ok(ctx)
    }

    /// Snapshots of every retained execution, oldest first.
    pub async fn executions(&self) -> Vec<ExecutionSnapshot> {
        let contexts: Vec<Arc<RwLock<ExecutionContext>>> = self
            .shared
            .executions
            .read()
            .values()
            .map(|h| Arc::clone(&h.context))
            .collect();
        let now = Utc::now();
        let mut rows = Vec::with_capacity(contexts.len());
        for context in contexts {
            let ctx = context.read().await;
            rows.push((ctx.created_at, ctx.snapshot(now)));
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows.into_iter().map(|(_, s)| s).collect()
    }

    /// Wait until the execution reaches a terminal status.
    pub async fn await_completion(&self, execution_id: &str) -> ConductorResult<ExecutionSnapshot> {
        let (_, mut status) = self.parts(execution_id)?;
        let terminal = status.borrow().is_terminal();
        if !terminal && status.wait_for(|s| s.is_terminal()).await.is_err() {
            warn!(execution_id, "Execution driver ended without a terminal status");
        }
        self.status(execution_id).await
    }

    /// Stop launching new tasks. In-flight tasks run to completion.
    pub async fn pause(&self, execution_id: &str) -> ConductorResult<()> {
        self.signal(
            execution_id,
            Control::Pause,
            &[
                ExecutionStatus::Planned,
                ExecutionStatus::Approved,
                ExecutionStatus::Executing,
            ],
        )?;
        self.wait_status(execution_id, ExecutionStatus::Paused).await;
        info!(execution_id, "Execution paused");
        Ok(())
    }

    pub async fn resume(&self, execution_id: &str) -> ConductorResult<()> {
        self.signal(execution_id, Control::Run, &[ExecutionStatus::Paused])?;
        self.wait_status(execution_id, ExecutionStatus::Executing).await;
        info!(execution_id, "Execution resumed");
        Ok(())
    }

    /// Abort an execution. In-flight tasks are abandoned and reported failed.
    pub async fn cancel(&self, execution_id: &str) -> ConductorResult<ExecutionSnapshot> {
        {
            let executions = self.shared.executions.read();
            let handle = executions
                .get(execution_id)
                .ok_or_else(|| ConductorError::NotFound(format!("execution {execution_id}")))?;
            let current = *handle.status.borrow();
            if current.is_terminal() {
                return Err(ConductorError::Validation(format!(
                    "execution {execution_id} already {current}"
                )));
            }
            handle.control.send_replace(Control::Cancel);
        }
        self.await_completion(execution_id).await
    }

    fn signal(
        &self,
        execution_id: &str,
        control: Control,
        allowed: &[ExecutionStatus],
    ) -> ConductorResult<()> {
        let executions = self.shared.executions.read();
        let handle = executions
            .get(execution_id)
            .ok_or_else(|| ConductorError::NotFound(format!("execution {execution_id}")))?;
        let current = *handle.status.borrow();
        if !allowed.contains(&current) {
            return Err(ConductorError::Validation(format!(
                "execution {execution_id} cannot go from {current} via {control:?}"
            )));
        }
        handle.control.send_replace(control);
        Ok(())
    }

    async fn wait_status(&self, execution_id: &str, wanted: ExecutionStatus) {
        if let Ok((_, mut status)) = self.parts(execution_id) {
            let _ = status
                .wait_for(|s| *s == wanted || s.is_terminal())
                .await;
        }
    }

    /// Drop terminal executions that finished more than `retention_secs`
    /// before `now`. Returns how many were purged.
    pub async fn purge_finished(&self, now: DateTime<Utc>) -> usize {
        purge(&self.shared, now).await
    }

    /// Spawn the retention sweep. Calling twice is a no-op.
    pub fn start(&self) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let period = self.shared.config.poll_interval();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = purge(&shared, Utc::now()).await;
                if purged > 0 {
                    debug!(purged, "Retention sweep purged executions");
                }
            }
        }));
        info!(
            retention_secs = self.shared.config.retention_secs,
            "Executor retention sweep started"
        );
    }

    /// Stop the sweep and cancel every running execution.
    pub async fn stop(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        let running: Vec<String> = self
            .shared
            .executions
            .read()
            .iter()
            .filter(|(_, h)| !h.status.borrow().is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        for id in running {
            if let Err(e) = self.cancel(&id).await {
                debug!(execution_id = %id, error = %e, "Execution settled before cancel");
            }
        }
        info!("Executor stopped");
    }
}

impl Drop for WorkflowExecutor {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
        for handle in self.shared.executions.write().values_mut() {
            if let Some(driver) = handle.driver.take() {
                driver.abort();
            }
        }
    }
}

async fn purge(shared: &Shared, now: DateTime<Utc>) -> usize {
    let retention_secs = shared.config.retention_secs.min(MAX_RETENTION_SECS);
    let retention = ChronoDuration::seconds(i64::try_from(retention_secs).unwrap_or(0));
    let settled: Vec<(String, Arc<RwLock<ExecutionContext>>)> = shared
        .executions
        .read()
        .iter()
        .filter(|(_, h)| h.status.borrow().is_terminal())
        .map(|(id, h)| (id.clone(), Arc::clone(&h.context)))
        .collect();

    let mut purged = 0;
    for (id, context) in settled {
        let (finished_at, workflow_id) = {
            let ctx = context.read().await;
            (ctx.finished_at, ctx.workflow_id.clone())
        };
        if finished_at.is_some_and(|f| now - f > retention) {
            shared.executions.write().remove(&id);
            shared.hierarchy.forget_workflow(&workflow_id).await;
            purged += 1;
        }
    }
    purged
}

fn workflow_event(ctx: &ExecutionContext, success: bool) -> TerminalEvent {
    TerminalEvent {
        subject: TerminalSubject::Workflow(ctx.workflow_id.clone()),
        execution_id: ctx.execution_id.clone(),
        success,
        metrics: json!({
            "status": ctx.status.as_str(),
            "total_tasks": ctx.plan.subtasks.len(),
            "completed": ctx.completed_tasks.len(),
            "success_ratio": ctx.success_ratio(),
            "overall_quality": ctx.overall_quality,
            "error_count": ctx.error_count,
            "retry_count": ctx.retry_count,
        }),
        timestamp: Utc::now(),
    }
}

/// Result of one backend call for one task.
struct Attempt {
    task_id: String,
    agent_id: String,
    elapsed: Duration,
    result: ConductorResult<TaskResult>,
}

/// Aborts the wrapped task when dropped, so cancelling an execution also
/// stops the backend calls it launched.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Heartbeat period for a running task: a third of the health monitor's
/// timeout, so one late beat never trips it.
fn heartbeat_period(hierarchy: &HierarchyManager) -> Duration {
    Duration::from_secs((hierarchy.config().heartbeat_timeout_secs / 3).max(1))
}

/// Run one backend call for `task`, heartbeating `agent_id` every
/// `heartbeat_every` while the call is in flight.
async fn run_attempt(
    backend: Arc<dyn TaskBackend>,
    hierarchy: Arc<HierarchyManager>,
    task: SubTask,
    agent_id: String,
    timeout: Duration,
    heartbeat_every: Duration,
) -> Attempt {
    let task_id = task.id.clone();
    let worker = agent_id.clone();
    let started = Instant::now();
    let mut unit = AbortOnDrop(tokio::spawn(async move {
        let work = tokio::time::timeout(timeout, backend.execute_task(&task, &worker, timeout));
        tokio::pin!(work);
        let mut beat = tokio::time::interval(heartbeat_every);
        beat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                outcome = &mut work => {
                    return match outcome {
                        Ok(result) => result,
                        Err(_) => Err(ConductorError::Timeout(format!(
                            "task {} exceeded {}s",
                            task.id,
                            timeout.as_secs()
                        ))),
                    };
                }
                _ = beat.tick() => {
                    if let Err(e) = hierarchy.heartbeat(&worker).await {
                        debug!(agent_id = %worker, error = %e, "Heartbeat skipped");
                    }
                }
            }
        }
    }));
    let result = match (&mut unit.0).await {
        Ok(result) => result,
        Err(e) => Err(ConductorError::AgentUnavailable(format!(
            "execution unit for task {task_id} ended abnormally: {e}"
        ))),
    };
    Attempt {
        task_id,
        agent_id,
        elapsed: started.elapsed(),
        result,
    }
}

/// Whether `dep` can no longer complete before tasks of `phase` need it.
fn dependency_lost(ctx: &ExecutionContext, dep: &str, phase: Phase) -> bool {
    if ctx.completed_tasks.contains(dep) {
        return false;
    }
    match ctx.plan.get(dep) {
        None => true,
        Some(t) => {
            t.parallel_group != phase
                || matches!(
                    t.status,
                    TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Blocked
                )
        }
    }
}

/// Background task that owns one execution from start to terminal status.
struct Driver {
    shared: Arc<Shared>,
    context: Arc<RwLock<ExecutionContext>>,
    status: watch::Sender<ExecutionStatus>,
    execution_id: String,
    workflow_id: String,
    started: Instant,
}

impl Driver {
    async fn new(
        shared: Arc<Shared>,
        context: Arc<RwLock<ExecutionContext>>,
        status: watch::Sender<ExecutionStatus>,
    ) -> Self {
        let (execution_id, workflow_id, current) = {
            let ctx = context.read().await;
            (ctx.execution_id.clone(), ctx.workflow_id.clone(), ctx.status)
        };
        status.send_replace(current);
        Self {
            shared,
            context,
            status,
            execution_id,
            workflow_id,
            started: Instant::now(),
        }
    }

    async fn run(self, mut control: watch::Receiver<Control>) {
        let phases = {
            let mut ctx = self.context.write().await;
            ctx.status = ExecutionStatus::Executing;
            ctx.started_at = Some(Utc::now());
            ctx.record(None, "execution started");
            ctx.plan.phases.clone()
        };
        self.status.send_replace(ExecutionStatus::Executing);
        info!(
            execution_id = %self.execution_id,
            workflow_id = %self.workflow_id,
            "Execution started"
        );

        let mut tasks: JoinSet<Attempt> = JoinSet::new();
        let mut gate_blocked = false;
        let mut cancelled = false;
        for phase in phases {
            if gate_blocked {
                self.block_phase(phase).await;
                continue;
            }
            self.context.write().await.current_phase = Some(phase);
            debug!(execution_id = %self.execution_id, phase = %phase, "Phase started");

            if !self.run_phase(phase, &mut tasks, &mut control).await {
                cancelled = true;
                break;
            }
            let passed = self.evaluate_gate(phase).await;
            if !passed && self.shared.config.quality_gate_policy == QualityGatePolicy::Blocking {
                gate_blocked = true;
            }
        }

        if cancelled {
            self.cancel(&mut tasks).await;
        } else {
            self.complete().await;
        }
    }

    /// Drive one phase until every task in it has settled. Returns `false`
    /// when the execution was cancelled.
    async fn run_phase(
        &self,
        phase: Phase,
        tasks: &mut JoinSet<Attempt>,
        control: &mut watch::Receiver<Control>,
    ) -> bool {
        let poll = self.shared.config.poll_interval();
        loop {
            let mode = *control.borrow_and_update();
            match mode {
                Control::Cancel => return false,
                Control::Pause => self.set_status(ExecutionStatus::Paused).await,
                Control::Run => self.set_status(ExecutionStatus::Executing).await,
            }

            self.block_unreachable(phase).await;
            if mode == Control::Run {
                self.launch_ready(phase, tasks).await;
            }
            if tasks.is_empty() && self.context.read().await.phase_settled(phase) {
                return true;
            }
            self.check_long_running().await;

            tokio::select! {
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok(attempt) => self.settle(attempt).await,
                    Err(e) => {
                        error!(execution_id = %self.execution_id, error = %e, "Task unit lost");
                    }
                },
                changed = control.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    async fn set_status(&self, next: ExecutionStatus) {
        let mut ctx = self.context.write().await;
        if ctx.status == next || ctx.status.is_terminal() {
            return;
        }
        ctx.status = next;
        ctx.record(None, format!("status changed to {next}"));
        drop(ctx);
        self.status.send_replace(next);
    }

    async fn block_unreachable(&self, phase: Phase) {
        let ids: Vec<String> = {
            let ctx = self.context.read().await;
            ctx.plan
                .tasks_in_phase(phase)
                .iter()
                .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Ready))
                .filter(|t| t.depends_on.iter().any(|d| dependency_lost(&ctx, d, phase)))
                .map(|t| t.id.clone())
                .collect()
        };
        self.block_tasks(ids, "blocked by a dependency that cannot complete")
            .await;
    }

    async fn block_phase(&self, phase: Phase) {
        let ids: Vec<String> = {
            let ctx = self.context.read().await;
            ctx.plan
                .tasks_in_phase(phase)
                .iter()
                .filter(|t| !t.status.is_terminal())
                .map(|t| t.id.clone())
                .collect()
        };
        self.block_tasks(ids, "blocked by a failed quality gate").await;
    }

    async fn block_tasks(&self, ids: Vec<String>, reason: &str) {
        if ids.is_empty() {
            return;
        }
        {
            let mut ctx = self.context.write().await;
            for id in &ids {
                ctx.mark_blocked(id);
                ctx.record(Some(id), reason);
            }
        }
        let hierarchy = &self.shared.hierarchy;
        for id in &ids {
            if let Some(agent) = hierarchy.assignment(&self.workflow_id, id).await {
                hierarchy.release_task(&agent, id).await;
            }
            if let Err(e) = hierarchy
                .set_task_status(&self.workflow_id, id, TaskStatus::Blocked)
                .await
            {
                debug!(task_id = %id, error = %e, "Blocked task not tracked");
            }
        }
        warn!(
            execution_id = %self.execution_id,
            tasks = ids.len(),
            reason,
            "Tasks blocked"
        );
    }

    async fn launch_ready(&self, phase: Phase, tasks: &mut JoinSet<Attempt>) {
        let ready: Vec<SubTask> = {
            let ctx = self.context.read().await;
            ctx.plan
                .ready_tasks(&ctx.completed_tasks)
                .into_iter()
                .filter(|t| t.parallel_group == phase && !ctx.in_flight.contains(&t.id))
                .cloned()
                .collect()
        };

        for task in ready {
            let Some(agent_id) = self.resolve_agent(&task.id).await else {
                continue;
            };
            let attempt = {
                let mut ctx = self.context.write().await;
                let n = ctx.mark_launched(&task.id, &agent_id);
                ctx.record(Some(&task.id), format!("attempt {n} on {agent_id}"));
                n
            };
            if let Err(e) = self
                .shared
                .hierarchy
                .task_started(&self.workflow_id, &task.id)
                .await
            {
                warn!(task_id = %task.id, error = %e, "Task start not tracked");
            }
            let timeout = self.shared.config.task_timeout(task.estimated_hours);
            debug!(
                execution_id = %self.execution_id,
                task_id = %task.id,
                agent_id = %agent_id,
                attempt,
                timeout_secs = timeout.as_secs(),
                "Task launched"
            );
            tasks.spawn(run_attempt(
                Arc::clone(&self.shared.backend),
                Arc::clone(&self.shared.hierarchy),
                task,
                agent_id,
                timeout,
                heartbeat_period(&self.shared.hierarchy),
            ));
        }
    }

    /// The task's current agent if it is healthy, otherwise a reassignment.
    async fn resolve_agent(&self, task_id: &str) -> Option<String> {
        let hierarchy = &self.shared.hierarchy;
        if let Some(agent) = hierarchy.assignment(&self.workflow_id, task_id).await {
            if hierarchy.is_available(&agent).await {
                return Some(agent);
            }
        }
        match hierarchy.reassign_task(&self.workflow_id, task_id).await {
            Ok(agent) => Some(agent),
            Err(e) => {
                debug!(task_id, error = %e, "No agent available yet");
                None
            }
        }
    }

    async fn settle(&self, attempt: Attempt) {
        let duration_hours = attempt.elapsed.as_secs_f64() / 3600.0;
        let threshold = self.shared.config.criteria_threshold;
        match attempt.result {
            Ok(result) => {
                let quality = quality_signal(&result);
                match quality {
                    Some(q) if q < threshold => {
                        let reason =
                            format!("quality {q:.2} below criteria threshold {threshold:.2}");
                        self.task_failed(
                            &attempt.task_id,
                            &attempt.agent_id,
                            duration_hours,
                            &reason,
                        )
                        .await;
                    }
                    _ => {
                        self.task_succeeded(
                            &attempt.task_id,
                            &attempt.agent_id,
                            duration_hours,
                            quality,
                            result,
                        )
                        .await;
                    }
                }
            }
            Err(e) => {
                self.task_failed(
                    &attempt.task_id,
                    &attempt.agent_id,
                    duration_hours,
                    &e.to_string(),
                )
                .await;
            }
        }
    }

    async fn task_succeeded(
        &self,
        task_id: &str,
        agent_id: &str,
        duration_hours: f64,
        quality: Option<f64>,
        result: TaskResult,
    ) {
        {
            let mut ctx = self.context.write().await;
            ctx.mark_completed(task_id, duration_hours, quality, result);
            ctx.record(Some(task_id), format!("completed in {duration_hours:.3}h"));
        }
        if let Err(e) = self
            .shared
            .hierarchy
            .task_finished(
                &self.workflow_id,
                task_id,
                agent_id,
                TaskOutcome {
                    success: true,
                    duration_hours,
                    quality_score: quality,
                },
            )
            .await
        {
            warn!(task_id, error = %e, "Task completion not tracked");
        }
        info!(
            execution_id = %self.execution_id,
            task_id,
            agent_id,
            quality = ?quality,
            "Task completed"
        );
        self.shared
            .hooks
            .notify(TerminalEvent {
                subject: TerminalSubject::Task(task_id.to_string()),
                execution_id: self.execution_id.clone(),
                success: true,
                metrics: json!({
                    "agent_id": agent_id,
                    "duration_hours": duration_hours,
                    "quality": quality,
                }),
                timestamp: Utc::now(),
            })
            .await;
    }

    async fn task_failed(&self, task_id: &str, agent_id: &str, duration_hours: f64, reason: &str) {
        let attempts = {
            let mut ctx = self.context.write().await;
            ctx.mark_failed(task_id);
            ctx.record(Some(task_id), format!("attempt failed on {agent_id}: {reason}"));
            ctx.attempts.get(task_id).copied().unwrap_or(0)
        };
        let hierarchy = &self.shared.hierarchy;
        if let Err(e) = hierarchy
            .task_finished(
                &self.workflow_id,
                task_id,
                agent_id,
                TaskOutcome {
                    success: false,
                    duration_hours,
                    quality_score: None,
                },
            )
            .await
        {
            warn!(task_id, error = %e, "Task failure not tracked");
        }
        warn!(
            execution_id = %self.execution_id,
            task_id,
            agent_id,
            attempt = attempts,
            reason,
            "Task attempt failed"
        );

        if attempts <= self.shared.config.max_retries {
            match hierarchy.reassign_task(&self.workflow_id, task_id).await {
                Ok(next) => {
                    let mut ctx = self.context.write().await;
                    ctx.mark_retrying(task_id, &next);
                    ctx.record(Some(task_id), format!("retrying on {next}"));
                    return;
                }
                Err(e) => warn!(task_id, error = %e, "No agent available for retry"),
            }
        }

        self.context.write().await.mark_failed_permanently(task_id);
        self.shared
            .hooks
            .notify(TerminalEvent {
                subject: TerminalSubject::Task(task_id.to_string()),
                execution_id: self.execution_id.clone(),
                success: false,
                metrics: json!({ "attempts": attempts, "reason": reason }),
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Returns whether the phase's gate passed (phases without a gate pass).
    async fn evaluate_gate(&self, phase: Phase) -> bool {
        let mut ctx = self.context.write().await;
        let Some(gate) = ctx.plan.quality_gates.iter().find(|g| g.phase == phase).cloned() else {
            return true;
        };
        let score = ctx.phase_quality(phase);
        let passed = match score {
            Some(s) => s >= gate.threshold,
            None => true,
        };
        ctx.record(
            None,
            format!(
                "gate {} {} (score {score:?}, threshold {:.2})",
                gate.name,
                if passed { "passed" } else { "failed" },
                gate.threshold
            ),
        );
        ctx.gate_results.push(GateResult {
            name: gate.name.clone(),
            phase,
            threshold: gate.threshold,
            score,
            passed,
        });
        if passed {
            debug!(execution_id = %self.execution_id, gate = %gate.name, "Quality gate passed");
        } else {
            warn!(
                execution_id = %self.execution_id,
                gate = %gate.name,
                score = ?score,
                threshold = gate.threshold,
                policy = ?self.shared.config.quality_gate_policy,
                "Quality gate failed"
            );
        }
        passed
    }

    /// Escalate the execution once it has run past the long-running mark.
    async fn check_long_running(&self) {
        let hierarchy = &self.shared.hierarchy;
        let elapsed = self.started.elapsed();
        if elapsed < Duration::from_secs(self.shared.config.long_running_secs) {
            return;
        }
        {
            let mut ctx = self.context.write().await;
            if ctx.escalated {
                return;
            }
            ctx.escalated = true;
            ctx.record(None, "escalated as long-running");
        }
        warn!(
            execution_id = %self.execution_id,
            elapsed_secs = elapsed.as_secs(),
            "Execution is long-running, escalating"
        );
        self.shared
            .hooks
            .escalate(Escalation {
                kind: EscalationKind::LongRunningExecution,
                execution_id: Some(self.execution_id.clone()),
                agent_id: None,
                elapsed_secs: Some(elapsed.as_secs()),
                recommended_actions: vec![
                    format!("review progress of workflow {}", self.workflow_id),
                    "reassign or cancel stalled tasks".to_string(),
                ],
                timestamp: Utc::now(),
            })
            .await;
        if let Err(e) = hierarchy.bus().broadcast(
            EXECUTOR_ID,
            MANAGEMENT_TOPIC,
            MessageType::Escalation,
            json!({
                "execution_id": self.execution_id,
                "workflow_id": self.workflow_id,
                "elapsed_secs": elapsed.as_secs(),
            }),
            MessagePriority::High,
        ) {
            warn!(error = %e, "Failed to notify management of long-running execution");
        }
    }

    async fn complete(&self) {
        let (status, ratio, event) = {
            let mut ctx = self.context.write().await;
            let ratio = ctx.success_ratio();
            let status = if ratio >= self.shared.config.success_threshold {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            };
            ctx.status = status;
            ctx.overall_quality = ctx.mean_quality();
            ctx.current_phase = None;
            ctx.finished_at = Some(Utc::now());
            ctx.record(None, format!("finished {status} with success ratio {ratio:.2}"));
            let event = workflow_event(&ctx, status == ExecutionStatus::Completed);
            (status, ratio, event)
        };

        let hierarchy = &self.shared.hierarchy;
        for agent in hierarchy.workflow_agents(&self.workflow_id).await {
            if let Err(e) = hierarchy.bus().send(
                EXECUTOR_ID,
                &agent,
                MessageType::TaskCompletion,
                json!({
                    "execution_id": self.execution_id,
                    "workflow_id": self.workflow_id,
                    "status": status.as_str(),
                }),
                MessagePriority::Normal,
                false,
            ) {
                warn!(agent_id = %agent, error = %e, "Failed to notify agent of completion");
            }
        }
        hierarchy.finish_workflow(&self.workflow_id).await;
        info!(
            execution_id = %self.execution_id,
            status = %status,
            success_ratio = ratio,
            "Execution finished"
        );
        self.shared.hooks.notify(event).await;
        self.status.send_replace(status);
    }

    async fn cancel(&self, tasks: &mut JoinSet<Attempt>) {
        tasks.shutdown().await;
        let (abandoned, cancelled, event) = {
            let mut ctx = self.context.write().await;
            let mut abandoned: Vec<String> = ctx.in_flight.iter().cloned().collect();
            abandoned.sort();
            for id in &abandoned {
                ctx.mark_failed(id);
                ctx.mark_failed_permanently(id);
                ctx.record(Some(id), "abandoned by cancellation");
            }
            let cancelled = ctx.cancel_remaining();
            ctx.status = ExecutionStatus::Cancelled;
            ctx.current_phase = None;
            ctx.finished_at = Some(Utc::now());
            ctx.record(None, "execution cancelled");
            (abandoned, cancelled, workflow_event(&ctx, false))
        };

        let hierarchy = &self.shared.hierarchy;
        let settle = abandoned
            .iter()
            .map(|id| (id, TaskStatus::Failed))
            .chain(cancelled.iter().map(|id| (id, TaskStatus::Cancelled)));
        for (id, status) in settle {
            if let Err(e) = hierarchy.set_task_status(&self.workflow_id, id, status).await {
                debug!(task_id = %id, error = %e, "Cancelled task not tracked");
            }
        }
        hierarchy.finish_workflow(&self.workflow_id).await;
        info!(
            execution_id = %self.execution_id,
            abandoned = abandoned.len(),
            cancelled = cancelled.len(),
            "Execution cancelled"
        );
        self.shared.hooks.notify(event).await;
        self.status.send_replace(ExecutionStatus::Cancelled);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_bus::{BusConfig, CommunicationBus};
    use conductor_hierarchy::{HierarchyConfig, EXECUTIVE_ID};
    use conductor_planner::{PlannerConfig, Specialty};

    struct SlowBackend(Duration);

    #[async_trait]
    impl TaskBackend for SlowBackend {
        async fn execute_task(
            &self,
            _task: &SubTask,
            _agent_id: &str,
            _timeout: Duration,
        ) -> ConductorResult<TaskResult> {
            tokio::time::sleep(self.0).await;
            Ok(TaskResult::new())
        }
    }

    fn plan_with(tasks: Vec<SubTask>) -> WorkflowPlan {
        let mut plan = TaskDecomposer::new(PlannerConfig::default())
            .unwrap()
            .decompose("simple task")
            .unwrap();
        plan.subtasks = tasks;
        plan
    }

    #[test]
    fn test_dependency_lost_rules() {
        let a = SubTask::new("a", "a", Specialty::ResearchAnalyst, 1.0);
        let b = SubTask::new("b", "b", Specialty::DataAnalyst, 1.0);
        let c = SubTask::new("c", "c", Specialty::ResearchAnalyst, 1.0);
        let mut ctx = ExecutionContext::new("e", plan_with(vec![a, b, c]));

        // same phase, still pending: wait for it
        assert!(!dependency_lost(&ctx, "c", Phase::Research));
        // later phase can never finish first
        assert!(dependency_lost(&ctx, "b", Phase::Research));
        assert!(dependency_lost(&ctx, "missing", Phase::Research));

        ctx.mark_launched("a", "agent");
        ctx.mark_completed("a", 0.1, None, TaskResult::new());
        assert!(!dependency_lost(&ctx, "a", Phase::Analysis));

        ctx.mark_launched("c", "agent");
        ctx.mark_failed("c");
        ctx.mark_failed_permanently("c");
        assert!(dependency_lost(&ctx, "c", Phase::Research));
    }

    #[test]
    fn test_workflow_event_metrics() {
        let ctx = ExecutionContext::new(
            "e",
            plan_with(vec![SubTask::new("a", "a", Specialty::ResearchAnalyst, 1.0)]),
        );
        let event = workflow_event(&ctx, false);
        assert_eq!(event.subject, TerminalSubject::Workflow(ctx.workflow_id.clone()));
        assert_eq!(event.metrics["total_tasks"], 1);
        assert_eq!(event.metrics["status"], "planned");
    }

    #[tokio::test]
    async fn test_running_attempt_heartbeats_its_agent() {
        let bus = Arc::new(CommunicationBus::new(BusConfig::default()).unwrap());
        let hierarchy = Arc::new(
            HierarchyManager::new(HierarchyConfig::default(), bus, HookChain::new()).unwrap(),
        );
        let before = Utc::now();
        let attempt = run_attempt(
            Arc::new(SlowBackend(Duration::from_millis(500))),
            Arc::clone(&hierarchy),
            SubTask::new("t-1", "Survey", Specialty::ResearchAnalyst, 1.0),
            EXECUTIVE_ID.to_string(),
            Duration::from_secs(5),
            Duration::from_millis(100),
        )
        .await;
        assert!(attempt.result.is_ok());

        let last = hierarchy.agent(EXECUTIVE_ID).await.unwrap().last_heartbeat;
        assert!(last - before >= ChronoDuration::milliseconds(300));
    }

    #[test]
    fn test_heartbeat_period_is_a_third_of_the_timeout() {
        let bus = Arc::new(CommunicationBus::new(BusConfig::default()).unwrap());
        let config = HierarchyConfig {
            heartbeat_timeout_secs: 300,
            ..HierarchyConfig::default()
        };
        let hierarchy = HierarchyManager::new(config, bus, HookChain::new()).unwrap();
        assert_eq!(heartbeat_period(&hierarchy), Duration::from_secs(100));
    }
}
