//! Staffing, health recovery and progress reporting across the hierarchy.

use chrono::{Duration, Utc};
use conductor_bus::{BusConfig, CommunicationBus, MessagePriority, MessageType};
use conductor_core::{ConductorError, HookChain};
use conductor_hierarchy::*;
use conductor_planner::{
    PlannerConfig, Specialty, SubTask, TaskDecomposer, TaskStatus, WorkflowPlan,
};
use std::sync::Arc;

fn hierarchy(config: HierarchyConfig) -> Arc<HierarchyManager> {
    let bus = Arc::new(CommunicationBus::new(BusConfig::default()).expect("bus config"));
    Arc::new(HierarchyManager::new(config, bus, HookChain::new()).expect("hierarchy config"))
}

/// A plan of `n` independent research-analyst tasks.
fn research_plan(n: usize) -> WorkflowPlan {
    let mut plan = TaskDecomposer::new(PlannerConfig::default())
        .unwrap()
        .decompose("simple task")
        .unwrap();
    plan.subtasks = (0..n)
        .map(|i| {
            SubTask::new(
                format!("t-{i}"),
                format!("Task {i}"),
                Specialty::ResearchAnalyst,
                2.0,
            )
        })
        .collect();
    plan.required_specialists = vec![Specialty::ResearchAnalyst];
    plan
}

fn small_pool(research: usize, capacity: usize) -> HierarchyConfig {
    HierarchyConfig {
        default_capacity: capacity,
        pool_sizes: PoolSizes {
            research,
            ..PoolSizes::default()
        },
        ..HierarchyConfig::default()
    }
}

#[tokio::test]
async fn capacity_is_never_exceeded() {
    let m = hierarchy(small_pool(10, 3));
    let plan = research_plan(7);
    let assignments = m.assign_workflow(&plan).await.unwrap();
    assert_eq!(assignments.len(), 7);

    let workers: Vec<AgentInstance> = m
        .agents()
        .await
        .into_iter()
        .filter(|a| a.specialty == Some(Specialty::ResearchAnalyst))
        .collect();
    assert!(workers.len() >= 3);
    for agent in &workers {
        assert!(agent.current_tasks.len() <= agent.capacity);
    }
    let held: usize = workers.iter().map(|a| a.current_tasks.len()).sum();
    assert_eq!(held, 7);
}

#[tokio::test]
async fn full_agent_is_never_selected() {
    let m = hierarchy(small_pool(10, 1));
    let plan = research_plan(1);
    let assignments = m.assign_workflow(&plan).await.unwrap();
    let busy = assignments.get("t-0").unwrap().clone();

    assert_eq!(m.select_optimal_agent(Specialty::ResearchAnalyst).await, None);

    let fresh = m
        .create_specialist(Specialty::ResearchAnalyst, Urgency::Normal)
        .await
        .unwrap();
    assert_ne!(fresh, busy);
    assert_eq!(
        m.select_optimal_agent(Specialty::ResearchAnalyst).await,
        Some(fresh)
    );
}

#[tokio::test]
async fn pool_cap_is_not_bypassed_by_urgency() {
    let m = hierarchy(small_pool(1, 1));
    m.assign_workflow(&research_plan(1)).await.unwrap();

    for urgency in [Urgency::Normal, Urgency::High] {
        let err = m
            .create_specialist(Specialty::ResearchAnalyst, urgency)
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::ResourceExhausted(_)));
        assert!(err.is_retryable());
    }
}

#[tokio::test]
async fn high_urgency_accepts_partially_loaded_agent() {
    let m = hierarchy(small_pool(1, 2));
    m.assign_workflow(&research_plan(1)).await.unwrap();

    assert!(m
        .create_specialist(Specialty::ResearchAnalyst, Urgency::Normal)
        .await
        .is_err());
    let id = m
        .create_specialist(Specialty::ResearchAnalyst, Urgency::High)
        .await
        .unwrap();
    assert_eq!(m.agent(&id).await.unwrap().current_tasks.len(), 1);
}

#[tokio::test]
async fn unstaffable_plan_is_rolled_back() {
    let m = hierarchy(small_pool(1, 1));
    let err = m.assign_workflow(&research_plan(2)).await.unwrap_err();
    assert!(matches!(err, ConductorError::Staffing(_)));

    let status = m.hierarchy_status().await;
    assert_eq!(status.active_workflows, 0);
    assert!(m
        .agents()
        .await
        .iter()
        .all(|a| a.current_tasks.is_empty()));
}

#[tokio::test]
async fn silent_busy_agent_is_replaced_and_removed() {
    let m = hierarchy(small_pool(10, 3));
    let plan = research_plan(2);
    let assignments = m.assign_workflow(&plan).await.unwrap();
    let failed_agent = assignments.get("t-0").unwrap().clone();
    assert_eq!(assignments.get("t-1"), Some(&failed_agent));
    m.task_started(&plan.id, "t-0").await.unwrap();

    let report = m
        .run_health_check(Utc::now() + Duration::seconds(301))
        .await;
    assert_eq!(report.failed_agents, vec![failed_agent.clone()]);
    assert_eq!(report.replacements.len(), 1);
    assert_eq!(report.redistributed.len(), 2);
    assert!(report.unplaced.is_empty());

    assert!(m.agent(&failed_agent).await.is_none());
    assert!(!m.bus().is_registered(&failed_agent));
    let replacement = &report.replacements[0];
    assert_eq!(m.assignment(&plan.id, "t-0").await.as_ref(), Some(replacement));
    assert_eq!(
        m.agent(replacement).await.unwrap().current_tasks.len(),
        2
    );
}

#[tokio::test]
async fn reserved_but_idle_agent_is_not_timed_out() {
    let m = hierarchy(small_pool(10, 3));
    let plan = research_plan(2);
    let agent = m.assign_workflow(&plan).await.unwrap().get("t-0").unwrap().clone();

    let report = m
        .run_health_check(Utc::now() + Duration::seconds(301))
        .await;
    assert!(report.failed_agents.is_empty());
    assert_eq!(m.agent(&agent).await.unwrap().current_tasks.len(), 2);
}

#[tokio::test]
async fn finishing_a_redistributed_task_frees_the_new_holder() {
    let m = hierarchy(small_pool(10, 3));
    let plan = research_plan(1);
    let original = m.assign_workflow(&plan).await.unwrap().get("t-0").unwrap().clone();
    m.task_started(&plan.id, "t-0").await.unwrap();

    let report = m
        .run_health_check(Utc::now() + Duration::seconds(301))
        .await;
    assert_eq!(report.failed_agents, vec![original.clone()]);
    let holder = report.redistributed[0].to.clone();
    assert_eq!(m.agent(&holder).await.unwrap().current_tasks.len(), 1);

    // the attempt that was running on the removed agent still reports back
    m.task_finished(
        &plan.id,
        "t-0",
        &original,
        TaskOutcome {
            success: true,
            duration_hours: 0.5,
            quality_score: Some(0.9),
        },
    )
    .await
    .unwrap();
    assert!(m.agent(&holder).await.unwrap().current_tasks.is_empty());
}

#[tokio::test]
async fn failed_tasks_spread_round_robin() {
    let m = hierarchy(small_pool(10, 2));
    let first = research_plan(2);
    let a = m.assign_workflow(&first).await.unwrap().get("t-0").unwrap().clone();
    assert_eq!(m.agent(&a).await.unwrap().current_tasks.len(), 2);

    // a second agent with one slot left, and a third that is idle
    let b = m.create_specialist(Specialty::ResearchAnalyst, Urgency::Normal).await.unwrap();
    let mut second = research_plan(1);
    second.subtasks[0].id = "u-0".into();
    let placed = m.assign_workflow(&second).await.unwrap();
    assert_eq!(placed.get("u-0"), Some(&b));
    let c = m.create_specialist(Specialty::ResearchAnalyst, Urgency::Normal).await.unwrap();
    assert_ne!(b, c);

    m.report_status(&a, AgentStatus::Failed).await.unwrap();
    let report = m.run_health_check(Utc::now()).await;
    assert_eq!(report.redistributed.len(), 2);
    assert!(report.replacements.is_empty());
    let targets: Vec<&str> = report.redistributed.iter().map(|r| r.to.as_str()).collect();
    assert!(targets.contains(&b.as_str()));
    assert!(targets.contains(&c.as_str()));
    assert_eq!(m.agent(&b).await.unwrap().current_tasks.len(), 2);
    assert_eq!(m.agent(&c).await.unwrap().current_tasks.len(), 1);
}

#[tokio::test]
async fn failure_budget_triggers_recovery() {
    let m = hierarchy(HierarchyConfig::default());
    let plan = research_plan(1);
    let assignments = m.assign_workflow(&plan).await.unwrap();
    let agent = assignments.get("t-0").unwrap().clone();

    for _ in 0..3 {
        m.task_finished(
            &plan.id,
            "t-0",
            &agent,
            TaskOutcome {
                success: false,
                duration_hours: 0.1,
                quality_score: None,
            },
        )
        .await
        .unwrap();
    }
    let report = m.run_health_check(Utc::now()).await;
    assert_eq!(report.failed_agents, vec![agent]);
}

#[tokio::test]
async fn management_agent_goes_offline_not_deleted() {
    let m = hierarchy(HierarchyConfig::default());
    let id = manager_id(conductor_planner::SpecialtyGroup::Research);
    m.report_status(&id, AgentStatus::Failed).await.unwrap();
    m.run_health_check(Utc::now()).await;
    let agent = m.agent(&id).await.unwrap();
    assert_eq!(agent.status, AgentStatus::Offline);
    assert!(!m.is_available(&id).await);
}

#[tokio::test]
async fn progress_tracks_completion_and_health() {
    let m = hierarchy(HierarchyConfig::default());
    let plan = research_plan(2);
    let assignments = m.assign_workflow(&plan).await.unwrap();

    let progress = m.workflow_progress(&plan.id).await.unwrap();
    assert_eq!(progress.percent_complete, 0.0);
    assert_eq!(progress.health, HealthVerdict::Healthy);
    assert_eq!(progress.current_phase, Some(conductor_planner::Phase::Research));

    let agent = assignments.get("t-0").unwrap();
    m.task_started(&plan.id, "t-0").await.unwrap();
    m.task_finished(
        &plan.id,
        "t-0",
        agent,
        TaskOutcome {
            success: true,
            duration_hours: 1.5,
            quality_score: Some(0.9),
        },
    )
    .await
    .unwrap();

    m.task_started(&plan.id, "t-1").await.unwrap();
    let progress = m.workflow_progress(&plan.id).await.unwrap();
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.percent_complete, 50.0);
    assert_eq!(progress.health, HealthVerdict::Healthy);

    // 2h estimate, 150% threshold = 3h
    let later = m
        .workflow_progress_at(&plan.id, Utc::now() + Duration::hours(4))
        .await
        .unwrap();
    assert_eq!(later.health, HealthVerdict::Warning);
    assert_eq!(later.overdue_tasks, vec!["t-1".to_string()]);

    m.set_task_status(&plan.id, "t-1", TaskStatus::Failed)
        .await
        .unwrap();
    let progress = m.workflow_progress(&plan.id).await.unwrap();
    assert_eq!(progress.health, HealthVerdict::Degraded);
    assert_eq!(progress.current_phase, None);
}

#[tokio::test]
async fn reassignment_prefers_a_different_agent() {
    let m = hierarchy(HierarchyConfig::default());
    let plan = research_plan(1);
    let assignments = m.assign_workflow(&plan).await.unwrap();
    let first = assignments.get("t-0").unwrap().clone();

    let second = m.reassign_task(&plan.id, "t-0").await.unwrap();
    assert_ne!(first, second);
    assert!(m.agent(&first).await.unwrap().current_tasks.is_empty());
    assert_eq!(m.assignment(&plan.id, "t-0").await, Some(second));
}

#[tokio::test]
async fn help_request_reaches_supervisor() {
    let m = hierarchy(HierarchyConfig::default());
    let agent = m
        .create_specialist(Specialty::DataAnalyst, Urgency::Normal)
        .await
        .unwrap();
    let supervisor = manager_id(conductor_planner::SpecialtyGroup::Analysis);
    let mut inbox = m.claim_mailbox(&supervisor).await.unwrap();
    m.bus().start();

    m.request_help(&agent, "t-9", "dataset is incomplete")
        .await
        .unwrap();
    let message = tokio::time::timeout(std::time::Duration::from_secs(2), inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.message_type, MessageType::HelpRequest);
    assert_eq!(message.sender_id, agent);
    assert!(message.requires_response);
    assert_eq!(message.payload["task_id"], "t-9");
}

#[tokio::test]
async fn unread_agents_do_not_accumulate_messages() {
    let bus = Arc::new(
        CommunicationBus::new(BusConfig {
            max_delivery_attempts: 1,
            failed_buffer_size: 16,
            ..BusConfig::default()
        })
        .unwrap(),
    );
    let m = HierarchyManager::new(HierarchyConfig::default(), Arc::clone(&bus), HookChain::new())
        .unwrap();
    bus.start();

    for i in 0..500 {
        bus.send(
            "workflow-executor",
            EXECUTIVE_ID,
            MessageType::TaskCompletion,
            serde_json::json!({ "n": i }),
            MessagePriority::Normal,
            false,
        )
        .unwrap();
    }
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while bus.communication_metrics().messages_failed < 500 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let metrics = bus.communication_metrics();
    assert_eq!(metrics.messages_delivered, 0);
    assert_eq!(metrics.failed_buffer_len, 16);
    assert_eq!(metrics.registered_agents, 0);

    // once claimed, the executive receives its traffic
    let mut inbox = m.claim_mailbox(EXECUTIVE_ID).await.unwrap();
    bus.send(
        "workflow-executor",
        EXECUTIVE_ID,
        MessageType::TaskCompletion,
        serde_json::json!({}),
        MessagePriority::Normal,
        false,
    )
    .unwrap();
    let message = tokio::time::timeout(std::time::Duration::from_secs(2), inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.recipient_id, EXECUTIVE_ID);
}
