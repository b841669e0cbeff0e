use async_trait::async_trait;
use conductor_core::ConductorResult;
use conductor_executor::{TaskBackend, TaskResult};
use conductor_planner::SubTask;
use serde_json::json;
use std::time::Duration;

/// Stand-in backend for local runs: waits a fixed delay and reports a
/// quality score derived from the task id, so repeated runs agree.
pub struct SimulatedBackend {
    delay: Duration,
}

impl SimulatedBackend {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

/// Quality in `[0.82, 0.98]`, stable for a given task id.
fn simulated_quality(task_id: &str) -> f64 {
    let spread = task_id.bytes().map(u64::from).sum::<u64>() % 17;
    0.82 + spread as f64 / 100.0
}

#[async_trait]
impl TaskBackend for SimulatedBackend {
    async fn execute_task(
        &self,
        task: &SubTask,
        agent_id: &str,
        timeout: Duration,
    ) -> ConductorResult<TaskResult> {
        tokio::time::sleep(self.delay.min(timeout)).await;
        let mut result = TaskResult::new();
        result.insert("quality_score".into(), json!(simulated_quality(&task.id)));
        result.insert("agent_id".into(), json!(agent_id));
        result.insert(
            "summary".into(),
            json!(format!("{} finished by {agent_id}", task.title)),
        );
        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_executor::quality_signal;
    use conductor_planner::Specialty;

    #[test]
    fn test_quality_is_stable_and_bounded() {
        for id in ["a", "task-01-designer", "0f3c9a2e-07-fact_checker"] {
            let q = simulated_quality(id);
            assert_eq!(q, simulated_quality(id));
            assert!((0.82..=0.98).contains(&q));
        }
    }

    #[tokio::test]
    async fn test_result_carries_quality_signal() {
        let backend = SimulatedBackend::new(Duration::ZERO);
        let task = SubTask::new("t-1", "Draft", Specialty::ContentWriter, 1.0);
        let result = backend
            .execute_task(&task, "writer-1", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(quality_signal(&result), Some(simulated_quality("t-1")));
    }
}
