use async_trait::async_trait;
use conductor_core::ConductorResult;
use conductor_planner::SubTask;
use serde_json::{Map, Value};
use std::time::Duration;

/// Key/value result returned by a backend for one task attempt.
pub type TaskResult = Map<String, Value>;

/// Field-name fragments that mark a numeric result as a quality signal.
const QUALITY_MARKERS: [&str; 3] = ["quality", "score", "accuracy"];

/// The opaque worker that actually performs a sub-task.
///
/// Implementations should honor `timeout`; the executor also wraps every call
/// in [`tokio::time::timeout`] and treats an overrun as a failed attempt.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    async fn execute_task(
        &self,
        task: &SubTask,
        agent_id: &str,
        timeout: Duration,
    ) -> ConductorResult<TaskResult>;
}

/// Mean of every numeric field whose name mentions quality, score or
/// accuracy. `None` when the result carries no such field.
pub fn quality_signal(result: &TaskResult) -> Option<f64> {
    let scores: Vec<f64> = result
        .iter()
        .filter(|(key, _)| {
            let key = key.to_lowercase();
            QUALITY_MARKERS.iter().any(|m| key.contains(m))
        })
        .filter_map(|(_, value)| value.as_f64())
        .collect();
    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}
