use crate::specialty::Phase;
use crate::types::{SubTask, TaskStatus, WorkflowPlan};
use conductor_core::{ConductorError, ConductorResult};
use std::collections::{HashMap, HashSet};

impl WorkflowPlan {
    /// Get a sub-task by id.
    pub fn get(&self, id: &str) -> Option<&SubTask> {
        self.subtasks.iter().find(|t| t.id == id)
    }

    /// Get a mutable reference to a sub-task.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut SubTask> {
        self.subtasks.iter_mut().find(|t| t.id == id)
    }

    /// Sub-tasks belonging to a phase, in plan order.
    pub fn tasks_in_phase(&self, phase: Phase) -> Vec<&SubTask> {
        self.subtasks
            .iter()
            .filter(|t| t.parallel_group == phase)
            .collect()
    }

    /// All sub-tasks whose dependencies are satisfied and that have not been
    /// started. Returned in priority order (highest first), then plan order.
    pub fn ready_tasks(&self, completed: &HashSet<String>) -> Vec<&SubTask> {
        let mut ready: Vec<&SubTask> = self
            .subtasks
            .iter()
            .filter(|t| t.is_ready(completed))
            .collect();
        ready.sort_by(|a, b| b.priority.cmp(&a.priority));
        ready
    }

    /// Number of sub-tasks in a given status.
    pub fn count_status(&self, status: TaskStatus) -> usize {
        self.subtasks.iter().filter(|t| t.status == status).count()
    }

    /// Check that ids are unique, every dependency exists in this plan, and
    /// the dependency graph is acyclic.
    pub fn validate(&self) -> ConductorResult<()> {
        let mut ids = HashSet::new();
        for task in &self.subtasks {
            if !ids.insert(task.id.as_str()) {
                return Err(ConductorError::Validation(format!(
                    "duplicate sub-task id '{}'",
                    task.id
                )));
            }
        }
        for task in &self.subtasks {
            if let Some(missing) = task.depends_on.iter().find(|d| !ids.contains(d.as_str())) {
                return Err(ConductorError::Validation(format!(
                    "sub-task '{}' depends on unknown task '{missing}'",
                    task.id
                )));
            }
        }
        if self.has_cycle() {
            return Err(ConductorError::Validation(
                "dependency cycle detected in task graph".to_string(),
            ));
        }
        Ok(())
    }

    /// Check for cycles in the dependency graph.
    pub fn has_cycle(&self) -> bool {
        let index: HashMap<&str, &SubTask> =
            self.subtasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut visited = HashMap::new();
        for task in &self.subtasks {
            if dfs_cycle(task.id.as_str(), &index, &mut visited) {
                return true;
            }
        }
        false
    }

    /// Drop dependency edges that point outside the plan.
    pub(crate) fn prune_dangling_dependencies(&mut self) -> usize {
        let ids: HashSet<String> = self.subtasks.iter().map(|t| t.id.clone()).collect();
        let mut pruned = 0;
        for task in &mut self.subtasks {
            let before = task.depends_on.len();
            task.depends_on.retain(|d| ids.contains(d));
            pruned += before - task.depends_on.len();
        }
        pruned
    }
}

fn dfs_cycle<'a>(
    id: &'a str,
    index: &HashMap<&'a str, &'a SubTask>,
    visited: &mut HashMap<&'a str, u8>,
) -> bool {
    match visited.get(id) {
        Some(1) => return true,  // back edge = cycle
        Some(2) => return false, // already processed
        _ => {}
    }
    visited.insert(id, 1);
    if let Some(&task) = index.get(id) {
        for dep in &task.depends_on {
            if dfs_cycle(dep.as_str(), index, visited) {
                return true;
            }
        }
    }
    visited.insert(id, 2);
    false
}
