//! Task queue (C7): tasks with status and dependency list, keyed by task id.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::BoltError;

/// A 128-bit random task identifier.
///
/// The Python original derived ids from `md5(name + str(random.randint(1, 25000)))`,
/// which is collision-prone under load; a v4 UUID gives a cryptographically
/// negligible collision probability instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Pending,
    Running,
    Halted,
    Complete,
}

/// One unit of dispatchable work.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub plugin_name: String,
    pub params: Map<String, Value>,
    pub topics: Vec<String>,
    pub status: TaskStatus,
    pub dependencies: Vec<TaskId>,
}

/// `TaskId -> Task`, iterated in insertion order for `cycle_tasks` scans.
#[derive(Default)]
pub struct TaskQueue {
    tasks: IndexMap<TaskId, Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a new task. Always succeeds; returns the freshly minted id.
    pub fn queue_task(
        &mut self,
        name: &str,
        plugin_name: &str,
        params: Map<String, Value>,
        topics: Vec<String>,
        dependencies: Vec<TaskId>,
    ) -> TaskId {
        let id = TaskId::new();
        let task = Task {
            id,
            name: name.to_string(),
            plugin_name: plugin_name.to_string(),
            params,
            topics,
            status: TaskStatus::Queued,
            dependencies,
        };
        self.tasks.insert(id, task);
        id
    }

    pub fn get_task(&self, id: TaskId) -> Result<&Task, BoltError> {
        self.tasks
            .get(&id)
            .ok_or_else(|| BoltError::UnknownTask(id.to_string()))
    }

    pub fn get_task_status(&self, id: TaskId) -> Result<TaskStatus, BoltError> {
        self.get_task(id).map(|t| t.status)
    }

    pub fn get_task_dependency(&self, id: TaskId) -> Result<&[TaskId], BoltError> {
        self.get_task(id).map(|t| t.dependencies.as_slice())
    }

    pub fn change_task_status(&mut self, id: TaskId, status: TaskStatus) -> Result<(), BoltError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| BoltError::UnknownTask(id.to_string()))?;
        task.status = status;
        Ok(())
    }

    /// Iterate tasks in insertion order, the order `cycle_tasks` scans.
    pub fn iter_in_order(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_task_starts_queued_with_fresh_id() {
        let mut queue = TaskQueue::new();
        let id = queue.queue_task("A", "PluginA", Map::new(), vec!["T".into()], vec![]);
        assert_eq!(queue.get_task_status(id).unwrap(), TaskStatus::Queued);
        assert!(queue.get_task_dependency(id).unwrap().is_empty());
    }

    #[test]
    fn unknown_task_lookup_fails() {
        let queue = TaskQueue::new();
        let ghost = TaskId::new();
        assert!(matches!(
            queue.get_task(ghost).unwrap_err(),
            BoltError::UnknownTask(_)
        ));
    }

    #[test]
    fn change_status_persists() {
        let mut queue = TaskQueue::new();
        let id = queue.queue_task("A", "PluginA", Map::new(), vec![], vec![]);
        queue.change_task_status(id, TaskStatus::Complete).unwrap();
        assert_eq!(queue.get_task_status(id).unwrap(), TaskStatus::Complete);
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut queue = TaskQueue::new();
        let a = queue.queue_task("A", "P", Map::new(), vec![], vec![]);
        let b = queue.queue_task("B", "P", Map::new(), vec![], vec![]);
        let ids: Vec<TaskId> = queue.iter_in_order().map(|t| t.id).collect();
        assert_eq!(ids, vec![a, b]);
    }
}
