//! The task registry and the move-vs-compact conflict guard.
//!
//! The repository manager's scheduler is an external collaborator; all the
//! blob layer needs from it is a view of which tasks are currently running
//! and which stores they touch. Before compacting store X the guard looks
//! for a running "move store" task whose configuration references X as
//! source or destination; compacting mid-transfer risks reclaiming blobs
//! the move has not copied yet.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Type id of the store-migration task.
pub const MOVE_TYPE_ID: &str = "blobstore.move";

/// Attribute naming the move's source store.
pub const SOURCE_ATTRIBUTE: &str = "source";

/// Attribute naming the move's destination store.
pub const DESTINATION_ATTRIBUTE: &str = "destination";

/// Lifecycle state of a registered task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Waiting,
    Running,
    Done,
    Failed,
}

/// One task as the scheduler describes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskDescriptor {
    /// Scheduler-assigned task id.
    pub id: String,
    /// Task type (e.g. [`MOVE_TYPE_ID`]).
    pub type_id: String,
    /// Current state.
    pub state: TaskState,
    /// Task configuration attributes.
    pub attributes: BTreeMap<String, String>,
}

impl TaskDescriptor {
    pub fn new(id: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_id: type_id.into(),
            state: TaskState::Waiting,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Builder-style state setter.
    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = state;
        self
    }

    /// Whether this task's configuration references `store` as its source
    /// or destination.
    pub fn references_store(&self, store: &str) -> bool {
        [SOURCE_ATTRIBUTE, DESTINATION_ATTRIBUTE]
            .iter()
            .any(|key| self.attributes.get(*key).map(String::as_str) == Some(store))
    }
}

/// Read-mostly view of the scheduler's tasks.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskDescriptor>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a task descriptor.
    pub fn upsert(&self, task: TaskDescriptor) {
        self.tasks
            .write()
            .expect("lock poisoned")
            .insert(task.id.clone(), task);
    }

    /// Update a task's state. Unknown ids are ignored.
    pub fn set_state(&self, id: &str, state: TaskState) {
        if let Some(task) = self.tasks.write().expect("lock poisoned").get_mut(id) {
            task.state = state;
        }
    }

    /// Remove a task descriptor.
    pub fn remove(&self, id: &str) {
        self.tasks.write().expect("lock poisoned").remove(id);
    }

    /// Snapshot of the running tasks of one type.
    pub fn running_of_type(&self, type_id: &str) -> Vec<TaskDescriptor> {
        let tasks = self.tasks.read().expect("lock poisoned");
        let mut found: Vec<TaskDescriptor> = tasks
            .values()
            .filter(|t| t.type_id == type_id && t.state == TaskState::Running)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// The running move task that references `store`, if any.
    pub fn find_move_conflict(&self, store: &str) -> Option<TaskDescriptor> {
        self.running_of_type(MOVE_TYPE_ID)
            .into_iter()
            .find(|t| t.references_store(store))
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tasks = self.tasks.read().expect("lock poisoned");
        f.debug_struct("TaskRegistry")
            .field("task_count", &tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn move_task(id: &str, source: &str, destination: &str, state: TaskState) -> TaskDescriptor {
        TaskDescriptor::new(id, MOVE_TYPE_ID)
            .with_attribute(SOURCE_ATTRIBUTE, source)
            .with_attribute(DESTINATION_ATTRIBUTE, destination)
            .with_state(state)
    }

    #[test]
    fn running_move_on_source_conflicts() {
        let registry = TaskRegistry::new();
        registry.upsert(move_task("t1", "default", "archive", TaskState::Running));
        let hit = registry.find_move_conflict("default").unwrap();
        assert_eq!(hit.id, "t1");
    }

    #[test]
    fn running_move_on_destination_conflicts() {
        let registry = TaskRegistry::new();
        registry.upsert(move_task("t1", "default", "archive", TaskState::Running));
        assert!(registry.find_move_conflict("archive").is_some());
    }

    #[test]
    fn unrelated_store_does_not_conflict() {
        let registry = TaskRegistry::new();
        registry.upsert(move_task("t1", "default", "archive", TaskState::Running));
        assert!(registry.find_move_conflict("scratch").is_none());
    }

    #[test]
    fn non_running_moves_do_not_conflict() {
        let registry = TaskRegistry::new();
        registry.upsert(move_task("t1", "default", "archive", TaskState::Done));
        registry.upsert(move_task("t2", "default", "archive", TaskState::Waiting));
        registry.upsert(move_task("t3", "default", "archive", TaskState::Failed));
        assert!(registry.find_move_conflict("default").is_none());
    }

    #[test]
    fn other_task_types_do_not_conflict() {
        let registry = TaskRegistry::new();
        registry.upsert(
            TaskDescriptor::new("t1", "repository.rebuild-index")
                .with_attribute(SOURCE_ATTRIBUTE, "default")
                .with_state(TaskState::Running),
        );
        assert!(registry.find_move_conflict("default").is_none());
    }

    #[test]
    fn state_updates_flip_conflicts() {
        let registry = TaskRegistry::new();
        registry.upsert(move_task("t1", "a", "b", TaskState::Running));
        assert!(registry.find_move_conflict("a").is_some());

        registry.set_state("t1", TaskState::Done);
        assert!(registry.find_move_conflict("a").is_none());

        registry.remove("t1");
        assert!(registry.running_of_type(MOVE_TYPE_ID).is_empty());
    }
}
