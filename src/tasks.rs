//! To-do items that collect pomodoro counts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::IdGenerator;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task title cannot be empty")]
    EmptyTitle,

    #[error("no task with id {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub pomodoro_count: u32,
}

/// Ordered task list; new tasks are appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskList {
    tasks: Vec<Task>,
}

impl TaskList {
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn as_slice(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn add(&mut self, title: &str, ids: &mut IdGenerator) -> Result<Task, TaskError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(TaskError::EmptyTitle);
        }
        let task = Task {
            id: ids.next_id(),
            title: title.to_string(),
            completed: false,
            pomodoro_count: 0,
        };
        self.tasks.push(task.clone());
        Ok(task)
    }

    pub fn toggle(&mut self, id: &str) -> Result<&Task, TaskError> {
        let task = self.find_mut(id)?;
        task.completed = !task.completed;
        Ok(task)
    }

    pub fn remove(&mut self, id: &str) -> Result<Task, TaskError> {
        let index = self
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        Ok(self.tasks.remove(index))
    }

    pub fn increment_pomodoro(&mut self, id: &str) -> Result<u32, TaskError> {
        let task = self.find_mut(id)?;
        task.pomodoro_count += 1;
        Ok(task.pomodoro_count)
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut Task, TaskError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }
}
