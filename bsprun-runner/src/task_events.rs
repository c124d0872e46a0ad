// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Correlation of hierarchical `build/taskStart` and `build/taskFinish` notifications.
//!
//! Servers report tasks as a forest: each task may name parent tasks that were started earlier.
//! The only way to tell which build target a leaf test event belongs to is to walk up this
//! forest to the nearest `test-task`, which carries the target.

use bsprun_metadata::{BuildTargetIdentifier, TaskFinishParams, TaskStartParams};
use std::collections::HashMap;
use tracing::debug;

/// The start and (once received) finish notifications for a single task.
#[derive(Clone, Debug)]
pub struct TaskEvent {
    start: TaskStartParams,
    parents: Vec<String>,
    finish: Option<TaskFinishParams>,
}

impl TaskEvent {
    /// Returns the `build/taskStart` params for this task.
    pub fn start(&self) -> &TaskStartParams {
        &self.start
    }

    /// Returns the `build/taskFinish` params for this task, if it has finished.
    pub fn finish(&self) -> Option<&TaskFinishParams> {
        self.finish.as_ref()
    }

    /// Returns the parent task IDs that were known when this task started.
    pub fn parents(&self) -> &[String] {
        &self.parents
    }
}

/// Collects task notifications for one protocol session.
#[derive(Clone, Debug, Default)]
pub struct TaskEventTracker {
    entries: HashMap<String, TaskEvent>,
}

impl TaskEventTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a task start.
    ///
    /// Parents are linked only if they have already been registered. References to parents that
    /// start later are dropped rather than buffered. A second start for the same task ID replaces
    /// the first.
    pub fn add_task_start(&mut self, params: TaskStartParams) {
        let parents: Vec<String> = params
            .task_id
            .parents
            .iter()
            .filter(|parent| self.entries.contains_key(parent.as_str()))
            .cloned()
            .collect();
        if parents.len() < params.task_id.parents.len() {
            debug!(
                task_id = %params.task_id.id,
                "dropping references to unknown parent tasks",
            );
        }

        self.entries.insert(
            params.task_id.id.clone(),
            TaskEvent {
                start: params,
                parents,
                finish: None,
            },
        );
    }

    /// Records a task finish. Finishes for tasks that never started are ignored.
    pub fn add_task_finish(&mut self, params: TaskFinishParams) {
        match self.entries.get_mut(params.task_id.id.as_str()) {
            Some(entry) => entry.finish = Some(params),
            None => {
                debug!(task_id = %params.task_id.id, "ignoring finish for unknown task");
            }
        }
    }

    /// Returns the collected events for a task.
    pub fn task_event(&self, id: &str) -> Option<&TaskEvent> {
        self.entries.get(id)
    }

    /// Returns the build target that the given task belongs to.
    ///
    /// Walks the first-parent chain starting at `id` until a task started with a `test-task`
    /// payload is found. Returns `None` if the chain ends first.
    pub fn build_target_id(&self, id: &str) -> Option<BuildTargetIdentifier> {
        let mut current = self.entries.get(id)?;
        // A task can't have more ancestors than there are tasks, so this bound only trips on a
        // cycle created by a server reusing task IDs.
        for _ in 0..self.entries.len() {
            match current.start.test_task() {
                Ok(Some(test_task)) => return Some(test_task.target),
                Ok(None) => {}
                Err(error) => {
                    debug!(
                        task_id = %current.start.task_id.id,
                        "invalid test-task payload: {error}",
                    );
                }
            }
            current = self.entries.get(current.parents.first()?.as_str())?;
        }
        None
    }

    /// Returns the number of tasks tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no tasks have been tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
