//! Checkpoint data model (spec §3 "Checkpoint", §4.8 "Time Travel")

use crate::ids::{CheckpointId, TaskId, TaskTreeId};
use crate::tasktree::TaskNode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a checkpoint snapshots the whole tree or a single task's subtree
/// (Design Notes: tagged sum over the spec's "optional task id" modeling).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CheckpointKind {
    /// A snapshot of the entire task tree.
    Global { tree: Box<crate::tasktree::TaskTree> },
    /// A snapshot of a single task node.
    PerTask { task_id: TaskId, node: Box<TaskNode> },
}

/// An immutable, append-only snapshot enabling rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub task_tree_id: TaskTreeId,
    pub name: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub kind: CheckpointKind,
    pub can_restore: bool,
}

impl Checkpoint {
    #[must_use]
    pub fn global(task_tree_id: TaskTreeId, name: impl Into<String>, description: impl Into<String>, tree: crate::tasktree::TaskTree) -> Self {
        Self {
            id: CheckpointId::new(),
            task_tree_id,
            name: name.into(),
            description: description.into(),
            timestamp: Utc::now(),
            kind: CheckpointKind::Global { tree: Box::new(tree) },
            can_restore: true,
        }
    }

    #[must_use]
    pub fn per_task(task_tree_id: TaskTreeId, name: impl Into<String>, description: impl Into<String>, task_id: TaskId, node: TaskNode) -> Self {
        Self {
            id: CheckpointId::new(),
            task_tree_id,
            name: name.into(),
            description: description.into(),
            timestamp: Utc::now(),
            kind: CheckpointKind::PerTask {
                task_id,
                node: Box::new(node),
            },
            can_restore: true,
        }
    }

    /// The task id this checkpoint is scoped to, if it is a per-task checkpoint.
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        match &self.kind {
            CheckpointKind::PerTask { task_id, .. } => Some(*task_id),
            CheckpointKind::Global { .. } => None,
        }
    }
}
