//! Task-tree data model (spec §3 "TaskTree", "TaskNode", "AcceptanceTest", etc.)

use crate::hash::ContentHash;
use crate::ids::{AcceptanceTestId, CheckpointId, ModuleId, ProcessId, TaskId, TaskTreeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a [`TaskNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    TestWriting,
    Testing,
    Coding,
    Refactoring,
    Passed,
    TestFailed,
    Blocked,
    Skipped,
}

impl TaskStatus {
    /// Whether this is a terminal status (no further phase transitions).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Skipped)
    }
}

/// A single acceptance criterion within an [`AcceptanceTest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub check_type: String,
    pub description: String,
    pub expected_result: String,
}

/// A queen-generated, worker-immutable acceptance test (spec §3).
///
/// Generated at task-creation time only (Design Notes resolution (b)); the
/// worker reads but never edits these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptanceTest {
    pub id: AcceptanceTestId,
    pub name: String,
    pub description: String,
    pub test_file_path: String,
    pub test_command: String,
    pub criteria: Vec<AcceptanceCriterion>,
    pub test_code: Option<String>,
}

impl AcceptanceTest {
    #[must_use]
    pub fn new(name: impl Into<String>, test_file_path: impl Into<String>, test_command: impl Into<String>) -> Self {
        Self {
            id: AcceptanceTestId::new(),
            name: name.into(),
            description: String::new(),
            test_file_path: test_file_path.into(),
            test_command: test_command.into(),
            criteria: Vec::new(),
            test_code: None,
        }
    }
}

/// A worker-private unit test specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    pub test_code: String,
    pub file_path: String,
    pub command: String,
    pub acceptance_criteria: Vec<String>,
}

/// The kind of filesystem change a [`CodeArtifact`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
}

/// A file created/modified/deleted by a worker, recorded on the task node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub file_path: String,
    pub content: Option<String>,
    pub change_type: ChangeType,
    pub created_at: DateTime<Utc>,
}

impl CodeArtifact {
    #[must_use]
    pub fn new(file_path: impl Into<String>, content: Option<String>, change_type: ChangeType) -> Self {
        Self {
            file_path: file_path.into(),
            content,
            change_type,
            created_at: Utc::now(),
        }
    }

    /// Dedup signature: `(change_type, file_path, content)` — artifact type
    /// is always `file` in this system, so it is omitted from the hash input
    /// (spec §3 invariant, §8 "Artifact dedup").
    #[must_use]
    pub fn signature(&self) -> ContentHash {
        let mut buf = Vec::new();
        buf.push(self.change_type as u8);
        buf.extend_from_slice(self.file_path.as_bytes());
        buf.push(0);
        if let Some(content) = &self.content {
            buf.extend_from_slice(content.as_bytes());
        }
        ContentHash::compute(&buf)
    }
}

/// An optional regression-scope hint (spec §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegressionScope {
    pub paths: Vec<String>,
    pub must_include_patterns: Vec<String>,
    pub must_exclude_patterns: Vec<String>,
}

/// A node in the task tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: TaskId,
    pub parent_id: Option<TaskId>,
    pub children: Vec<TaskId>,
    pub name: String,
    pub description: String,
    pub blueprint_module_id: Option<ModuleId>,
    pub process_ids: Vec<ProcessId>,
    pub status: TaskStatus,
    pub priority: u32,
    pub dependencies: Vec<TaskId>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub test_spec: Option<TestSpec>,
    pub acceptance_tests: Vec<AcceptanceTest>,
    pub code_artifacts: Vec<CodeArtifact>,
    pub checkpoints: Vec<CheckpointId>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskNode {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            parent_id: None,
            children: Vec::new(),
            name: name.into(),
            description: String::new(),
            blueprint_module_id: None,
            process_ids: Vec::new(),
            status: TaskStatus::Pending,
            priority: 0,
            dependencies: Vec::new(),
            retry_count: 0,
            max_retries: 3,
            test_spec: None,
            acceptance_tests: Vec::new(),
            code_artifacts: Vec::new(),
            checkpoints: Vec::new(),
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Is this a leaf task (no children)?
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// The task's regression-scope hint, if present in metadata.
    #[must_use]
    pub fn regression_scope(&self) -> Option<RegressionScope> {
        self.metadata
            .get("regressionScope")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Append a code artifact, deduplicating by signature (spec §3, §8).
    ///
    /// Returns `true` if the artifact was newly added.
    pub fn append_artifact(&mut self, artifact: CodeArtifact) -> bool {
        let sig = artifact.signature();
        if self.code_artifacts.iter().any(|a| a.signature() == sig) {
            return false;
        }
        self.code_artifacts.push(artifact);
        true
    }
}

/// Aggregate statistics tracked on a [`TaskTree`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskTreeStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub passed: usize,
    pub failed: usize,
    pub progress_percent: f64,
}

impl TaskTreeStats {
    /// Recompute from a flat list of leaf-reachable nodes.
    #[must_use]
    pub fn compute<'a>(nodes: impl Iterator<Item = &'a TaskNode>) -> Self {
        let mut stats = Self::default();
        for node in nodes {
            stats.total += 1;
            match node.status {
                TaskStatus::Passed => stats.passed += 1,
                TaskStatus::TestFailed | TaskStatus::Blocked => stats.failed += 1,
                TaskStatus::Pending | TaskStatus::Ready | TaskStatus::Skipped => stats.pending += 1,
                TaskStatus::TestWriting | TaskStatus::Testing | TaskStatus::Coding | TaskStatus::Refactoring => {
                    stats.running += 1;
                }
            }
        }
        stats.progress_percent = if stats.total == 0 {
            0.0
        } else {
            (stats.passed as f64 / stats.total as f64) * 100.0
        };
        stats
    }
}

/// The hierarchical, dependency-ordered execution plan derived from a blueprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTree {
    pub id: TaskTreeId,
    pub blueprint_id: crate::ids::BlueprintId,
    pub nodes: HashMap<TaskId, TaskNode>,
    pub root_id: TaskId,
    pub stats: TaskTreeStats,
    pub checkpoint_ids: Vec<CheckpointId>,
}

impl TaskTree {
    #[must_use]
    pub fn new(blueprint_id: crate::ids::BlueprintId, root: TaskNode) -> Self {
        let root_id = root.id;
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);
        Self {
            id: TaskTreeId::new(),
            blueprint_id,
            nodes,
            root_id,
            stats: TaskTreeStats::default(),
            checkpoint_ids: Vec::new(),
        }
    }

    /// Insert a node into the tree, wiring parent/child links.
    pub fn insert(&mut self, node: TaskNode) {
        if let Some(parent_id) = node.parent_id {
            if let Some(parent) = self.nodes.get_mut(&parent_id) {
                parent.children.push(node.id);
            }
        }
        self.nodes.insert(node.id, node);
    }

    #[must_use]
    pub fn node(&self, id: TaskId) -> Option<&TaskNode> {
        self.nodes.get(&id)
    }

    #[must_use]
    pub fn node_mut(&mut self, id: TaskId) -> Option<&mut TaskNode> {
        self.nodes.get_mut(&id)
    }

    /// All leaf nodes (tasks with no children) — the executable units.
    pub fn leaves(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.values().filter(|n| n.is_leaf())
    }

    /// Recompute `stats` from the current leaves (spec §4.2).
    pub fn recompute_stats(&mut self) {
        self.stats = TaskTreeStats::compute(self.leaves());
    }

    /// Whether every leaf has reached `passed` (spec §4.7 tick step 1).
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.leaves().all(|n| n.status == TaskStatus::Passed)
    }

    /// Deep clone, producing a structurally equal but identity-distinct tree
    /// (spec §8 round-trip law). `TaskTreeId`/`TaskId`s are preserved — the
    /// clone denotes "this tree's state at time T", not a new tree.
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        self.clone()
    }
}
