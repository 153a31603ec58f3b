//! Task-tree derivation, status tracking, checkpoints and time travel
//! (spec §4.2, §4.8).

use std::collections::HashMap;

use apiary_model::blueprint::Blueprint;
use apiary_model::checkpoint::{Checkpoint, CheckpointKind};
use apiary_model::ids::{CheckpointId, TaskId, TaskTreeId};
use apiary_model::tasktree::{AcceptanceTest, CodeArtifact, TaskNode, TaskStatus, TaskTree};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the task-tree manager.
#[derive(Debug, Error)]
pub enum TaskTreeError {
    #[error("task tree {0} not found")]
    TreeNotFound(TaskTreeId),
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
    #[error("checkpoint {0} not found")]
    CheckpointNotFound(CheckpointId),
    #[error("checkpoint {0} does not belong to tree {1}")]
    CheckpointTreeMismatch(CheckpointId, TaskTreeId),
    #[error("io error at {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("json error at {path}: {source}")]
    Json { path: String, source: serde_json::Error },
}

/// Generates the queen-authored, worker-immutable acceptance tests for a
/// leaf task. Invoked only at task creation (Design Notes resolution (b)),
/// never as an assignment-time fallback.
pub trait AcceptanceTestGenerator {
    fn generate(&self, task_name: &str, module_name: &str) -> Vec<AcceptanceTest>;
}

/// Generator used when no real test-authoring capability is wired in; each
/// leaf gets one acceptance test named after the task.
pub struct DefaultAcceptanceTestGenerator;

impl AcceptanceTestGenerator for DefaultAcceptanceTestGenerator {
    fn generate(&self, task_name: &str, module_name: &str) -> Vec<AcceptanceTest> {
        vec![AcceptanceTest::new(
            format!("{task_name} behaves as specified"),
            format!("tests/{module_name}/{task_name}.test.ts"),
            "npm test",
        )]
    }
}

/// Result of [`TaskTreeManager::can_start_task`].
#[derive(Debug, Clone)]
pub struct CanStartResult {
    pub can_start: bool,
    pub blockers: Vec<TaskId>,
}

/// Result of [`TaskTreeManager::preview_rollback`].
#[derive(Debug, Clone)]
pub struct RollbackPreview {
    pub from_checkpoint: CheckpointId,
    pub impacted_tasks: Vec<TaskId>,
    pub lost_artifacts: Vec<String>,
}

/// A row in [`TaskTreeManager::get_timeline_view`].
#[derive(Debug, Clone)]
pub struct TimelineCheckpointSummary {
    pub id: CheckpointId,
    pub name: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub scope: CheckpointScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointScope {
    Global,
    PerTask(TaskId),
}

/// Owns every task tree and the checkpoints taken against it.
#[derive(Default)]
pub struct TaskTreeManager {
    trees: HashMap<TaskTreeId, TaskTree>,
    checkpoints: HashMap<CheckpointId, Checkpoint>,
}

impl TaskTreeManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives a task tree from a blueprint (spec §4.2 `generateFromBlueprint`).
    pub fn generate_from_blueprint(&mut self, blueprint: &Blueprint, generator: &dyn AcceptanceTestGenerator) -> TaskTreeId {
        let mut root = TaskNode::new(blueprint.name.clone());
        root.description = format!("root task for blueprint '{}'", blueprint.name);

        let mut tree = TaskTree::new(blueprint.id, root);
        let root_id = tree.root_id;

        // module_id -> leaf task ids belonging to that module, for the
        // dependency-translation pass below.
        let mut module_leaf_ids: HashMap<apiary_model::ids::ModuleId, Vec<TaskId>> = HashMap::new();

        for module in &blueprint.modules {
            let mut module_node = TaskNode::new(module.name.clone());
            module_node.parent_id = Some(root_id);
            module_node.blueprint_module_id = Some(module.id);
            let module_node_id = module_node.id;
            tree.insert(module_node);

            let mut leaf_ids = Vec::new();
            if module.responsibilities.is_empty() {
                let mut leaf = TaskNode::new(format!("implement {}", module.name));
                leaf.parent_id = Some(module_node_id);
                leaf.blueprint_module_id = Some(module.id);
                leaf_ids.push(leaf.id);
                tree.insert(leaf);
            } else {
                for responsibility in &module.responsibilities {
                    let mut leaf = TaskNode::new(responsibility.clone());
                    leaf.parent_id = Some(module_node_id);
                    leaf.blueprint_module_id = Some(module.id);
                    leaf_ids.push(leaf.id);
                    tree.insert(leaf);
                }
            }
            module_leaf_ids.insert(module.id, leaf_ids);
        }

        // Translate module dependencies into task dependencies: every leaf
        // of module M depends on every leaf of each module in M.dependencies.
        for module in &blueprint.modules {
            let Some(leaf_ids) = module_leaf_ids.get(&module.id).cloned() else { continue };
            let mut deps: Vec<TaskId> = Vec::new();
            for dep_module_id in &module.dependencies {
                if let Some(dep_leaf_ids) = module_leaf_ids.get(dep_module_id) {
                    deps.extend(dep_leaf_ids.iter().copied());
                }
            }
            for leaf_id in leaf_ids {
                if let Some(node) = tree.node_mut(leaf_id) {
                    node.dependencies.extend(deps.iter().copied());
                }
            }
        }

        // Generate acceptance tests for every leaf before it becomes
        // executable, then compute initial status.
        let leaf_ids: Vec<TaskId> = tree.leaves().map(|n| n.id).collect();
        for leaf_id in &leaf_ids {
            let (name, module_name) = {
                let node = tree.node(*leaf_id).expect("leaf exists");
                let module_name = node
                    .blueprint_module_id
                    .and_then(|m| blueprint.module(m))
                    .map(|m| m.name.clone())
                    .unwrap_or_default();
                (node.name.clone(), module_name)
            };
            let tests = generator.generate(&name, &module_name);
            let node = tree.node_mut(*leaf_id).expect("leaf exists");
            node.acceptance_tests = tests;
            node.status = if node.dependencies.is_empty() {
                TaskStatus::Ready
            } else {
                TaskStatus::Pending
            };
        }

        tree.recompute_stats();
        let tree_id = tree.id;
        self.trees.insert(tree_id, tree);
        tree_id
    }

    #[must_use]
    pub fn get_tree(&self, tree_id: TaskTreeId) -> Option<&TaskTree> {
        self.trees.get(&tree_id)
    }

    #[must_use]
    pub fn get_node(&self, tree_id: TaskTreeId, task_id: TaskId) -> Option<&TaskNode> {
        self.trees.get(&tree_id)?.node(task_id)
    }

    fn tree_mut(&mut self, tree_id: TaskTreeId) -> Result<&mut TaskTree, TaskTreeError> {
        self.trees.get_mut(&tree_id).ok_or(TaskTreeError::TreeNotFound(tree_id))
    }

    /// A task may start iff it is `ready`, or `test_failed` with retries
    /// remaining; blockers list unmet dependency ids.
    pub fn can_start_task(&self, tree_id: TaskTreeId, task_id: TaskId) -> Result<CanStartResult, TaskTreeError> {
        let tree = self.trees.get(&tree_id).ok_or(TaskTreeError::TreeNotFound(tree_id))?;
        let node = tree.node(task_id).ok_or(TaskTreeError::TaskNotFound(task_id))?;

        let blockers: Vec<TaskId> = node
            .dependencies
            .iter()
            .filter(|dep_id| tree.node(**dep_id).map(|d| d.status != TaskStatus::Passed).unwrap_or(true))
            .copied()
            .collect();

        let status_eligible = match node.status {
            TaskStatus::Ready => true,
            TaskStatus::TestFailed => node.retry_count < node.max_retries,
            _ => false,
        };

        Ok(CanStartResult {
            can_start: status_eligible && blockers.is_empty(),
            blockers,
        })
    }

    /// Tasks in status `ready` or retriable `test_failed` whose dependencies
    /// are all `passed`, ordered by priority then id.
    #[must_use]
    pub fn get_executable_tasks(&self, tree_id: TaskTreeId) -> Vec<TaskId> {
        let Some(tree) = self.trees.get(&tree_id) else { return Vec::new() };
        let mut candidates: Vec<&TaskNode> = tree
            .leaves()
            .filter(|node| {
                let eligible = match node.status {
                    TaskStatus::Ready => true,
                    TaskStatus::TestFailed => node.retry_count < node.max_retries,
                    _ => false,
                };
                eligible && node.dependencies.iter().all(|dep| tree.node(*dep).map(|d| d.status == TaskStatus::Passed).unwrap_or(false))
            })
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        candidates.into_iter().map(|n| n.id).collect()
    }

    /// Updates a task's status, recomputes stats, and for terminal statuses
    /// unblocks dependents whose parents have all passed.
    pub fn update_task_status(&mut self, tree_id: TaskTreeId, task_id: TaskId, new_status: TaskStatus) -> Result<(), TaskTreeError> {
        let tree = self.tree_mut(tree_id)?;
        {
            let node = tree.node_mut(task_id).ok_or(TaskTreeError::TaskNotFound(task_id))?;
            if new_status == TaskStatus::TestFailed && node.status != TaskStatus::Passed {
                node.retry_count += 1;
            }
            node.status = new_status;
        }

        if new_status == TaskStatus::Passed {
            let dependents: Vec<TaskId> = tree
                .leaves()
                .filter(|n| n.status == TaskStatus::Pending && n.dependencies.contains(&task_id))
                .map(|n| n.id)
                .collect();
            for dep_id in dependents {
                let all_passed = {
                    let node = tree.node(dep_id).expect("just collected");
                    node.dependencies.iter().all(|d| tree.node(*d).map(|n| n.status == TaskStatus::Passed).unwrap_or(false))
                };
                if all_passed {
                    tree.node_mut(dep_id).expect("just collected").status = TaskStatus::Ready;
                }
            }
        }

        tree.recompute_stats();
        Ok(())
    }

    /// Appends code artifacts to a task, deduplicating by signature.
    pub fn append_code_artifacts(&mut self, tree_id: TaskTreeId, task_id: TaskId, artifacts: Vec<CodeArtifact>) -> Result<usize, TaskTreeError> {
        let tree = self.tree_mut(tree_id)?;
        let node = tree.node_mut(task_id).ok_or(TaskTreeError::TaskNotFound(task_id))?;
        let mut added = 0;
        for artifact in artifacts {
            if node.append_artifact(artifact) {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Deep-clones the tree, assigns a checkpoint id, appends it to
    /// `tree.checkpoint_ids`.
    pub fn create_global_checkpoint(&mut self, tree_id: TaskTreeId, name: impl Into<String>, description: impl Into<String>) -> Result<CheckpointId, TaskTreeError> {
        let tree = self.trees.get(&tree_id).ok_or(TaskTreeError::TreeNotFound(tree_id))?;
        let snapshot = tree.deep_clone();
        let checkpoint = Checkpoint::global(tree_id, name, description, snapshot);
        let checkpoint_id = checkpoint.id;
        self.checkpoints.insert(checkpoint_id, checkpoint);
        self.trees.get_mut(&tree_id).expect("checked above").checkpoint_ids.push(checkpoint_id);
        Ok(checkpoint_id)
    }

    /// Stores a per-task snapshot on that node.
    pub fn create_task_checkpoint(&mut self, tree_id: TaskTreeId, task_id: TaskId, name: impl Into<String>, description: impl Into<String>) -> Result<CheckpointId, TaskTreeError> {
        let tree = self.trees.get(&tree_id).ok_or(TaskTreeError::TreeNotFound(tree_id))?;
        let node = tree.node(task_id).ok_or(TaskTreeError::TaskNotFound(task_id))?.clone();
        let checkpoint = Checkpoint::per_task(tree_id, name, description, task_id, node);
        let checkpoint_id = checkpoint.id;
        self.checkpoints.insert(checkpoint_id, checkpoint);
        self.trees.get_mut(&tree_id).expect("checked above").checkpoint_ids.push(checkpoint_id);
        Ok(checkpoint_id)
    }

    /// Replaces the current tree (global checkpoint) or a single node
    /// (per-task checkpoint) with the snapshot. The checkpoint log itself is
    /// untouched (append-only).
    pub fn rollback(&mut self, tree_id: TaskTreeId, checkpoint_id: CheckpointId) -> Result<(), TaskTreeError> {
        let checkpoint = self.checkpoints.get(&checkpoint_id).ok_or(TaskTreeError::CheckpointNotFound(checkpoint_id))?;
        if checkpoint.task_tree_id != tree_id {
            return Err(TaskTreeError::CheckpointTreeMismatch(checkpoint_id, tree_id));
        }

        match checkpoint.kind.clone() {
            CheckpointKind::Global { tree: snapshot } => {
                let mut restored = *snapshot;
                // the checkpoint log accumulated since the snapshot must survive.
                let current_checkpoint_ids = self.trees[&tree_id].checkpoint_ids.clone();
                restored.checkpoint_ids = current_checkpoint_ids;
                self.trees.insert(tree_id, restored);
            }
            CheckpointKind::PerTask { task_id, node } => {
                let tree = self.tree_mut(tree_id)?;
                tree.nodes.insert(task_id, *node);
                tree.recompute_stats();
            }
        }

        tracing::info!(tree_id = %tree_id, checkpoint_id = %checkpoint_id, "rolled back");
        Ok(())
    }

    /// Computes rollback impact without mutating state.
    pub fn preview_rollback(&self, tree_id: TaskTreeId, checkpoint_id: CheckpointId) -> Result<RollbackPreview, TaskTreeError> {
        let checkpoint = self.checkpoints.get(&checkpoint_id).ok_or(TaskTreeError::CheckpointNotFound(checkpoint_id))?;
        if checkpoint.task_tree_id != tree_id {
            return Err(TaskTreeError::CheckpointTreeMismatch(checkpoint_id, tree_id));
        }
        let current = self.trees.get(&tree_id).ok_or(TaskTreeError::TreeNotFound(tree_id))?;

        let mut impacted_tasks = Vec::new();
        let mut lost_artifacts = Vec::new();

        match &checkpoint.kind {
            CheckpointKind::Global { tree: snapshot } => {
                for (id, current_node) in &current.nodes {
                    match snapshot.node(*id) {
                        Some(snap_node) => {
                            if snap_node.status != current_node.status {
                                impacted_tasks.push(*id);
                            }
                            for artifact in &current_node.code_artifacts {
                                if !snap_node.code_artifacts.iter().any(|a| a.signature() == artifact.signature()) {
                                    lost_artifacts.push(artifact.file_path.clone());
                                }
                            }
                        }
                        None => impacted_tasks.push(*id),
                    }
                }
            }
            CheckpointKind::PerTask { task_id, node: snap_node } => {
                if let Some(current_node) = current.node(*task_id) {
                    if snap_node.status != current_node.status {
                        impacted_tasks.push(*task_id);
                    }
                    for artifact in &current_node.code_artifacts {
                        if !snap_node.code_artifacts.iter().any(|a| a.signature() == artifact.signature()) {
                            lost_artifacts.push(artifact.file_path.clone());
                        }
                    }
                }
            }
        }

        Ok(RollbackPreview {
            from_checkpoint: checkpoint_id,
            impacted_tasks,
            lost_artifacts,
        })
    }

    /// Checkpoints for a tree, plus their scope, ordered by creation time.
    #[must_use]
    pub fn get_timeline_view(&self, tree_id: TaskTreeId) -> Vec<TimelineCheckpointSummary> {
        let Some(tree) = self.trees.get(&tree_id) else { return Vec::new() };
        tree.checkpoint_ids
            .iter()
            .filter_map(|id| self.checkpoints.get(id))
            .map(|cp| TimelineCheckpointSummary {
                id: cp.id,
                name: cp.name.clone(),
                timestamp: cp.timestamp,
                scope: match cp.task_id() {
                    Some(task_id) => CheckpointScope::PerTask(task_id),
                    None => CheckpointScope::Global,
                },
            })
            .collect()
    }

    /// Human-readable vertical rendering of a tree's checkpoint timeline.
    #[must_use]
    pub fn generate_timeline_ascii(&self, tree_id: TaskTreeId) -> String {
        let entries = self.get_timeline_view(tree_id);
        if entries.is_empty() {
            return "(no checkpoints)".to_string();
        }
        let mut out = String::new();
        for (i, entry) in entries.iter().enumerate() {
            let scope = match entry.scope {
                CheckpointScope::Global => "global".to_string(),
                CheckpointScope::PerTask(task_id) => format!("task {task_id}"),
            };
            out.push_str(&format!("{} [{}] {} ({}) — {}\n", if i == 0 { "o" } else { "|\no" }, entry.timestamp.to_rfc3339(), entry.name, scope, entry.id));
        }
        out
    }

    /// Exports `tree_id`'s tree plus every checkpoint taken against it, for
    /// callers that need to persist and reload a session across process
    /// invocations (task-tree persistence is implementation-defined, spec §6).
    pub fn export_tree(&self, tree_id: TaskTreeId) -> Result<TaskTreeSnapshot, TaskTreeError> {
        let tree = self.trees.get(&tree_id).ok_or(TaskTreeError::TreeNotFound(tree_id))?.clone();
        let checkpoints = tree.checkpoint_ids.iter().filter_map(|id| self.checkpoints.get(id).cloned()).collect();
        Ok(TaskTreeSnapshot { tree, checkpoints })
    }

    /// Registers a previously exported snapshot under its original tree id,
    /// so `get_tree`, `rollback` and friends behave as if it had never left
    /// memory.
    pub fn import_tree(&mut self, snapshot: TaskTreeSnapshot) -> TaskTreeId {
        let tree_id = snapshot.tree.id;
        self.trees.insert(tree_id, snapshot.tree);
        for checkpoint in snapshot.checkpoints {
            self.checkpoints.insert(checkpoint.id, checkpoint);
        }
        tree_id
    }
}

/// A task tree together with every checkpoint taken against it; the unit of
/// on-disk persistence for a task-tree session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTreeSnapshot {
    pub tree: TaskTree,
    pub checkpoints: Vec<Checkpoint>,
}

impl TaskTreeSnapshot {
    /// Writes the snapshot to `<project_path>/.tasktree/<tree_id>.json`.
    pub fn save(&self, project_path: &std::path::Path) -> Result<std::path::PathBuf, TaskTreeError> {
        let dir = project_path.join(".tasktree");
        std::fs::create_dir_all(&dir).map_err(|source| TaskTreeError::Io { path: dir.display().to_string(), source })?;
        let path = dir.join(format!("{}.json", self.tree.id));
        let json = serde_json::to_string_pretty(self).map_err(|source| TaskTreeError::Json { path: path.display().to_string(), source })?;
        std::fs::write(&path, json).map_err(|source| TaskTreeError::Io { path: path.display().to_string(), source })?;
        Ok(path)
    }

    /// Loads a snapshot previously written by [`TaskTreeSnapshot::save`].
    pub fn load(project_path: &std::path::Path, tree_id: TaskTreeId) -> Result<Self, TaskTreeError> {
        let path = project_path.join(".tasktree").join(format!("{tree_id}.json"));
        let contents = std::fs::read_to_string(&path).map_err(|source| TaskTreeError::Io { path: path.display().to_string(), source })?;
        serde_json::from_str(&contents).map_err(|source| TaskTreeError::Json { path: path.display().to_string(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiary_model::blueprint::{Blueprint, BusinessProcess, Module, ModuleType};

    fn blueprint_with_two_modules() -> Blueprint {
        let mut bp = Blueprint::new("proj", "desc", "/tmp/p");
        bp.add_process(BusinessProcess::new("p", "d").with_step("s", "d"));
        let a = Module::new("a", ModuleType::Backend).with_responsibilities(vec!["own a.ts".to_string()]);
        let a_id = a.id;
        bp.add_module(a);
        bp.add_module(Module::new("b", ModuleType::Backend).depends_on(a_id).with_responsibilities(vec!["own b.ts".to_string()]));
        bp
    }

    #[test]
    fn generate_from_blueprint_wires_deps_and_status() {
        let bp = blueprint_with_two_modules();
        let mut mgr = TaskTreeManager::new();
        let tree_id = mgr.generate_from_blueprint(&bp, &DefaultAcceptanceTestGenerator);

        let tree = mgr.get_tree(tree_id).unwrap();
        assert_eq!(tree.stats.total, 2);

        let ready: Vec<&TaskNode> = tree.leaves().filter(|n| n.status == TaskStatus::Ready).collect();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].name, "own a.ts");

        let pending: Vec<&TaskNode> = tree.leaves().filter(|n| n.status == TaskStatus::Pending).collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].acceptance_tests.len(), 1);
    }

    #[test]
    fn passing_dependency_unblocks_dependent() {
        let bp = blueprint_with_two_modules();
        let mut mgr = TaskTreeManager::new();
        let tree_id = mgr.generate_from_blueprint(&bp, &DefaultAcceptanceTestGenerator);

        let (a_id, b_id) = {
            let tree = mgr.get_tree(tree_id).unwrap();
            let a = tree.leaves().find(|n| n.name == "own a.ts").unwrap().id;
            let b = tree.leaves().find(|n| n.name == "own b.ts").unwrap().id;
            (a, b)
        };

        assert_eq!(mgr.get_node(tree_id, b_id).unwrap().status, TaskStatus::Pending);
        mgr.update_task_status(tree_id, a_id, TaskStatus::Passed).unwrap();
        assert_eq!(mgr.get_node(tree_id, b_id).unwrap().status, TaskStatus::Ready);
    }

    #[test]
    fn executable_tasks_respect_dependencies_and_priority() {
        let bp = blueprint_with_two_modules();
        let mut mgr = TaskTreeManager::new();
        let tree_id = mgr.generate_from_blueprint(&bp, &DefaultAcceptanceTestGenerator);

        let executable = mgr.get_executable_tasks(tree_id);
        assert_eq!(executable.len(), 1);
    }

    #[test]
    fn global_checkpoint_and_rollback_round_trip() {
        let bp = blueprint_with_two_modules();
        let mut mgr = TaskTreeManager::new();
        let tree_id = mgr.generate_from_blueprint(&bp, &DefaultAcceptanceTestGenerator);
        let a_id = mgr.get_tree(tree_id).unwrap().leaves().find(|n| n.name == "own a.ts").unwrap().id;

        let checkpoint_id = mgr.create_global_checkpoint(tree_id, "before-coding", "").unwrap();
        mgr.update_task_status(tree_id, a_id, TaskStatus::Passed).unwrap();
        assert_eq!(mgr.get_node(tree_id, a_id).unwrap().status, TaskStatus::Passed);

        mgr.rollback(tree_id, checkpoint_id).unwrap();
        assert_eq!(mgr.get_node(tree_id, a_id).unwrap().status, TaskStatus::Ready);
        // checkpoint log itself survives the rollback
        assert_eq!(mgr.get_tree(tree_id).unwrap().checkpoint_ids.len(), 1);
    }

    #[test]
    fn preview_rollback_does_not_mutate() {
        let bp = blueprint_with_two_modules();
        let mut mgr = TaskTreeManager::new();
        let tree_id = mgr.generate_from_blueprint(&bp, &DefaultAcceptanceTestGenerator);
        let a_id = mgr.get_tree(tree_id).unwrap().leaves().find(|n| n.name == "own a.ts").unwrap().id;

        let checkpoint_id = mgr.create_global_checkpoint(tree_id, "before-coding", "").unwrap();
        mgr.update_task_status(tree_id, a_id, TaskStatus::Passed).unwrap();

        let preview = mgr.preview_rollback(tree_id, checkpoint_id).unwrap();
        assert!(preview.impacted_tasks.contains(&a_id));
        assert_eq!(mgr.get_node(tree_id, a_id).unwrap().status, TaskStatus::Passed);
    }

    #[test]
    fn timeline_ascii_lists_checkpoints() {
        let bp = blueprint_with_two_modules();
        let mut mgr = TaskTreeManager::new();
        let tree_id = mgr.generate_from_blueprint(&bp, &DefaultAcceptanceTestGenerator);
        mgr.create_global_checkpoint(tree_id, "first", "").unwrap();
        mgr.create_global_checkpoint(tree_id, "second", "").unwrap();

        let ascii = mgr.generate_timeline_ascii(tree_id);
        assert!(ascii.contains("first"));
        assert!(ascii.contains("second"));
    }

    #[test]
    fn exported_snapshot_round_trips_through_disk() {
        let bp = blueprint_with_two_modules();
        let mut mgr = TaskTreeManager::new();
        let tree_id = mgr.generate_from_blueprint(&bp, &DefaultAcceptanceTestGenerator);
        mgr.create_global_checkpoint(tree_id, "first", "").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let snapshot = mgr.export_tree(tree_id).unwrap();
        snapshot.save(dir.path()).unwrap();

        let loaded = TaskTreeSnapshot::load(dir.path(), tree_id).unwrap();
        assert_eq!(loaded.tree.id, tree_id);
        assert_eq!(loaded.checkpoints.len(), 1);

        let mut mgr2 = TaskTreeManager::new();
        mgr2.import_tree(loaded);
        assert_eq!(mgr2.get_timeline_view(tree_id).len(), 1);
    }
}
