//! Pre-commit regression gate (spec §4.6).
//!
//! Before a worker's task is marked `passed`, the coordinator builds a
//! [`WorkerSubmission`] describing everything the worker touched, and runs
//! it past an injected [`RegressionValidator`].

use std::path::Path;

use apiary_model::ids::TaskId;
use apiary_model::tasktree::{ChangeType, CodeArtifact, RegressionScope};
use thiserror::Error;

/// Errors produced by the regression gate.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

/// Repo-relative, forward-slash-normalized file changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileChanges {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

/// The git state captured at task assignment, used as the diff baseline.
#[derive(Debug, Clone)]
pub struct GitBaseline {
    pub head_sha: String,
}

/// Captures the current `HEAD` SHA as a diff baseline. Returns `None` if
/// `repo_root` is not inside a git repository (spec's non-git fallback).
pub fn capture_git_baseline(repo_root: &Path) -> Result<Option<GitBaseline>, GateError> {
    let repo = match git2::Repository::open(repo_root) {
        Ok(repo) => repo,
        Err(_) => return Ok(None),
    };
    let head_sha = repo.head()?.peel_to_commit()?.id().to_string();
    Ok(Some(GitBaseline { head_sha }))
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// Diffs a worker's *sandbox* copy of its tracked files against `baseline`
/// (spec §4.6). A worker "reads and writes only inside the sandbox
/// directory" (spec §4.4), so the "current working tree" the gate diffs is
/// the sandbox, not the real project root — the real tree is only touched
/// once a submission passes and is synced back.
fn diff_against_baseline(repo_root: &Path, sandbox_dir: &Path, tracked_paths: &[String], baseline: &GitBaseline) -> Result<FileChanges, GateError> {
    let repo = git2::Repository::open(repo_root)?;
    let oid = git2::Oid::from_str(&baseline.head_sha)?;
    let tree = repo.find_commit(oid)?.tree()?;

    let mut changes = FileChanges::default();
    for path in tracked_paths {
        let path = normalize(path);
        let baseline_entry = tree.get_path(Path::new(&path)).ok();
        let sandbox_path = sandbox_dir.join(&path);

        match (baseline_entry, sandbox_path.is_file()) {
            (None, true) => changes.added.push(path),
            (Some(_), false) => changes.deleted.push(path),
            (None, false) => {}
            (Some(entry), true) => {
                let blob = repo.find_blob(entry.id())?;
                let current = std::fs::read(&sandbox_path).unwrap_or_default();
                if blob.content() != current.as_slice() {
                    changes.modified.push(path);
                }
            }
        }
    }
    Ok(changes)
}

/// Classifies the task's recorded artifacts when there is no git baseline.
fn changes_from_artifacts(artifacts: &[CodeArtifact]) -> FileChanges {
    let mut changes = FileChanges::default();
    for artifact in artifacts {
        let path = normalize(&artifact.file_path);
        match artifact.change_type {
            ChangeType::Create => changes.added.push(path),
            ChangeType::Modify => changes.modified.push(path),
            ChangeType::Delete => changes.deleted.push(path),
        }
    }
    changes
}

/// Everything the regression gate needs to judge one worker's task
/// completion (spec §4.6).
#[derive(Debug, Clone)]
pub struct WorkerSubmission {
    pub worker_id: String,
    pub task_id: TaskId,
    pub task_name: String,
    pub changes: FileChanges,
    pub new_test_files: Vec<String>,
    pub regression_scope: Option<RegressionScope>,
}

/// Inputs needed to build a [`WorkerSubmission`] (spec §4.6).
pub struct SubmissionRequest<'a> {
    pub repo_root: &'a Path,
    /// The worker's sandbox directory, required to diff against `baseline`.
    /// `None` when the caller has no sandbox (e.g. unit tests exercising the
    /// non-git fallback directly).
    pub sandbox_dir: Option<&'a Path>,
    /// Every path the worker's sandbox currently tracks, diffed against the
    /// baseline tree when one is available.
    pub tracked_paths: &'a [String],
    pub baseline: Option<&'a GitBaseline>,
    pub fallback_artifacts: &'a [CodeArtifact],
    pub worker_id: String,
    pub task_id: TaskId,
    pub task_name: String,
    pub new_test_files: Vec<String>,
    pub regression_scope: Option<RegressionScope>,
}

/// Builds a [`WorkerSubmission`], diffing the worker's sandbox against
/// `baseline` when both a baseline and a sandbox are present, and falling
/// back to the task's recorded artifacts otherwise (non-git repos, or
/// callers with no sandbox to diff).
pub fn build_submission(request: SubmissionRequest<'_>) -> Result<WorkerSubmission, GateError> {
    let changes = match (request.baseline, request.sandbox_dir) {
        (Some(baseline), Some(sandbox_dir)) => diff_against_baseline(request.repo_root, sandbox_dir, request.tracked_paths, baseline)?,
        _ => changes_from_artifacts(request.fallback_artifacts),
    };
    Ok(WorkerSubmission {
        worker_id: request.worker_id,
        task_id: request.task_id,
        task_name: request.task_name,
        changes,
        new_test_files: request.new_test_files.into_iter().map(|p| normalize(&p)).collect(),
        regression_scope: request.regression_scope,
    })
}

/// The outcome of running a [`WorkerSubmission`] past a [`RegressionValidator`].
#[derive(Debug, Clone)]
pub struct GateVerdict {
    pub passed: bool,
    pub reasons: Vec<String>,
}

/// An injectable external check run against a worker's submission before it
/// is allowed to land (spec §4.6 "optional external validator").
pub trait RegressionValidator: Send + Sync {
    fn validate(&self, submission: &WorkerSubmission) -> GateVerdict;
}

/// Default validator: always approves. Useful for tests and as a CLI stub
/// until a real regression-test runner is wired in.
#[derive(Debug, Default)]
pub struct PermissiveValidator;

impl RegressionValidator for PermissiveValidator {
    fn validate(&self, _submission: &WorkerSubmission) -> GateVerdict {
        GateVerdict {
            passed: true,
            reasons: Vec::new(),
        }
    }
}

/// Runs submissions past an injected validator, logging the verdict.
pub struct RegressionGate {
    validator: Box<dyn RegressionValidator>,
}

impl RegressionGate {
    #[must_use]
    pub fn new(validator: Box<dyn RegressionValidator>) -> Self {
        Self { validator }
    }

    pub fn evaluate(&self, submission: &WorkerSubmission) -> GateVerdict {
        let verdict = self.validator.validate(submission);
        if verdict.passed {
            tracing::info!(task_id = %submission.task_id, worker_id = %submission.worker_id, "regression gate passed");
        } else {
            tracing::warn!(task_id = %submission.task_id, worker_id = %submission.worker_id, reasons = ?verdict.reasons, "regression gate rejected submission");
        }
        verdict
    }
}

impl Default for RegressionGate {
    fn default() -> Self {
        Self::new(Box::new(PermissiveValidator))
    }
}

/// Builds [`CodeArtifact`]s for every changed path in `submission` not
/// already present in `existing` (deduplicated by signature, spec §4.6).
/// Deleted paths are archived with `content: None`.
#[must_use]
pub fn archive_unrecorded_changes(repo_root: &Path, submission: &WorkerSubmission, existing: &[CodeArtifact]) -> Vec<CodeArtifact> {
    let mut archived = Vec::new();
    let mut seen = existing.iter().map(CodeArtifact::signature).collect::<Vec<_>>();

    let mut push = |path: &str, change_type: ChangeType| {
        let content = if change_type == ChangeType::Delete {
            None
        } else {
            std::fs::read_to_string(repo_root.join(path)).ok()
        };
        let artifact = CodeArtifact::new(path, content, change_type);
        let sig = artifact.signature();
        if seen.contains(&sig) {
            return;
        }
        seen.push(sig);
        archived.push(artifact);
    };

    for path in &submission.changes.added {
        push(path, ChangeType::Create);
    }
    for path in &submission.changes.modified {
        push(path, ChangeType::Modify);
    }
    for path in &submission.changes.deleted {
        push(path, ChangeType::Delete);
    }
    archived
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(path: &str, content: &str, change_type: ChangeType) -> CodeArtifact {
        CodeArtifact::new(path, Some(content.to_string()), change_type)
    }

    fn init_repo_with_file(dir: &Path, rel_path: &str, content: &str) -> git2::Repository {
        let repo = git2::Repository::init(dir).unwrap();
        std::fs::write(dir.join(rel_path), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(rel_path)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        {
            let tree = repo.find_tree(tree_id).unwrap();
            let sig = git2::Signature::now("test", "test@example.com").unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        }
        repo
    }

    #[test]
    fn git_baseline_diffs_sandbox_copy_not_real_tree() {
        let repo_dir = tempfile::tempdir().unwrap();
        init_repo_with_file(repo_dir.path(), "a.ts", "original");
        let baseline = capture_git_baseline(repo_dir.path()).unwrap().expect("repo has a HEAD commit");

        // Simulate another worker's concurrent, already-synced change to the
        // real tree; the gate must not see it, since it diffs the sandbox.
        std::fs::write(repo_dir.path().join("a.ts"), "changed by someone else").unwrap();

        let sandbox_dir = tempfile::tempdir().unwrap();
        std::fs::write(sandbox_dir.path().join("a.ts"), "original").unwrap();
        std::fs::write(sandbox_dir.path().join("b.ts"), "new file").unwrap();

        let submission = build_submission(SubmissionRequest {
            repo_root: repo_dir.path(),
            sandbox_dir: Some(sandbox_dir.path()),
            tracked_paths: &["a.ts".to_string(), "b.ts".to_string()],
            baseline: Some(&baseline),
            fallback_artifacts: &[],
            worker_id: "worker-1".to_string(),
            task_id: TaskId::new(),
            task_name: "task".to_string(),
            new_test_files: vec![],
            regression_scope: None,
        })
        .unwrap();

        assert!(submission.changes.modified.is_empty(), "sandbox copy of a.ts is unchanged from baseline");
        assert_eq!(submission.changes.added, vec!["b.ts".to_string()]);
    }

    #[test]
    fn non_git_fallback_classifies_by_artifact_change_type() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = capture_git_baseline(dir.path()).unwrap();
        assert!(baseline.is_none());

        let artifacts = vec![
            artifact("a.ts", "x", ChangeType::Create),
            artifact("b.ts", "y", ChangeType::Modify),
            artifact("c.ts", "z", ChangeType::Delete),
        ];
        let submission = build_submission(SubmissionRequest {
            repo_root: dir.path(),
            sandbox_dir: None,
            tracked_paths: &[],
            baseline: None,
            fallback_artifacts: &artifacts,
            worker_id: "worker-1".to_string(),
            task_id: TaskId::new(),
            task_name: "task".to_string(),
            new_test_files: vec!["tests/a.test.ts".to_string()],
            regression_scope: None,
        })
        .unwrap();

        assert_eq!(submission.changes.added, vec!["a.ts".to_string()]);
        assert_eq!(submission.changes.modified, vec!["b.ts".to_string()]);
        assert_eq!(submission.changes.deleted, vec!["c.ts".to_string()]);
    }

    #[test]
    fn permissive_validator_always_passes() {
        let gate = RegressionGate::default();
        let submission = WorkerSubmission {
            worker_id: "w1".to_string(),
            task_id: TaskId::new(),
            task_name: "t".to_string(),
            changes: FileChanges::default(),
            new_test_files: Vec::new(),
            regression_scope: None,
        };
        let verdict = gate.evaluate(&submission);
        assert!(verdict.passed);
    }

    struct RejectingValidator;
    impl RegressionValidator for RejectingValidator {
        fn validate(&self, _submission: &WorkerSubmission) -> GateVerdict {
            GateVerdict {
                passed: false,
                reasons: vec!["broke regression suite".to_string()],
            }
        }
    }

    #[test]
    fn custom_validator_can_reject() {
        let gate = RegressionGate::new(Box::new(RejectingValidator));
        let submission = WorkerSubmission {
            worker_id: "w1".to_string(),
            task_id: TaskId::new(),
            task_name: "t".to_string(),
            changes: FileChanges::default(),
            new_test_files: Vec::new(),
            regression_scope: None,
        };
        let verdict = gate.evaluate(&submission);
        assert!(!verdict.passed);
        assert_eq!(verdict.reasons, vec!["broke regression suite".to_string()]);
    }

    #[test]
    fn archive_unrecorded_changes_dedups_against_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "content").unwrap();

        let existing = vec![artifact("a.ts", "content", ChangeType::Create)];
        let submission = WorkerSubmission {
            worker_id: "w1".to_string(),
            task_id: TaskId::new(),
            task_name: "t".to_string(),
            changes: FileChanges {
                added: vec!["a.ts".to_string(), "b.ts".to_string()],
                modified: Vec::new(),
                deleted: Vec::new(),
            },
            new_test_files: Vec::new(),
            regression_scope: None,
        };

        let archived = archive_unrecorded_changes(dir.path(), &submission, &existing);
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].file_path, "b.ts");
    }
}
