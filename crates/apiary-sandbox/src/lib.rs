//! Per-worker isolated working copies (spec §4.4).
//!
//! A sandbox is a `<baseDir>/.sandbox/<workerId>-<taskId>/` directory holding
//! a private copy of the files a worker is touching. File access crossing
//! the sandbox boundary is mediated by [`apiary_lock::FileLockManager`].

use std::collections::HashMap;
use std::path::PathBuf;

use apiary_lock::FileLockManager;
use apiary_model::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directory name under which all sandboxes live.
pub const SANDBOX_DIR: &str = ".sandbox";

/// Marker file name written into each sandbox.
pub const METADATA_FILE: &str = ".sandbox-metadata.json";

/// Errors produced by sandbox operations.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to acquire lock on '{path}'")]
    LockFailed { path: String },
    #[error("io error at '{path}': {source}")]
    Io { path: String, source: std::io::Error },
    #[error("failed to (de)serialize sandbox metadata at '{path}': {source}")]
    Json { path: String, source: serde_json::Error },
    #[error("sandbox sync conflict on {paths:?}: base dir was modified since the sandbox copy was taken")]
    SandboxSyncConflict { paths: Vec<String> },
}

/// Configuration for constructing [`Sandbox`]es (spec supplement — exposed
/// as a constructor param rather than hard-coded).
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub base_dir: PathBuf,
    pub lock_ttl_ms: Option<u64>,
}

impl SandboxConfig {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            lock_ttl_ms: None,
        }
    }
}

/// Sandbox marker metadata, written to `.sandbox-metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxMetadata {
    pub worker_id: String,
    pub task_id: String,
    pub created_at: DateTime<Utc>,
    pub base_dir: String,
}

/// A file tracked in the sandbox, along with the content hash of the
/// base-dir copy at the moment it was pulled in (for conflict detection).
#[derive(Debug, Clone)]
struct TrackedFile {
    hash_at_copy: ContentHash,
    deleted: bool,
}

/// Result of a [`Sandbox::sync_back`] call.
#[derive(Debug, Clone, Default)]
pub struct SyncBackResult {
    pub success: Vec<String>,
    pub failed: Vec<String>,
    pub conflicts: Vec<String>,
}

/// A per-`{workerId, taskId}` isolated working copy (spec §4.4).
pub struct Sandbox<'a> {
    config: SandboxConfig,
    worker_id: String,
    task_id: String,
    lock_manager: &'a FileLockManager,
    owner_id: String,
    tracked: HashMap<String, TrackedFile>,
}

impl<'a> Sandbox<'a> {
    #[must_use]
    pub fn new(config: SandboxConfig, worker_id: impl Into<String>, task_id: impl Into<String>, lock_manager: &'a FileLockManager) -> Self {
        let worker_id = worker_id.into();
        let task_id = task_id.into();
        let owner_id = format!("{worker_id}-{task_id}");
        Self {
            config,
            worker_id,
            task_id,
            lock_manager,
            owner_id,
            tracked: HashMap::new(),
        }
    }

    /// Directory name for this worker/task pair.
    #[must_use]
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.worker_id, self.task_id)
    }

    /// `<baseDir>/.sandbox/<workerId>-<taskId>/`
    #[must_use]
    pub fn sandbox_dir(&self) -> PathBuf {
        self.config.base_dir.join(SANDBOX_DIR).join(self.dir_name())
    }

    fn metadata_path(&self) -> PathBuf {
        self.sandbox_dir().join(METADATA_FILE)
    }

    /// Creates the sandbox directory and writes its metadata marker.
    pub fn setup(&self) -> Result<(), SandboxError> {
        let dir = self.sandbox_dir();
        std::fs::create_dir_all(&dir).map_err(|source| SandboxError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let metadata = SandboxMetadata {
            worker_id: self.worker_id.clone(),
            task_id: self.task_id.clone(),
            created_at: Utc::now(),
            base_dir: self.config.base_dir.display().to_string(),
        };
        let path = self.metadata_path();
        let json = serde_json::to_string_pretty(&metadata).map_err(|source| SandboxError::Json {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(&path, json).map_err(|source| SandboxError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(dir = %dir.display(), "sandbox set up");
        Ok(())
    }

    /// Acquires a lock for each path, then copies it (preserving relative
    /// structure) from the base dir into the sandbox. Fails the whole batch
    /// as soon as one lock acquisition fails.
    pub fn copy_to_sandbox(&mut self, paths: &[&str]) -> Result<(), SandboxError> {
        for rel_path in paths {
            if !self.lock_manager.acquire_lock(rel_path, &self.owner_id, self.config.lock_ttl_ms) {
                tracing::warn!(path = rel_path, owner = %self.owner_id, "lock contention");
                return Err(SandboxError::LockFailed { path: rel_path.to_string() });
            }

            let src = self.config.base_dir.join(rel_path);
            let dst = self.sandbox_dir().join(rel_path);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent).map_err(|source| SandboxError::Io {
                    path: parent.display().to_string(),
                    source,
                })?;
            }

            let content = std::fs::read(&src).unwrap_or_default();
            std::fs::write(&dst, &content).map_err(|source| SandboxError::Io {
                path: dst.display().to_string(),
                source,
            })?;

            self.tracked.insert(
                rel_path.to_string(),
                TrackedFile {
                    hash_at_copy: ContentHash::compute(&content),
                    deleted: false,
                },
            );
        }
        Ok(())
    }

    /// Marks a previously-copied-in file as deleted: its sandbox copy is
    /// removed and [`Sandbox::sync_back`] will remove the base-dir file
    /// instead of writing sandbox content back to it. No-op if `rel_path`
    /// was never copied in.
    pub fn mark_deleted(&mut self, rel_path: &str) {
        if let Some(tracked) = self.tracked.get_mut(rel_path) {
            tracked.deleted = true;
            let _ = std::fs::remove_file(self.sandbox_dir().join(rel_path));
        }
    }

    /// For each tracked file, compares the base-dir content hash at copy
    /// time against the current base-dir hash; if it differs another writer
    /// has touched it since, and that file's sync is recorded as a conflict
    /// rather than overwriting it. Releases all held locks.
    pub fn sync_back(&mut self) -> SyncBackResult {
        let mut result = SyncBackResult::default();

        for (rel_path, tracked) in &self.tracked {
            let base_path = self.config.base_dir.join(rel_path);
            let current_base_content = std::fs::read(&base_path).unwrap_or_default();
            let current_base_hash = ContentHash::compute(&current_base_content);

            if current_base_hash != tracked.hash_at_copy {
                tracing::warn!(path = rel_path, "sandbox sync conflict");
                result.conflicts.push(rel_path.clone());
                continue;
            }

            if tracked.deleted {
                match std::fs::remove_file(&base_path) {
                    Ok(()) => result.success.push(rel_path.clone()),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => result.success.push(rel_path.clone()),
                    Err(_) => result.failed.push(rel_path.clone()),
                }
                continue;
            }

            let sandbox_path = self.sandbox_dir().join(rel_path);
            match std::fs::read(&sandbox_path) {
                Ok(content) => match std::fs::write(&base_path, content) {
                    Ok(()) => result.success.push(rel_path.clone()),
                    Err(_) => result.failed.push(rel_path.clone()),
                },
                Err(_) => result.failed.push(rel_path.clone()),
            }
        }

        for rel_path in self.tracked.keys() {
            self.lock_manager.release_lock(rel_path, &self.owner_id);
        }

        result
    }

    /// Releases any still-held locks and removes the sandbox directory.
    /// Tolerates a directory that is already gone.
    pub fn cleanup(&mut self) {
        for rel_path in self.tracked.keys() {
            self.lock_manager.release_lock(rel_path, &self.owner_id);
        }
        let dir = self.sandbox_dir();
        let _ = std::fs::remove_dir_all(&dir);
        tracing::debug!(dir = %dir.display(), "sandbox cleaned up");
    }

    /// Paths this sandbox currently has copied in.
    #[must_use]
    pub fn tracked_paths(&self) -> Vec<String> {
        self.tracked.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write(base: &Path, rel: &str, content: &str) {
        let path = base.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn setup_creates_directory_and_metadata() {
        let base = tempfile::tempdir().unwrap();
        let locks = FileLockManager::new();
        let sandbox = Sandbox::new(SandboxConfig::new(base.path()), "w1", "t1", &locks);
        sandbox.setup().unwrap();
        assert!(sandbox.sandbox_dir().is_dir());
        assert!(sandbox.sandbox_dir().join(METADATA_FILE).is_file());
    }

    #[test]
    fn copy_edit_and_sync_back_round_trips() {
        let base = tempfile::tempdir().unwrap();
        write(base.path(), "a.ts", "original");
        let locks = FileLockManager::new();
        let mut sandbox = Sandbox::new(SandboxConfig::new(base.path()), "w1", "t1", &locks);
        sandbox.setup().unwrap();
        sandbox.copy_to_sandbox(&["a.ts"]).unwrap();

        std::fs::write(sandbox.sandbox_dir().join("a.ts"), "edited").unwrap();
        let result = sandbox.sync_back();

        assert_eq!(result.success, vec!["a.ts".to_string()]);
        assert!(result.conflicts.is_empty());
        assert_eq!(std::fs::read_to_string(base.path().join("a.ts")).unwrap(), "edited");
        assert!(!locks.is_locked("a.ts"));
    }

    #[test]
    fn concurrent_edit_is_reported_as_conflict() {
        let base = tempfile::tempdir().unwrap();
        write(base.path(), "shared.ts", "original");
        let locks = FileLockManager::new();
        let mut sandbox = Sandbox::new(SandboxConfig::new(base.path()), "w1", "t1", &locks);
        sandbox.setup().unwrap();
        sandbox.copy_to_sandbox(&["shared.ts"]).unwrap();

        // another writer touches the base-dir copy after the copy was taken
        std::fs::write(base.path().join("shared.ts"), "changed by someone else").unwrap();

        std::fs::write(sandbox.sandbox_dir().join("shared.ts"), "my edit").unwrap();
        let result = sandbox.sync_back();

        assert_eq!(result.conflicts, vec!["shared.ts".to_string()]);
        assert_eq!(
            std::fs::read_to_string(base.path().join("shared.ts")).unwrap(),
            "changed by someone else"
        );
    }

    #[test]
    fn marked_deleted_removes_base_file_on_sync_back() {
        let base = tempfile::tempdir().unwrap();
        write(base.path(), "a.ts", "original");
        let locks = FileLockManager::new();
        let mut sandbox = Sandbox::new(SandboxConfig::new(base.path()), "w1", "t1", &locks);
        sandbox.setup().unwrap();
        sandbox.copy_to_sandbox(&["a.ts"]).unwrap();

        sandbox.mark_deleted("a.ts");
        let result = sandbox.sync_back();

        assert_eq!(result.success, vec!["a.ts".to_string()]);
        assert!(!base.path().join("a.ts").exists());
    }

    #[test]
    fn copy_fails_when_path_already_locked() {
        let base = tempfile::tempdir().unwrap();
        write(base.path(), "a.ts", "x");
        let locks = FileLockManager::new();
        locks.acquire_lock("a.ts", "other-owner", None);

        let mut sandbox = Sandbox::new(SandboxConfig::new(base.path()), "w1", "t1", &locks);
        sandbox.setup().unwrap();
        let err = sandbox.copy_to_sandbox(&["a.ts"]).unwrap_err();
        assert!(matches!(err, SandboxError::LockFailed { .. }));
    }

    #[test]
    fn cleanup_removes_directory_and_tolerates_missing() {
        let base = tempfile::tempdir().unwrap();
        let locks = FileLockManager::new();
        let mut sandbox = Sandbox::new(SandboxConfig::new(base.path()), "w1", "t1", &locks);
        sandbox.setup().unwrap();
        sandbox.cleanup();
        assert!(!sandbox.sandbox_dir().exists());
        sandbox.cleanup();
    }
}
