//! In-process pessimistic file-lock manager (spec §4.5).
//!
//! Single point of mutual exclusion for files crossing sandbox boundaries.
//! Backed by a `DashMap` keyed on normalized path, following the lineage's
//! `AgentPool` convention of using `dashmap` for shared registries instead of
//! a hand-rolled mutex-guarded `HashMap`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

/// Default lock time-to-live, in milliseconds, when the caller does not
/// specify one.
pub const DEFAULT_TTL_MS: u64 = 30_000;

/// Errors produced by the lock manager.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("path '{path}' is already locked by another owner")]
    AlreadyLocked { path: String },
}

/// A held lock entry.
#[derive(Debug, Clone)]
pub struct LockEntry {
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl LockEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = Duration::from_millis(self.ttl_ms);
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now - self.acquired_at >= ttl,
            Err(_) => false,
        }
    }
}

/// In-process pessimistic file lock manager with a timeout-based staleness
/// sweep (spec §4.5).
#[derive(Debug, Default)]
pub struct FileLockManager {
    locks: DashMap<String, LockEntry>,
}

impl FileLockManager {
    #[must_use]
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    /// Acquires (or renews) a lock on `path` for `owner_id`.
    ///
    /// Rejects immediately if a non-expired lock held by a different owner
    /// exists. Re-entrant: the same owner re-acquiring is treated as a
    /// renewal, per spec.md §4.5.
    pub fn acquire_lock(&self, path: &str, owner_id: &str, ttl_ms: Option<u64>) -> bool {
        let path = normalize(path);
        let now = Utc::now();
        let ttl_ms = ttl_ms.unwrap_or(DEFAULT_TTL_MS);

        if let Some(existing) = self.locks.get(&path) {
            if existing.owner_id != owner_id && !existing.is_expired(now) {
                return false;
            }
        }

        self.locks.insert(
            path,
            LockEntry {
                owner_id: owner_id.to_string(),
                acquired_at: now,
                ttl_ms,
            },
        );
        true
    }

    /// No-op if `path` is not currently held by `owner_id`.
    pub fn release_lock(&self, path: &str, owner_id: &str) {
        let path = normalize(path);
        if let Some(entry) = self.locks.get(&path) {
            if entry.owner_id != owner_id {
                return;
            }
        } else {
            return;
        }
        self.locks.remove(&path);
    }

    #[must_use]
    pub fn is_locked(&self, path: &str) -> bool {
        let path = normalize(path);
        match self.locks.get(&path) {
            Some(entry) => !entry.is_expired(Utc::now()),
            None => false,
        }
    }

    #[must_use]
    pub fn get_locker(&self, path: &str) -> Option<String> {
        let path = normalize(path);
        self.locks.get(&path).and_then(|entry| {
            if entry.is_expired(Utc::now()) {
                None
            } else {
                Some(entry.owner_id.clone())
            }
        })
    }

    /// Removes every lock whose `acquired_at + ttl_ms < now`, in bulk.
    /// Returns the number of locks removed.
    pub fn cleanup_all_stale_locks(&self) -> usize {
        let now = Utc::now();
        let stale: Vec<String> = self
            .locks
            .iter()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        for path in &stale {
            self.locks.remove(path);
        }
        stale.len()
    }

    /// Snapshot of all currently held locks, for introspection and testing
    /// (needed by the "Sandbox isolation" testable property).
    #[must_use]
    pub fn held_locks(&self) -> Vec<(String, LockEntry)> {
        self.locks
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_rejects_other_owner() {
        let mgr = FileLockManager::new();
        assert!(mgr.acquire_lock("a.ts", "w1", None));
        assert!(!mgr.acquire_lock("a.ts", "w2", None));
        assert!(mgr.is_locked("a.ts"));
        assert_eq!(mgr.get_locker("a.ts").as_deref(), Some("w1"));
    }

    #[test]
    fn same_owner_reacquires_as_renewal() {
        let mgr = FileLockManager::new();
        assert!(mgr.acquire_lock("a.ts", "w1", Some(1000)));
        assert!(mgr.acquire_lock("a.ts", "w1", Some(1000)));
        assert_eq!(mgr.held_locks().len(), 1);
    }

    #[test]
    fn release_is_noop_for_non_owner() {
        let mgr = FileLockManager::new();
        mgr.acquire_lock("a.ts", "w1", None);
        mgr.release_lock("a.ts", "w2");
        assert!(mgr.is_locked("a.ts"));
        mgr.release_lock("a.ts", "w1");
        assert!(!mgr.is_locked("a.ts"));
    }

    #[test]
    fn cleanup_removes_expired_locks() {
        let mgr = FileLockManager::new();
        mgr.acquire_lock("a.ts", "w1", Some(0));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(mgr.cleanup_all_stale_locks(), 1);
        assert!(!mgr.is_locked("a.ts"));
    }

    #[test]
    fn disjoint_paths_do_not_conflict() {
        let mgr = FileLockManager::new();
        assert!(mgr.acquire_lock("a.ts", "w1", None));
        assert!(mgr.acquire_lock("b.ts", "w2", None));
    }
}
