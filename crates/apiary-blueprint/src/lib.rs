//! Blueprint authoring, validation, approval and lifecycle (spec §4.1).
//!
//! A single authoritative `create` lifecycle (Design Notes resolution (a)):
//! one call handles the "fresh project", "existing draft" and "existing
//! completed blueprint" cases, rather than two near-duplicate constructors.

use std::collections::HashMap;
use std::path::Path;

use apiary_model::blueprint::{Blueprint, BlueprintStatus, BlueprintValidation, BusinessProcess, ChangeKind, Module, Nfr};
use apiary_model::error::ModelError;
use apiary_model::ids::{BlueprintId, TaskTreeId};
use apiary_model::persistence;
use thiserror::Error;

/// Errors raised by the blueprint manager.
#[derive(Debug, Error)]
pub enum BlueprintError {
    #[error("blueprint {0} not found")]
    NotFound(BlueprintId),
    #[error("project already has a blueprint in progress ({status:?}); finish or complete it first")]
    BlueprintInUse { status: BlueprintStatus },
    #[error("cannot {action} while blueprint is in status {status:?}")]
    IllegalTransition { action: &'static str, status: BlueprintStatus },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// In-memory registry of blueprints, keyed by project path, backed by the
/// JSON persistence layer in `apiary-model` (spec §4.1, §6).
#[derive(Default)]
pub struct BlueprintManager {
    by_project: HashMap<String, BlueprintId>,
    blueprints: HashMap<BlueprintId, Blueprint>,
}

impl BlueprintManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The single authoritative construction path (spec §4.1 `create`):
    /// - no existing blueprint for `project_path` → fresh draft.
    /// - existing `draft` → reset its content in place and return it.
    /// - existing `completed` → new blueprint, major version bumped.
    /// - anything else → `BlueprintInUse`.
    pub fn create(&mut self, name: impl Into<String>, description: impl Into<String>, project_path: impl Into<String>) -> Result<&Blueprint, BlueprintError> {
        let project_path = project_path.into();
        let name = name.into();
        let description = description.into();

        if let Some(&existing_id) = self.by_project.get(&project_path) {
            let previous_version = self.blueprints[&existing_id].version;
            let status = self.blueprints[&existing_id].status;
            match status {
                BlueprintStatus::Draft => {
                    let bp = self.blueprints.get_mut(&existing_id).expect("present");
                    bp.reset_draft(name, description);
                    return Ok(self.blueprints.get(&existing_id).expect("present"));
                }
                BlueprintStatus::Completed => {
                    let mut next = Blueprint::new(name, description, project_path.clone());
                    next.version = previous_version.bump_major();
                    let id = next.id;
                    self.blueprints.insert(id, next);
                    self.by_project.insert(project_path, id);
                    return Ok(&self.blueprints[&id]);
                }
                other => return Err(BlueprintError::BlueprintInUse { status: other }),
            }
        }

        let blueprint = Blueprint::new(name, description, project_path.clone());
        let id = blueprint.id;
        self.blueprints.insert(id, blueprint);
        self.by_project.insert(project_path, id);
        Ok(&self.blueprints[&id])
    }

    #[must_use]
    pub fn get(&self, id: BlueprintId) -> Option<&Blueprint> {
        self.blueprints.get(&id)
    }

    /// The blueprint currently registered for `project_path`, if any.
    #[must_use]
    pub fn list_for_project(&self, project_path: &str) -> Option<&Blueprint> {
        self.by_project.get(project_path).and_then(|id| self.blueprints.get(id))
    }

    /// A blueprint's append-only change history.
    pub fn history(&self, id: BlueprintId) -> Result<&[apiary_model::blueprint::ChangeRecord], BlueprintError> {
        Ok(&self.blueprints.get(&id).ok_or(BlueprintError::NotFound(id))?.change_history)
    }

    fn get_mut(&mut self, id: BlueprintId) -> Result<&mut Blueprint, BlueprintError> {
        self.blueprints.get_mut(&id).ok_or(BlueprintError::NotFound(id))
    }

    pub fn add_module(&mut self, id: BlueprintId, module: Module) -> Result<(), BlueprintError> {
        self.get_mut(id)?.add_module(module);
        Ok(())
    }

    pub fn add_process(&mut self, id: BlueprintId, process: BusinessProcess) -> Result<(), BlueprintError> {
        self.get_mut(id)?.add_process(process);
        Ok(())
    }

    pub fn add_nfr(&mut self, id: BlueprintId, nfr: Nfr) -> Result<(), BlueprintError> {
        self.get_mut(id)?.add_nfr(nfr);
        Ok(())
    }

    fn transition(bp: &mut Blueprint, to: BlueprintStatus, description: impl Into<String>) {
        bp.status = to;
        bp.change_history.push(apiary_model::blueprint::ChangeRecord {
            id: apiary_model::ids::DecisionId::new(),
            timestamp: chrono::Utc::now(),
            kind: ChangeKind::StatusChanged,
            description: description.into(),
            author: None,
        });
        bp.updated_at = chrono::Utc::now();
    }

    /// Requires `draft` or `modified`; runs `validate`; on success transitions
    /// to `review`.
    pub fn submit_for_review(&mut self, id: BlueprintId) -> Result<BlueprintValidation, BlueprintError> {
        let bp = self.get_mut(id)?;
        if !matches!(bp.status, BlueprintStatus::Draft | BlueprintStatus::Modified) {
            return Err(BlueprintError::IllegalTransition { action: "submit for review", status: bp.status });
        }
        let validation = bp.validate();
        if validation.valid {
            Self::transition(bp, BlueprintStatus::Review, "submitted for review");
        }
        Ok(validation)
    }

    pub fn approve(&mut self, id: BlueprintId, approver: impl Into<String>) -> Result<(), BlueprintError> {
        let bp = self.get_mut(id)?;
        if bp.status != BlueprintStatus::Review {
            return Err(BlueprintError::IllegalTransition { action: "approve", status: bp.status });
        }
        bp.approved_at = Some(chrono::Utc::now());
        bp.approved_by = Some(approver.into());
        Self::transition(bp, BlueprintStatus::Approved, "approved");
        Ok(())
    }

    pub fn reject(&mut self, id: BlueprintId, reason: impl Into<String>) -> Result<(), BlueprintError> {
        let bp = self.get_mut(id)?;
        if bp.status != BlueprintStatus::Review {
            return Err(BlueprintError::IllegalTransition { action: "reject", status: bp.status });
        }
        Self::transition(bp, BlueprintStatus::Draft, format!("rejected: {}", reason.into()));
        Ok(())
    }

    /// Requires `approved`; binds `task_tree_id`; transitions to `executing`.
    pub fn start_execution(&mut self, id: BlueprintId, task_tree_id: TaskTreeId) -> Result<(), BlueprintError> {
        let bp = self.get_mut(id)?;
        if bp.status != BlueprintStatus::Approved {
            return Err(BlueprintError::IllegalTransition { action: "start execution", status: bp.status });
        }
        bp.task_tree_id = Some(task_tree_id);
        Self::transition(bp, BlueprintStatus::Executing, "execution started");
        Ok(())
    }

    pub fn pause(&mut self, id: BlueprintId) -> Result<(), BlueprintError> {
        let bp = self.get_mut(id)?;
        if bp.status != BlueprintStatus::Executing {
            return Err(BlueprintError::IllegalTransition { action: "pause", status: bp.status });
        }
        Self::transition(bp, BlueprintStatus::Paused, "paused");
        Ok(())
    }

    pub fn resume(&mut self, id: BlueprintId) -> Result<(), BlueprintError> {
        let bp = self.get_mut(id)?;
        if bp.status != BlueprintStatus::Paused {
            return Err(BlueprintError::IllegalTransition { action: "resume", status: bp.status });
        }
        Self::transition(bp, BlueprintStatus::Executing, "resumed");
        Ok(())
    }

    pub fn complete(&mut self, id: BlueprintId) -> Result<(), BlueprintError> {
        let bp = self.get_mut(id)?;
        if !matches!(bp.status, BlueprintStatus::Executing | BlueprintStatus::Paused) {
            return Err(BlueprintError::IllegalTransition { action: "complete", status: bp.status });
        }
        Self::transition(bp, BlueprintStatus::Completed, "completed");
        Ok(())
    }

    /// A mid-execution modification bumps the patch version and transitions
    /// to `modified`.
    pub fn modify_during_execution(&mut self, id: BlueprintId, description: impl Into<String>) -> Result<(), BlueprintError> {
        let bp = self.get_mut(id)?;
        if !matches!(bp.status, BlueprintStatus::Executing | BlueprintStatus::Paused) {
            return Err(BlueprintError::IllegalTransition { action: "modify", status: bp.status });
        }
        bp.version = bp.version.bump_patch();
        let desc = description.into();
        Self::transition(bp, BlueprintStatus::Modified, desc);
        Ok(())
    }

    /// Persists `id` to `<project_path>/.blueprint/<id>.json`.
    pub fn save(&self, project_path: &Path, id: BlueprintId) -> Result<(), BlueprintError> {
        let bp = self.blueprints.get(&id).ok_or(BlueprintError::NotFound(id))?;
        persistence::save_blueprint(project_path, bp)?;
        Ok(())
    }

    /// Loads a blueprint from disk into the in-memory registry.
    pub fn load(&mut self, project_path: &Path, id: BlueprintId) -> Result<&Blueprint, BlueprintError> {
        let bp = persistence::load_blueprint(project_path, id)?;
        self.by_project.insert(bp.project_path.clone(), bp.id);
        self.blueprints.insert(bp.id, bp);
        Ok(&self.blueprints[&id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiary_model::blueprint::ModuleType;

    #[test]
    fn create_resets_existing_draft() {
        let mut mgr = BlueprintManager::new();
        let first_id = mgr.create("p1", "d1", "/tmp/proj").unwrap().id;
        mgr.add_module(first_id, Module::new("m", ModuleType::Backend)).unwrap();

        let second = mgr.create("p2", "d2", "/tmp/proj").unwrap();
        assert_eq!(second.id, first_id);
        assert_eq!(second.name, "p2");
        assert!(second.modules.is_empty());
    }

    #[test]
    fn create_after_completed_bumps_major_version() {
        let mut mgr = BlueprintManager::new();
        let id = mgr.create("p1", "d1", "/tmp/proj").unwrap().id;
        mgr.add_process(id, BusinessProcess::new("proc", "d").with_step("s", "d")).unwrap();
        mgr.add_module(id, Module::new("m", ModuleType::Backend)).unwrap();
        mgr.submit_for_review(id).unwrap();
        mgr.approve(id, "alice").unwrap();
        mgr.start_execution(id, TaskTreeId::new()).unwrap();
        mgr.complete(id).unwrap();

        let next = mgr.create("p2", "d2", "/tmp/proj").unwrap();
        assert_ne!(next.id, id);
        assert_eq!(next.version.major, 1);
    }

    #[test]
    fn create_while_in_review_is_blueprint_in_use() {
        let mut mgr = BlueprintManager::new();
        let id = mgr.create("p1", "d1", "/tmp/proj").unwrap().id;
        mgr.add_process(id, BusinessProcess::new("proc", "d").with_step("s", "d")).unwrap();
        mgr.add_module(id, Module::new("m", ModuleType::Backend)).unwrap();
        mgr.submit_for_review(id).unwrap();

        let err = mgr.create("p2", "d2", "/tmp/proj").unwrap_err();
        assert!(matches!(err, BlueprintError::BlueprintInUse { status: BlueprintStatus::Review }));
    }

    #[test]
    fn submit_for_review_fails_validation_without_transitioning() {
        let mut mgr = BlueprintManager::new();
        let id = mgr.create("p", "d", "/tmp/proj").unwrap().id;
        let validation = mgr.submit_for_review(id).unwrap();
        assert!(!validation.valid);
        assert_eq!(mgr.get(id).unwrap().status, BlueprintStatus::Draft);
    }

    #[test]
    fn full_lifecycle_happy_path() {
        let mut mgr = BlueprintManager::new();
        let id = mgr.create("p", "d", "/tmp/proj").unwrap().id;
        mgr.add_process(id, BusinessProcess::new("proc", "d").with_step("s", "d")).unwrap();
        mgr.add_module(id, Module::new("m", ModuleType::Backend)).unwrap();

        let validation = mgr.submit_for_review(id).unwrap();
        assert!(validation.valid);
        assert_eq!(mgr.get(id).unwrap().status, BlueprintStatus::Review);

        mgr.approve(id, "alice").unwrap();
        assert_eq!(mgr.get(id).unwrap().status, BlueprintStatus::Approved);

        mgr.start_execution(id, TaskTreeId::new()).unwrap();
        assert_eq!(mgr.get(id).unwrap().status, BlueprintStatus::Executing);

        mgr.modify_during_execution(id, "scope change").unwrap();
        let bp = mgr.get(id).unwrap();
        assert_eq!(bp.status, BlueprintStatus::Modified);
        assert_eq!(bp.version.patch, 1);
    }

    #[test]
    fn persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = BlueprintManager::new();
        let id = mgr.create("p", "d", dir.path().display().to_string()).unwrap().id;
        mgr.save(dir.path(), id).unwrap();

        let mut loaded_mgr = BlueprintManager::new();
        let loaded = loaded_mgr.load(dir.path(), id).unwrap();
        assert_eq!(loaded.name, "p");
    }
}
