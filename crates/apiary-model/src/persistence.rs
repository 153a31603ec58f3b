//! JSON persistence for the data model (spec §6 "Filesystem layout")
//!
//! One blueprint per file under `<project>/.blueprint/<id>.json`; timestamps
//! are ISO-8601 via `chrono`'s `serde` feature, which is exactly the shape
//! serde_json already produces for `DateTime<Utc>`.

use crate::blueprint::Blueprint;
use crate::error::ModelError;
use std::path::{Path, PathBuf};

/// Directory name for per-project blueprint storage.
pub const BLUEPRINT_DIR: &str = ".blueprint";

/// Compute the path a blueprint is stored at under `project_path`.
#[must_use]
pub fn blueprint_path(project_path: &Path, id: crate::ids::BlueprintId) -> PathBuf {
    project_path.join(BLUEPRINT_DIR).join(format!("{id}.json"))
}

/// Serialize and write a blueprint to its canonical path, creating the
/// `.blueprint` directory if needed.
pub fn save_blueprint(project_path: &Path, blueprint: &Blueprint) -> Result<PathBuf, ModelError> {
    let dir = project_path.join(BLUEPRINT_DIR);
    std::fs::create_dir_all(&dir).map_err(|source| ModelError::Io {
        path: dir.display().to_string(),
        source,
    })?;
    let path = blueprint_path(project_path, blueprint.id);
    let json = serde_json::to_string_pretty(blueprint).map_err(|source| ModelError::Json {
        path: path.display().to_string(),
        source,
    })?;
    std::fs::write(&path, json).map_err(|source| ModelError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(path)
}

/// Load a blueprint from `<project_path>/.blueprint/<id>.json`.
pub fn load_blueprint(project_path: &Path, id: crate::ids::BlueprintId) -> Result<Blueprint, ModelError> {
    let path = blueprint_path(project_path, id);
    let contents = std::fs::read_to_string(&path).map_err(|source| ModelError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ModelError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// List every blueprint id stored under `project_path`.
pub fn list_blueprint_ids(project_path: &Path) -> Result<Vec<crate::ids::BlueprintId>, ModelError> {
    let dir = project_path.join(BLUEPRINT_DIR);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    let entries = std::fs::read_dir(&dir).map_err(|source| ModelError::Io {
        path: dir.display().to_string(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| ModelError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
            if let Ok(id) = stem.parse() {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{BusinessProcess, Module, ModuleType};

    #[test]
    fn round_trip_preserves_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut bp = Blueprint::new("proj", "desc", dir.path().display().to_string());
        bp.add_process(BusinessProcess::new("p", "d").with_step("s", "d"));
        bp.add_module(Module::new("m", ModuleType::Backend));

        save_blueprint(dir.path(), &bp).unwrap();
        let loaded = load_blueprint(dir.path(), bp.id).unwrap();

        assert_eq!(loaded.name, bp.name);
        assert_eq!(loaded.modules.len(), 1);
        assert_eq!(loaded.business_processes.len(), 1);
    }

    #[test]
    fn list_ids_finds_saved_blueprints() {
        let dir = tempfile::tempdir().unwrap();
        let bp = Blueprint::new("proj", "desc", dir.path().display().to_string());
        save_blueprint(dir.path(), &bp).unwrap();

        let ids = list_blueprint_ids(dir.path()).unwrap();
        assert_eq!(ids, vec![bp.id]);
    }
}
