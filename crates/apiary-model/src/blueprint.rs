//! Blueprint data model (spec §3 "Blueprint", "Module", "BusinessProcess / NFR")

use crate::ids::{BlueprintId, ModuleId, NfrId, ProcessId, TaskTreeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a [`Blueprint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlueprintStatus {
    Draft,
    Review,
    Approved,
    Executing,
    Paused,
    Modified,
    Completed,
    Rejected,
}

/// The approved project specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    pub id: BlueprintId,
    pub name: String,
    pub description: String,
    pub version: Version,
    pub status: BlueprintStatus,
    pub project_path: String,
    pub modules: Vec<Module>,
    pub business_processes: Vec<BusinessProcess>,
    pub nfrs: Vec<Nfr>,
    pub change_history: Vec<ChangeRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub task_tree_id: Option<TaskTreeId>,
}

impl Blueprint {
    /// Construct a fresh `draft` blueprint bound 1:1 to `project_path`.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, project_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: BlueprintId::new(),
            name: name.into(),
            description: description.into(),
            version: Version::new(0, 1, 0),
            status: BlueprintStatus::Draft,
            project_path: project_path.into(),
            modules: Vec::new(),
            business_processes: Vec::new(),
            nfrs: Vec::new(),
            change_history: Vec::new(),
            created_at: now,
            updated_at: now,
            approved_at: None,
            approved_by: None,
            task_tree_id: None,
        }
    }

    /// Reset a draft blueprint's content in place (used by `create` when the
    /// project already has a `draft` blueprint — spec §4.1).
    pub fn reset_draft(&mut self, name: impl Into<String>, description: impl Into<String>) {
        self.name = name.into();
        self.description = description.into();
        self.modules.clear();
        self.business_processes.clear();
        self.nfrs.clear();
        self.updated_at = Utc::now();
    }

    /// Find a module by id.
    #[must_use]
    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.iter().find(|m| m.id == id)
    }

    fn record(&mut self, change: ChangeKind, description: impl Into<String>) {
        self.change_history.push(ChangeRecord {
            id: crate::ids::DecisionId::new(),
            timestamp: Utc::now(),
            kind: change,
            description: description.into(),
            author: None,
        });
        self.updated_at = Utc::now();
    }

    pub fn add_module(&mut self, module: Module) {
        let name = module.name.clone();
        self.modules.push(module);
        self.record(ChangeKind::ModuleAdded, format!("added module '{name}'"));
    }

    pub fn add_process(&mut self, process: BusinessProcess) {
        let name = process.name.clone();
        self.business_processes.push(process);
        self.record(ChangeKind::ProcessAdded, format!("added process '{name}'"));
    }

    pub fn add_nfr(&mut self, nfr: Nfr) {
        let name = nfr.name.clone();
        self.nfrs.push(nfr);
        self.record(ChangeKind::NfrAdded, format!("added NFR '{name}'"));
    }

    /// Detect cycles in the module dependency graph via iterative DFS,
    /// returning the cycle path (module names) if one exists. Cycles are a
    /// warning, not an error — spec §4.1.
    #[must_use]
    pub fn find_module_cycle(&self) -> Option<Vec<String>> {
        use std::collections::HashMap;

        let by_id: HashMap<ModuleId, &Module> = self.modules.iter().map(|m| (m.id, m)).collect();

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: HashMap<ModuleId, Mark> = HashMap::new();

        for &start in by_id.keys() {
            if marks.contains_key(&start) {
                continue;
            }
            // Iterative DFS with an explicit stack of (node, child-index).
            let mut stack: Vec<(ModuleId, usize)> = vec![(start, 0)];
            let mut path: Vec<ModuleId> = vec![start];
            marks.insert(start, Mark::Visiting);

            while let Some(&mut (node, ref mut idx)) = stack.last_mut() {
                let deps = &by_id[&node].dependencies;
                if *idx < deps.len() {
                    let next = deps[*idx];
                    *idx += 1;
                    match marks.get(&next) {
                        Some(Mark::Visiting) => {
                            let cycle_start = path.iter().position(|&m| m == next).unwrap_or(0);
                            let mut cycle: Vec<String> = path[cycle_start..]
                                .iter()
                                .filter_map(|id| by_id.get(id).map(|m| m.name.clone()))
                                .collect();
                            if let Some(m) = by_id.get(&next) {
                                cycle.push(m.name.clone());
                            }
                            return Some(cycle);
                        }
                        Some(Mark::Done) => {}
                        None => {
                            if by_id.contains_key(&next) {
                                marks.insert(next, Mark::Visiting);
                                path.push(next);
                                stack.push((next, 0));
                            }
                        }
                    }
                } else {
                    marks.insert(node, Mark::Done);
                    path.pop();
                    stack.pop();
                }
            }
        }
        None
    }

    /// Validate the blueprint, returning errors and warnings (spec §4.1).
    #[must_use]
    pub fn validate(&self) -> BlueprintValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("blueprint name must not be empty".to_string());
        }
        if self.description.trim().is_empty() {
            errors.push("blueprint description must not be empty".to_string());
        }
        if self.business_processes.is_empty() {
            errors.push("blueprint must declare at least one business process".to_string());
        }
        for process in &self.business_processes {
            if process.steps.is_empty() {
                errors.push(format!("process '{}' has no steps", process.name));
            }
        }
        if self.modules.is_empty() {
            errors.push("blueprint must declare at least one module".to_string());
        }
        let module_ids: std::collections::HashSet<ModuleId> = self.modules.iter().map(|m| m.id).collect();
        for module in &self.modules {
            for dep in &module.dependencies {
                if !module_ids.contains(dep) {
                    errors.push(format!(
                        "module '{}' depends on non-existent module {dep}",
                        module.name
                    ));
                }
            }
        }
        if let Some(cycle) = self.find_module_cycle() {
            warnings.push(format!("cyclic module dependency: {}", cycle.join(" -> ")));
        }

        BlueprintValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Result of [`Blueprint::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlueprintValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Semantic version, `MAJOR.MINOR.PATCH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    #[must_use]
    pub fn bump_major(self) -> Self {
        Self::new(self.major + 1, 0, 0)
    }

    #[must_use]
    pub fn bump_patch(self) -> Self {
        Self::new(self.major, self.minor, self.patch + 1)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '.');
        let mut next = || -> Result<u32, VersionParseError> {
            parts
                .next()
                .ok_or(VersionParseError)?
                .parse()
                .map_err(|_| VersionParseError)
        };
        Ok(Self::new(next()?, next()?, next()?))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid version string, expected MAJOR.MINOR.PATCH")]
pub struct VersionParseError;

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Module type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    Frontend,
    Backend,
    Database,
    Service,
    Infrastructure,
    Other,
}

/// A declared unit of the project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ModuleType,
    pub architecture_layer: String,
    pub root_path: String,
    pub tech_stack: Vec<String>,
    pub responsibilities: Vec<String>,
    pub dependencies: Vec<ModuleId>,
    pub interfaces: Vec<String>,
}

impl Module {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ModuleType) -> Self {
        Self {
            id: ModuleId::new(),
            name: name.into(),
            kind,
            architecture_layer: String::new(),
            root_path: "src".to_string(),
            tech_stack: Vec::new(),
            responsibilities: Vec::new(),
            dependencies: Vec::new(),
            interfaces: Vec::new(),
        }
    }

    #[must_use]
    pub fn depends_on(mut self, module: ModuleId) -> Self {
        self.dependencies.push(module);
        self
    }

    #[must_use]
    pub fn with_responsibilities(mut self, responsibilities: Vec<String>) -> Self {
        self.responsibilities = responsibilities;
        self
    }
}

/// A single step of a [`BusinessProcess`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStep {
    pub name: String,
    pub description: String,
}

/// Documentation-level business process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessProcess {
    pub id: ProcessId,
    pub name: String,
    pub description: String,
    pub process_type: String,
    pub steps: Vec<ProcessStep>,
    pub actors: Vec<String>,
}

impl BusinessProcess {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: ProcessId::new(),
            name: name.into(),
            description: description.into(),
            process_type: "workflow".to_string(),
            steps: Vec::new(),
            actors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_step(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.steps.push(ProcessStep {
            name: name.into(),
            description: description.into(),
        });
        self
    }
}

/// Priority of a non-functional requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NfrPriority {
    Must,
    Should,
    Could,
}

/// Non-functional requirement, surfaced to the test generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nfr {
    pub id: NfrId,
    pub name: String,
    pub category: String,
    pub priority: NfrPriority,
    pub metric: String,
}

impl Nfr {
    #[must_use]
    pub fn new(name: impl Into<String>, category: impl Into<String>, priority: NfrPriority, metric: impl Into<String>) -> Self {
        Self {
            id: NfrId::new(),
            name: name.into(),
            category: category.into(),
            priority,
            metric: metric.into(),
        }
    }
}

/// Tag for a [`ChangeRecord`] (spec Design Notes: tagged variants over a loose bag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    ModuleAdded,
    ProcessAdded,
    NfrAdded,
    StatusChanged,
    VersionBumped,
    Modified,
}

/// An append-only entry in a blueprint's change history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: crate::ids::DecisionId,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub description: String,
    pub author: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_round_trip() {
        let v = Version::new(1, 2, 3);
        let parsed: Version = v.to_string().parse().unwrap();
        assert_eq!(v, parsed);
    }

    #[test]
    fn validate_flags_empty_processes() {
        let bp = Blueprint::new("n", "d", "/tmp/p");
        let result = bp.validate();
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("business process")));
    }

    #[test]
    fn validate_flags_dangling_dependency() {
        let mut bp = Blueprint::new("n", "d", "/tmp/p");
        bp.add_process(BusinessProcess::new("p", "d").with_step("s", "d"));
        bp.add_module(Module::new("m", ModuleType::Backend).depends_on(ModuleId::new()));
        let result = bp.validate();
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("non-existent module")));
    }

    #[test]
    fn cycle_detection_reports_path() {
        let mut bp = Blueprint::new("n", "d", "/tmp/p");
        let a = Module::new("a", ModuleType::Backend);
        let a_id = a.id;
        let mut b = Module::new("b", ModuleType::Backend);
        b.dependencies.push(a_id);
        let b_id = b.id;
        let mut a = a;
        a.dependencies.push(b_id);

        bp.modules.push(a);
        bp.modules.push(b);

        let cycle = bp.find_module_cycle();
        assert!(cycle.is_some());
    }

    #[test]
    fn no_cycle_when_dag() {
        let mut bp = Blueprint::new("n", "d", "/tmp/p");
        let a = Module::new("a", ModuleType::Backend);
        let a_id = a.id;
        bp.modules.push(a);
        bp.modules.push(Module::new("b", ModuleType::Backend).depends_on(a_id));
        assert!(bp.find_module_cycle().is_none());
    }
}
