//! Queen coordinator main loop (spec §4.7), wiring the blueprint, task-tree,
//! TDD state machine, sandbox, lock manager and regression gate together.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use apiary_gate::{GateError, GitBaseline, RegressionGate, RegressionValidator, SubmissionRequest};
use apiary_lock::FileLockManager;
use apiary_model::agents::{
    Decision, DecisionKind, QueenAgent, QueenStatus, TddPhase, TimelineEvent, TimelineEventKind, WorkerAgent, WorkerStatus,
};
use apiary_model::blueprint::Blueprint;
use apiary_model::ids::{BlueprintId, TaskId, TaskTreeId, WorkerId};
use apiary_model::tasktree::{ChangeType, CodeArtifact, TaskNode, TaskStatus, TaskTree};
use apiary_sandbox::{Sandbox, SandboxConfig, SANDBOX_DIR};
use apiary_tasktree::{AcceptanceTestGenerator, TaskTreeError, TaskTreeManager};
use apiary_tdd::{GreenOutcome, PhaseGuidance, TddEngine, TddError};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

/// Crate version, exposed for the CLI's `--version` output and diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors produced by the queen coordinator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Tree(#[from] TaskTreeError),
    #[error(transparent)]
    Tdd(#[from] TddError),
    #[error(transparent)]
    Sandbox(#[from] apiary_sandbox::SandboxError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error("task {0} has no active TDD loop to drive")]
    NoActiveLoop(TaskId),
    #[error("phase executor returned an outcome that does not match phase {0:?}")]
    PhaseMismatch(TddPhase),
    #[error("phase executor failed: {0}")]
    PhaseExecutor(String),
    #[error("task {0} exceeded its TDD step ceiling")]
    CeilingExceeded(TaskId),
    #[error("could not acquire lock on '{0}'; another worker holds it")]
    LockConflict(String),
}

/// How many times [`Queen::apply_artifacts`] retries a failed sandbox
/// `copyToSandbox` lock acquisition before giving up and failing the task
/// (spec §7's `LockUnavailable`: "retried once per tick; else fail task").
const LOCK_RETRY_ATTEMPTS: u32 = 1;

/// Configuration for a [`Queen`] (spec §4.7).
#[derive(Debug, Clone)]
pub struct QueenConfig {
    pub max_concurrent_workers: usize,
    pub worker_timeout_ms: i64,
    pub main_loop_interval_ms: u64,
    pub auto_assign_tasks: bool,
    pub model_strategy: String,
    pub default_worker_model: String,
    pub project_root: PathBuf,
    pub test_framework: String,
    pub test_directory: String,
}

impl QueenConfig {
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            max_concurrent_workers: 4,
            worker_timeout_ms: 5 * 60 * 1000,
            main_loop_interval_ms: 1000,
            auto_assign_tasks: true,
            model_strategy: "default".to_string(),
            default_worker_model: "default".to_string(),
            project_root: project_root.into(),
            test_framework: "cargo test".to_string(),
            test_directory: "tests".to_string(),
        }
    }
}

/// Per-phase inputs handed to a [`PhaseExecutor`].
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub task_id: TaskId,
    pub phase: TddPhase,
    pub guidance: PhaseGuidance,
    pub node: TaskNode,
}

/// What a phase executor reports back after driving one phase of a task's
/// TDD loop (spec §4.3 operations, seen from the coordinator's side).
#[derive(Debug, Clone)]
pub enum PhaseOutcome {
    TestCode {
        test_code: String,
        file_path: String,
        command: String,
        acceptance_criteria: Vec<String>,
    },
    RedResult {
        unit_passed: Option<bool>,
        acceptance_results: Vec<bool>,
    },
    ImplementationCode {
        artifacts: Vec<CodeArtifact>,
    },
    GreenResult {
        unit_passed: Option<bool>,
        acceptance_results: Vec<bool>,
    },
    RefactorResult {
        passed: bool,
        artifacts: Vec<CodeArtifact>,
    },
}

/// Drives one phase of a task's TDD loop, e.g. by dispatching to an LLM
/// worker. Injected so the coordinator can be tested without one (spec §4.7
/// step 2: "calling the phase executor with the current phase name and task").
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn execute_phase(&self, ctx: PhaseContext) -> Result<PhaseOutcome, OrchestratorError>;
}

/// Receives the queen's decision log and timeline events as they are
/// produced (spec §4.7 "decision log", §5 "globally ordered" timeline).
pub trait Observer: Send + Sync {
    fn on_decision(&self, decision: &Decision);
    fn on_event(&self, event: &TimelineEvent);
}

/// Default observer: logs through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_decision(&self, decision: &Decision) {
        tracing::info!(kind = ?decision.kind, description = %decision.description, reasoning = %decision.reasoning, "queen decision");
    }

    fn on_event(&self, event: &TimelineEvent) {
        tracing::info!(kind = ?event.kind, description = %event.description, "queen event");
    }
}

fn build_global_context(tree: &TaskTree) -> String {
    format!(
        "tree {} — {}/{} tasks passed ({:.1}%)",
        tree.id, tree.stats.passed, tree.stats.total, tree.stats.progress_percent
    )
}

fn phase_to_status(phase: TddPhase) -> Option<TaskStatus> {
    match phase {
        TddPhase::WriteTest | TddPhase::RunTestRed => Some(TaskStatus::TestWriting),
        TddPhase::WriteCode => Some(TaskStatus::Coding),
        TddPhase::RunTestGreen => Some(TaskStatus::Testing),
        TddPhase::Refactor => Some(TaskStatus::Refactoring),
        TddPhase::Done => None,
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

struct QueenState {
    agent: QueenAgent,
    trees: TaskTreeManager,
    tdd: TddEngine,
    gate: RegressionGate,
    workers: HashMap<WorkerId, WorkerAgent>,
    baselines: HashMap<TaskId, Option<GitBaseline>>,
    timeline: Vec<TimelineEvent>,
}

/// The queen coordinator (spec §4.7). Owns the task tree, the per-task TDD
/// engines, the worker roster and the file lock manager, and drives the
/// whole system through a cooperative main loop.
pub struct Queen {
    config: QueenConfig,
    state: Mutex<QueenState>,
    lock_manager: FileLockManager,
    phase_executor: Box<dyn PhaseExecutor>,
    observer: Box<dyn Observer>,
    running: AtomicBool,
}

impl Queen {
    #[must_use]
    pub fn new(
        config: QueenConfig,
        blueprint_id: BlueprintId,
        phase_executor: Box<dyn PhaseExecutor>,
        observer: Box<dyn Observer>,
        validator: Box<dyn RegressionValidator>,
    ) -> Self {
        let agent = QueenAgent::new(blueprint_id, TaskTreeId::new());
        Self {
            config,
            state: Mutex::new(QueenState {
                agent,
                trees: TaskTreeManager::new(),
                tdd: TddEngine::new(),
                gate: RegressionGate::new(validator),
                workers: HashMap::new(),
                baselines: HashMap::new(),
                timeline: Vec::new(),
            }),
            lock_manager: FileLockManager::new(),
            phase_executor,
            observer,
            running: AtomicBool::new(false),
        }
    }

    /// `initializeQueen(blueprintId)`: generates the task tree and moves the
    /// queen to `idle`.
    pub async fn initialize(&self, blueprint: &Blueprint, generator: &dyn AcceptanceTestGenerator) -> TaskTreeId {
        let mut state = self.state.lock().await;
        let tree_id = state.trees.generate_from_blueprint(blueprint, generator);
        state.agent.task_tree_id = tree_id;
        state.agent.status = QueenStatus::Idle;
        tree_id
    }

    #[must_use]
    pub async fn status(&self) -> QueenStatus {
        self.state.lock().await.agent.status
    }

    #[must_use]
    pub async fn decision_log(&self) -> Vec<Decision> {
        self.state.lock().await.agent.decisions.clone()
    }

    #[must_use]
    pub async fn timeline(&self) -> Vec<TimelineEvent> {
        self.state.lock().await.timeline.clone()
    }

    pub async fn spawn_worker(&self) -> WorkerId {
        let mut state = self.state.lock().await;
        let worker = WorkerAgent::new(state.agent.id);
        let id = worker.id;
        state.agent.worker_ids.push(id);
        state.workers.insert(id, worker);
        id
    }

    async fn record_decision(&self, state: &mut QueenState, kind: DecisionKind, description: impl Into<String>, reasoning: impl Into<String>) {
        let decision = Decision::new(kind, description, reasoning);
        self.observer.on_decision(&decision);
        state.agent.record_decision(decision);
    }

    fn record_event(&self, state: &mut QueenState, kind: TimelineEventKind, description: impl Into<String>) {
        let event = TimelineEvent::new(kind, description);
        self.observer.on_event(&event);
        state.timeline.push(event);
    }

    fn sandbox_dir_for(&self, worker_id: WorkerId, task_id: TaskId) -> PathBuf {
        self.config
            .project_root
            .join(SANDBOX_DIR)
            .join(format!("{worker_id}-{task_id}"))
    }

    fn release_locks_for(&self, owner_id: &str) {
        for (path, entry) in self.lock_manager.held_locks() {
            if entry.owner_id == owner_id {
                self.lock_manager.release_lock(&path, owner_id);
            }
        }
    }

    /// Writes (or removes) artifacts only inside the worker's sandbox — real
    /// project-root files are never touched here (spec §4.7 "all writes
    /// outside a worker's sandbox are forbidden"). Each path is first pulled
    /// into the sandbox via [`Sandbox::copy_to_sandbox`], which acquires the
    /// file lock; [`Queen::finish_task_success`] is the only place that
    /// syncs a sandbox back to the real tree, and only once the submission
    /// has passed the regression gate.
    fn apply_artifacts(&self, artifacts: &[CodeArtifact], sandbox: &mut Sandbox<'_>) -> Result<(), OrchestratorError> {
        for artifact in artifacts {
            let path = normalize(&artifact.file_path);
            self.copy_into_sandbox_with_retry(sandbox, &path)?;

            let sandbox_path = sandbox.sandbox_dir().join(&path);
            match artifact.change_type {
                ChangeType::Delete => sandbox.mark_deleted(&path),
                ChangeType::Create | ChangeType::Modify => {
                    if let Some(parent) = sandbox_path.parent() {
                        std::fs::create_dir_all(parent).map_err(|source| apiary_sandbox::SandboxError::Io {
                            path: parent.display().to_string(),
                            source,
                        })?;
                    }
                    std::fs::write(&sandbox_path, artifact.content.clone().unwrap_or_default()).map_err(|source| {
                        apiary_sandbox::SandboxError::Io {
                            path: sandbox_path.display().to_string(),
                            source,
                        }
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Calls [`Sandbox::copy_to_sandbox`] for `path`, retrying once on lock
    /// contention before failing the task (spec §7 `LockUnavailable`
    /// policy).
    fn copy_into_sandbox_with_retry(&self, sandbox: &mut Sandbox<'_>, path: &str) -> Result<(), OrchestratorError> {
        let mut attempts_left = LOCK_RETRY_ATTEMPTS;
        loop {
            match sandbox.copy_to_sandbox(&[path]) {
                Ok(()) => return Ok(()),
                Err(apiary_sandbox::SandboxError::LockFailed { path }) if attempts_left > 0 => {
                    attempts_left -= 1;
                    tracing::debug!(path = %path, "lock contention on sandbox copy; retrying");
                }
                Err(apiary_sandbox::SandboxError::LockFailed { path }) => return Err(OrchestratorError::LockConflict(path)),
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// `startMainLoop()`: schedules ticks at `mainLoopIntervalMs` until
    /// [`Queen::stop_main_loop`] is called.
    pub async fn start_main_loop(self: &Arc<Self>) {
        self.state.lock().await.agent.status = QueenStatus::Coordinating;
        self.running.store(true, Ordering::SeqCst);
        let queen = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(queen.config.main_loop_interval_ms));
            while queen.running.load(Ordering::SeqCst) {
                interval.tick().await;
                if let Err(err) = queen.tick().await {
                    tracing::error!(error = %err, "queen tick failed");
                }
            }
        });
    }

    /// `stopMainLoop()`: halts further ticks; in-flight worker calls finish.
    pub async fn stop_main_loop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.state.lock().await.agent.status = QueenStatus::Paused;
    }

    /// One coordinator tick (spec §4.7).
    pub async fn tick(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        let tree_id = self.state.lock().await.agent.task_tree_id;

        self.finalize_if_complete(tree_id).await?;
        self.sync_worker_statuses(tree_id).await?;

        if self.config.auto_assign_tasks {
            self.auto_assign(tree_id).await?;
        }

        self.sweep_timeouts(tree_id).await?;
        self.rebuild_global_context(tree_id).await;

        Ok(())
    }

    async fn finalize_if_complete(&self, tree_id: TaskTreeId) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().await;
        let all_passed = state.trees.get_tree(tree_id).map(TaskTree::all_passed).unwrap_or(false);
        let already_finalized = state.trees.get_timeline_view(tree_id).iter().any(|c| c.name == "completion");
        if all_passed && !already_finalized {
            state.trees.create_global_checkpoint(tree_id, "completion", "all tasks passed")?;
            self.record_event(&mut state, TimelineEventKind::TaskComplete, "all tasks passed; completion checkpoint created");
        }
        Ok(())
    }

    async fn sync_worker_statuses(&self, tree_id: TaskTreeId) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().await;
        let in_flight: Vec<(TaskId, TddPhase)> = state
            .workers
            .values()
            .filter_map(|w| w.task_id.zip(w.cycle.as_ref().map(|c| c.phase)))
            .collect();
        for (task_id, phase) in in_flight {
            if let Some(status) = phase_to_status(phase) {
                state.trees.update_task_status(tree_id, task_id, status)?;
            }
        }
        Ok(())
    }

    async fn auto_assign(self: &Arc<Self>, tree_id: TaskTreeId) -> Result<(), OrchestratorError> {
        let (executable, idle_workers, busy_count, worker_count) = {
            let state = self.state.lock().await;
            let executable = state.trees.get_executable_tasks(tree_id);
            let idle: Vec<WorkerId> = state.workers.values().filter(|w| w.is_idle()).map(|w| w.id).collect();
            let busy = state.workers.values().filter(|w| !w.is_idle()).count();
            (executable, idle, busy, state.workers.len())
        };

        let slots = self.config.max_concurrent_workers.saturating_sub(busy_count);
        let mut idle_iter = idle_workers.into_iter();
        let mut spawned = worker_count;

        for task_id in executable.into_iter().take(slots) {
            let worker_id = if let Some(id) = idle_iter.next() {
                id
            } else if spawned < self.config.max_concurrent_workers {
                spawned += 1;
                self.spawn_worker().await
            } else {
                break;
            };
            self.assign_task(worker_id, task_id, tree_id).await?;
        }
        Ok(())
    }

    async fn assign_task(self: &Arc<Self>, worker_id: WorkerId, task_id: TaskId, tree_id: TaskTreeId) -> Result<(), OrchestratorError> {
        {
            let mut state = self.state.lock().await;
            if let Some(worker) = state.workers.get_mut(&worker_id) {
                worker.task_id = Some(task_id);
                worker.status = WorkerStatus::TestWriting;
                worker.record(format!("assigned task {task_id}"));
            }
            state.trees.update_task_status(tree_id, task_id, TaskStatus::TestWriting)?;
            self.record_decision(
                &mut state,
                DecisionKind::Assign,
                format!("assigned task {task_id} to worker {worker_id}"),
                "task was executable and a worker was available",
            )
            .await;
        }

        let queen = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = queen.run_worker_task(worker_id, task_id).await {
                tracing::warn!(task_id = %task_id, worker_id = %worker_id, error = %err, "worker task ended in error");
            }
        });
        Ok(())
    }

    /// Drives one worker's task through the whole TDD loop, then through the
    /// regression gate (spec §4.7 "per-worker execution").
    pub async fn run_worker_task(self: Arc<Self>, worker_id: WorkerId, task_id: TaskId) -> Result<(), OrchestratorError> {
        let tree_id = self.state.lock().await.agent.task_tree_id;

        let acceptance_tests = {
            let state = self.state.lock().await;
            state.trees.get_node(tree_id, task_id).map(|n| n.acceptance_tests.clone()).unwrap_or_default()
        };

        let baseline = apiary_gate::capture_git_baseline(&self.config.project_root)?;
        {
            let mut state = self.state.lock().await;
            state.baselines.insert(task_id, baseline);
            state.tdd.start_loop(task_id, acceptance_tests)?;
        }

        let owner_id = format!("{worker_id}-{task_id}");
        let sandbox_config = SandboxConfig::new(&self.config.project_root);
        let mut sandbox = Sandbox::new(sandbox_config, worker_id.to_string(), task_id.to_string(), &self.lock_manager);
        sandbox.setup()?;

        let drive_result = self.drive_tdd_loop(worker_id, task_id, tree_id, &mut sandbox).await;

        match drive_result {
            Ok(()) => self.finish_task_success(worker_id, task_id, tree_id, &owner_id, &mut sandbox).await,
            Err(err) => {
                self.finish_task_failure(worker_id, task_id, tree_id, &owner_id, &mut sandbox).await;
                Err(err)
            }
        }
    }

    async fn drive_tdd_loop(&self, worker_id: WorkerId, task_id: TaskId, tree_id: TaskTreeId, sandbox: &mut Sandbox<'_>) -> Result<(), OrchestratorError> {
        loop {
            let (phase, guidance, node) = {
                let state = self.state.lock().await;
                let phase = state.tdd.get_loop_state(task_id).map(|s| s.phase).ok_or(OrchestratorError::NoActiveLoop(task_id))?;
                let guidance = state.tdd.get_phase_guidance(task_id).ok_or(OrchestratorError::NoActiveLoop(task_id))?;
                let node = state.trees.get_node(tree_id, task_id).cloned().ok_or(TaskTreeError::TaskNotFound(task_id))?;
                (phase, guidance, node)
            };

            if phase == TddPhase::Done {
                return Ok(());
            }

            let outcome = self.phase_executor.execute_phase(PhaseContext { task_id, phase, guidance, node }).await?;
            self.touch_worker(worker_id).await;
            self.apply_phase_outcome(phase, outcome, task_id, tree_id, sandbox).await?;
        }
    }

    async fn touch_worker(&self, worker_id: WorkerId) {
        let mut state = self.state.lock().await;
        if let Some(worker) = state.workers.get_mut(&worker_id) {
            worker.record("phase executed");
        }
    }

    async fn apply_phase_outcome(&self, phase: TddPhase, outcome: PhaseOutcome, task_id: TaskId, tree_id: TaskTreeId, sandbox: &mut Sandbox<'_>) -> Result<(), OrchestratorError> {
        match (phase, outcome) {
            (TddPhase::WriteTest, PhaseOutcome::TestCode { test_code, file_path, command, acceptance_criteria }) => {
                let mut state = self.state.lock().await;
                state.tdd.submit_test_code(task_id, test_code, file_path, command, acceptance_criteria)?;
                Ok(())
            }
            (TddPhase::RunTestRed, PhaseOutcome::RedResult { unit_passed, acceptance_results }) => {
                let mut state = self.state.lock().await;
                if let Some(passed) = unit_passed {
                    state.tdd.submit_red_test_result(task_id, passed)?;
                }
                state.tdd.submit_acceptance_test_red_results(task_id, &acceptance_results)?;
                Ok(())
            }
            (TddPhase::WriteCode, PhaseOutcome::ImplementationCode { artifacts }) => {
                self.apply_artifacts(&artifacts, sandbox)?;
                let mut state = self.state.lock().await;
                let accepted = state.tdd.submit_implementation_code(task_id, artifacts)?;
                state.trees.append_code_artifacts(tree_id, task_id, accepted)?;
                Ok(())
            }
            (TddPhase::RunTestGreen, PhaseOutcome::GreenResult { unit_passed, acceptance_results }) => {
                let mut state = self.state.lock().await;
                if let Some(passed) = unit_passed {
                    state.tdd.submit_green_test_result(task_id, passed)?;
                }
                let green_outcome = state.tdd.submit_acceptance_test_green_results(task_id, &acceptance_results)?;
                if green_outcome == GreenOutcome::CeilingExceeded {
                    return Err(OrchestratorError::CeilingExceeded(task_id));
                }
                Ok(())
            }
            (TddPhase::Refactor, PhaseOutcome::RefactorResult { passed, artifacts }) => {
                self.apply_artifacts(&artifacts, sandbox)?;
                let mut state = self.state.lock().await;
                let accepted = state.tdd.complete_refactoring(task_id, passed, artifacts)?;
                state.trees.append_code_artifacts(tree_id, task_id, accepted)?;
                Ok(())
            }
            (phase, _) => Err(OrchestratorError::PhaseMismatch(phase)),
        }
    }

    /// Builds the submission, runs the regression gate against the worker's
    /// *sandbox* copy, and only once it passes syncs the sandbox back to the
    /// real project tree (spec §4.7 step 3, §4.4 `syncBack`). Nothing lands
    /// outside the sandbox before the gate passes — a rejected submission or
    /// a sandbox sync conflict leaves the real tree untouched.
    async fn finish_task_success(&self, worker_id: WorkerId, task_id: TaskId, tree_id: TaskTreeId, owner_id: &str, sandbox: &mut Sandbox<'_>) -> Result<(), OrchestratorError> {
        let (artifacts, baseline, task_name) = {
            let state = self.state.lock().await;
            let node = state.trees.get_node(tree_id, task_id).cloned().ok_or(TaskTreeError::TaskNotFound(task_id))?;
            let baseline = state.baselines.get(&task_id).cloned().flatten();
            (node.code_artifacts.clone(), baseline, node.name.clone())
        };
        let regression_scope = self.state.lock().await.trees.get_node(tree_id, task_id).and_then(TaskNode::regression_scope);

        let new_test_files: Vec<String> = artifacts.iter().map(|a| a.file_path.clone()).collect();
        let tracked_paths = sandbox.tracked_paths();
        let sandbox_dir = sandbox.sandbox_dir();
        let submission = apiary_gate::build_submission(SubmissionRequest {
            repo_root: &self.config.project_root,
            sandbox_dir: Some(&sandbox_dir),
            tracked_paths: &tracked_paths,
            baseline: baseline.as_ref(),
            fallback_artifacts: &artifacts,
            worker_id: worker_id.to_string(),
            task_id,
            task_name,
            new_test_files,
            regression_scope,
        })?;

        let verdict = self.state.lock().await.gate.evaluate(&submission);

        let sync_result = verdict.passed.then(|| sandbox.sync_back());
        let conflicts = sync_result.as_ref().map(|r| r.conflicts.clone()).filter(|c| !c.is_empty());

        let mut state = self.state.lock().await;
        if verdict.passed && conflicts.is_none() {
            let archived = apiary_gate::archive_unrecorded_changes(&self.config.project_root, &submission, &artifacts);
            state.trees.append_code_artifacts(tree_id, task_id, archived)?;
            state.trees.update_task_status(tree_id, task_id, TaskStatus::Passed)?;
            self.record_event(&mut state, TimelineEventKind::TestPass, format!("task {task_id} passed"));
        } else {
            state.trees.update_task_status(tree_id, task_id, TaskStatus::TestFailed)?;
            let (retry_count, max_retries) = state
                .trees
                .get_node(tree_id, task_id)
                .map(|n| (n.retry_count, n.max_retries))
                .unwrap_or((0, 0));
            let kind = if retry_count < max_retries { DecisionKind::Retry } else { DecisionKind::Escalate };
            let reason = match &conflicts {
                Some(paths) => format!("sandbox sync conflict on {paths:?}"),
                None => verdict.reasons.join("; "),
            };
            self.record_decision(&mut state, kind, format!("task {task_id} failed the regression gate"), reason).await;
            self.record_event(&mut state, TimelineEventKind::TestFail, format!("task {task_id} rejected by regression gate"));
        }
        drop(state);

        sandbox.cleanup();
        self.release_locks_for(owner_id);
        self.free_worker(worker_id).await;
        self.state.lock().await.tdd.discard_loop(task_id);

        if let Some(paths) = conflicts {
            return Err(OrchestratorError::Sandbox(apiary_sandbox::SandboxError::SandboxSyncConflict { paths }));
        }
        Ok(())
    }

    async fn finish_task_failure(&self, worker_id: WorkerId, task_id: TaskId, tree_id: TaskTreeId, owner_id: &str, sandbox: &mut Sandbox<'_>) {
        let mut state = self.state.lock().await;
        let _ = state.trees.update_task_status(tree_id, task_id, TaskStatus::TestFailed);
        let (retry_count, max_retries) = state
            .trees
            .get_node(tree_id, task_id)
            .map(|n| (n.retry_count, n.max_retries))
            .unwrap_or((0, 0));
        let kind = if retry_count < max_retries { DecisionKind::Retry } else { DecisionKind::Escalate };
        self.record_decision(&mut state, kind, format!("task {task_id} failed during its TDD loop"), "phase executor or TDD engine returned an error").await;
        self.record_event(&mut state, TimelineEventKind::TestFail, format!("task {task_id} failed"));
        state.tdd.discard_loop(task_id);
        drop(state);

        sandbox.cleanup();
        self.release_locks_for(owner_id);
        let _ = std::fs::remove_dir_all(self.sandbox_dir_for(worker_id, task_id));
        self.free_worker(worker_id).await;
    }

    async fn free_worker(&self, worker_id: WorkerId) {
        let mut state = self.state.lock().await;
        if let Some(worker) = state.workers.get_mut(&worker_id) {
            worker.task_id = None;
            worker.status = WorkerStatus::Idle;
            worker.cycle = None;
        }
    }

    async fn sweep_timeouts(&self, tree_id: TaskTreeId) -> Result<(), OrchestratorError> {
        let now = chrono::Utc::now();
        let timed_out: Vec<(WorkerId, TaskId)> = {
            let state = self.state.lock().await;
            state
                .workers
                .values()
                .filter_map(|w| {
                    w.task_id.and_then(|t| {
                        let elapsed = now.signed_duration_since(w.last_action_at).num_milliseconds();
                        (elapsed > self.config.worker_timeout_ms).then_some((w.id, t))
                    })
                })
                .collect()
        };

        for (worker_id, task_id) in timed_out {
            let owner_id = format!("{worker_id}-{task_id}");
            {
                let mut state = self.state.lock().await;
                let _ = state.trees.update_task_status(tree_id, task_id, TaskStatus::TestFailed);
                state.tdd.discard_loop(task_id);
                self.record_decision(&mut state, DecisionKind::Escalate, format!("worker {worker_id} timed out on task {task_id}"), "last action exceeded worker_timeout_ms").await;
                self.record_event(&mut state, TimelineEventKind::TestFail, format!("worker {worker_id} timed out"));
            }
            self.release_locks_for(&owner_id);
            let _ = std::fs::remove_dir_all(self.sandbox_dir_for(worker_id, task_id));
            self.free_worker(worker_id).await;
        }
        Ok(())
    }

    async fn rebuild_global_context(&self, tree_id: TaskTreeId) {
        let mut state = self.state.lock().await;
        if let Some(tree) = state.trees.get_tree(tree_id) {
            state.agent.global_context = build_global_context(tree);
        }
    }

    /// `rollback(treeId, checkpointId)`: pauses the main loop if running,
    /// replaces the tree/subtree, resumes if it was running (spec §4.8).
    pub async fn rollback(&self, checkpoint_id: apiary_model::ids::CheckpointId) -> Result<(), OrchestratorError> {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let tree_id = self.state.lock().await.agent.task_tree_id;

        {
            let mut state = self.state.lock().await;
            state.trees.rollback(tree_id, checkpoint_id)?;
            self.record_decision(&mut state, DecisionKind::Rollback, format!("rolled back to checkpoint {checkpoint_id}"), "requested by caller").await;
            self.record_event(&mut state, TimelineEventKind::Rollback, format!("rolled back to checkpoint {checkpoint_id}"));
        }

        if was_running {
            self.running.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    pub async fn preview_rollback(&self, checkpoint_id: apiary_model::ids::CheckpointId) -> Result<apiary_tasktree::RollbackPreview, OrchestratorError> {
        let state = self.state.lock().await;
        Ok(state.trees.preview_rollback(state.agent.task_tree_id, checkpoint_id)?)
    }

    #[must_use]
    pub async fn get_timeline_view(&self) -> Vec<apiary_tasktree::TimelineCheckpointSummary> {
        let state = self.state.lock().await;
        state.trees.get_timeline_view(state.agent.task_tree_id)
    }

    #[must_use]
    pub async fn generate_timeline_ascii(&self) -> String {
        let state = self.state.lock().await;
        state.trees.generate_timeline_ascii(state.agent.task_tree_id)
    }

    #[must_use]
    pub async fn get_node(&self, task_id: TaskId) -> Option<TaskNode> {
        let state = self.state.lock().await;
        state.trees.get_node(state.agent.task_tree_id, task_id).cloned()
    }

    #[must_use]
    pub async fn task_tree_id(&self) -> TaskTreeId {
        self.state.lock().await.agent.task_tree_id
    }

    /// Exports the current tree plus every checkpoint taken against it, for
    /// callers that need to persist a session across process invocations.
    pub async fn export_tree(&self) -> Result<apiary_tasktree::TaskTreeSnapshot, OrchestratorError> {
        let state = self.state.lock().await;
        Ok(state.trees.export_tree(state.agent.task_tree_id)?)
    }

    /// Registers a previously exported snapshot as this queen's active tree.
    pub async fn import_tree(&self, snapshot: apiary_tasktree::TaskTreeSnapshot) {
        let mut state = self.state.lock().await;
        let tree_id = state.trees.import_tree(snapshot);
        state.agent.task_tree_id = tree_id;
    }
}

/// Convenience for phase executors that need to know the test directory
/// without threading `QueenConfig` through every call site.
#[must_use]
pub fn test_file_path(config: &QueenConfig, name: &str) -> PathBuf {
    Path::new(&config.test_directory).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiary_model::blueprint::{BusinessProcess, Module, ModuleType};
    use apiary_tasktree::DefaultAcceptanceTestGenerator;

    fn one_task_blueprint() -> Blueprint {
        let mut bp = Blueprint::new("proj", "desc", "/tmp/p");
        bp.add_process(BusinessProcess::new("p", "d").with_step("s", "d"));
        bp.add_module(Module::new("m", ModuleType::Backend).with_responsibilities(vec!["do the thing".to_string()]));
        bp
    }

    /// Always succeeds on the first try: red fails, green passes, refactor passes.
    struct HappyPathExecutor;

    #[async_trait]
    impl PhaseExecutor for HappyPathExecutor {
        async fn execute_phase(&self, ctx: PhaseContext) -> Result<PhaseOutcome, OrchestratorError> {
            let n = ctx.node.acceptance_tests.len();
            Ok(match ctx.phase {
                TddPhase::WriteTest => PhaseOutcome::TestCode {
                    test_code: "assert(false)".to_string(),
                    file_path: "t.rs".to_string(),
                    command: "cargo test".to_string(),
                    acceptance_criteria: vec!["works".to_string()],
                },
                TddPhase::RunTestRed => PhaseOutcome::RedResult {
                    unit_passed: Some(false),
                    acceptance_results: vec![false; n],
                },
                TddPhase::WriteCode => PhaseOutcome::ImplementationCode {
                    artifacts: vec![CodeArtifact::new("impl.rs", Some("fn x() {}".to_string()), ChangeType::Create)],
                },
                TddPhase::RunTestGreen => PhaseOutcome::GreenResult {
                    unit_passed: Some(true),
                    acceptance_results: vec![true; n],
                },
                TddPhase::Refactor => PhaseOutcome::RefactorResult { passed: true, artifacts: vec![] },
                TddPhase::Done => unreachable!("loop stops before requesting done"),
            })
        }
    }

    /// Green phase always fails, driving the iteration counter until the
    /// ceiling is hit.
    struct AlwaysRedGreenExecutor;

    #[async_trait]
    impl PhaseExecutor for AlwaysRedGreenExecutor {
        async fn execute_phase(&self, ctx: PhaseContext) -> Result<PhaseOutcome, OrchestratorError> {
            let n = ctx.node.acceptance_tests.len();
            Ok(match ctx.phase {
                TddPhase::WriteTest => PhaseOutcome::TestCode {
                    test_code: "assert(false)".to_string(),
                    file_path: "t.rs".to_string(),
                    command: "cargo test".to_string(),
                    acceptance_criteria: vec![],
                },
                TddPhase::RunTestRed => PhaseOutcome::RedResult {
                    unit_passed: Some(false),
                    acceptance_results: vec![false; n],
                },
                TddPhase::WriteCode => PhaseOutcome::ImplementationCode { artifacts: vec![] },
                TddPhase::RunTestGreen => PhaseOutcome::GreenResult {
                    unit_passed: Some(false),
                    acceptance_results: vec![false; n],
                },
                TddPhase::Refactor | TddPhase::Done => unreachable!("green never advances past run_test_green"),
            })
        }
    }

    struct NoopObserver;
    impl Observer for NoopObserver {
        fn on_decision(&self, _decision: &Decision) {}
        fn on_event(&self, _event: &TimelineEvent) {}
    }

    async fn new_queen(project_root: &Path, executor: Box<dyn PhaseExecutor>) -> Arc<Queen> {
        let mut config = QueenConfig::new(project_root);
        config.auto_assign_tasks = true;
        config.max_concurrent_workers = 2;
        Arc::new(Queen::new(
            config,
            BlueprintId::new(),
            executor,
            Box::new(NoopObserver),
            Box::new(apiary_gate::PermissiveValidator),
        ))
    }

    async fn single_leaf(queen: &Queen, tree_id: TaskTreeId) -> TaskId {
        let state = queen.state.lock().await;
        let id = state.trees.get_tree(tree_id).unwrap().leaves().next().unwrap().id;
        id
    }

    #[tokio::test]
    async fn single_task_passes_on_first_try() {
        let dir = tempfile::tempdir().unwrap();
        let queen = new_queen(dir.path(), Box::new(HappyPathExecutor)).await;
        let bp = one_task_blueprint();
        queen.initialize(&bp, &DefaultAcceptanceTestGenerator).await;

        let tree_id = queen.task_tree_id().await;
        let task_id = single_leaf(&queen, tree_id).await;

        let worker_id = queen.spawn_worker().await;
        queen.clone().run_worker_task(worker_id, task_id).await.unwrap();

        let node = queen.get_node(task_id).await.unwrap();
        assert_eq!(node.status, TaskStatus::Passed);
        assert!(!node.code_artifacts.is_empty());
        assert!(dir.path().join("impl.rs").is_file());
    }

    #[tokio::test]
    async fn ceiling_exceeded_surfaces_as_a_retry_decision() {
        let dir = tempfile::tempdir().unwrap();
        let queen = new_queen(dir.path(), Box::new(AlwaysRedGreenExecutor)).await;
        let bp = one_task_blueprint();
        queen.initialize(&bp, &DefaultAcceptanceTestGenerator).await;

        let tree_id = queen.task_tree_id().await;
        let task_id = single_leaf(&queen, tree_id).await;

        let worker_id = queen.spawn_worker().await;
        let err = queen.clone().run_worker_task(worker_id, task_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::CeilingExceeded(_)));

        let node = queen.get_node(task_id).await.unwrap();
        assert_eq!(node.status, TaskStatus::TestFailed);

        let decisions = queen.decision_log().await;
        assert!(decisions.iter().any(|d| d.kind == DecisionKind::Retry));
    }

    /// Writes `a.ts` itself, then (simulating some writer outside this
    /// system touching the real project tree between the sandbox copy and
    /// the eventual sync-back) overwrites the real file directly during the
    /// green phase, bypassing the lock manager entirely.
    struct ExternalWriterExecutor {
        project_root: PathBuf,
    }

    #[async_trait]
    impl PhaseExecutor for ExternalWriterExecutor {
        async fn execute_phase(&self, ctx: PhaseContext) -> Result<PhaseOutcome, OrchestratorError> {
            let n = ctx.node.acceptance_tests.len();
            Ok(match ctx.phase {
                TddPhase::WriteTest => PhaseOutcome::TestCode {
                    test_code: "assert(false)".to_string(),
                    file_path: "t.rs".to_string(),
                    command: "cargo test".to_string(),
                    acceptance_criteria: vec!["works".to_string()],
                },
                TddPhase::RunTestRed => PhaseOutcome::RedResult {
                    unit_passed: Some(false),
                    acceptance_results: vec![false; n],
                },
                TddPhase::WriteCode => PhaseOutcome::ImplementationCode {
                    artifacts: vec![CodeArtifact::new("a.ts", Some("mine".to_string()), ChangeType::Create)],
                },
                TddPhase::RunTestGreen => {
                    std::fs::write(self.project_root.join("a.ts"), "external change").unwrap();
                    PhaseOutcome::GreenResult {
                        unit_passed: Some(true),
                        acceptance_results: vec![true; n],
                    }
                }
                TddPhase::Refactor => PhaseOutcome::RefactorResult { passed: true, artifacts: vec![] },
                TddPhase::Done => unreachable!("loop stops before requesting done"),
            })
        }
    }

    #[tokio::test]
    async fn sync_back_conflict_surfaces_as_sandbox_sync_conflict_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ExternalWriterExecutor { project_root: dir.path().to_path_buf() };
        let queen = new_queen(dir.path(), Box::new(executor)).await;
        let bp = one_task_blueprint();
        queen.initialize(&bp, &DefaultAcceptanceTestGenerator).await;

        let tree_id = queen.task_tree_id().await;
        let task_id = single_leaf(&queen, tree_id).await;

        let worker_id = queen.spawn_worker().await;
        let err = queen.clone().run_worker_task(worker_id, task_id).await.unwrap_err();
        match err {
            OrchestratorError::Sandbox(apiary_sandbox::SandboxError::SandboxSyncConflict { paths }) => {
                assert_eq!(paths, vec!["a.ts".to_string()]);
            }
            other => panic!("expected a SandboxSyncConflict, got {other:?}"),
        }

        let node = queen.get_node(task_id).await.unwrap();
        assert_eq!(node.status, TaskStatus::TestFailed);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.ts")).unwrap(),
            "external change",
            "the conflicting file must never be silently overwritten"
        );
    }

    #[tokio::test]
    async fn tick_auto_assigns_executable_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let queen = new_queen(dir.path(), Box::new(HappyPathExecutor)).await;
        let bp = one_task_blueprint();
        queen.initialize(&bp, &DefaultAcceptanceTestGenerator).await;

        queen.tick().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let tree_id = queen.task_tree_id().await;
        let passed = {
            let state = queen.state.lock().await;
            state.trees.get_tree(tree_id).unwrap().all_passed()
        };
        assert!(passed);
    }

    #[tokio::test]
    async fn worker_timeout_is_swept_and_escalated() {
        let dir = tempfile::tempdir().unwrap();
        let queen = new_queen(dir.path(), Box::new(HappyPathExecutor)).await;
        let bp = one_task_blueprint();
        queen.initialize(&bp, &DefaultAcceptanceTestGenerator).await;
        let tree_id = queen.task_tree_id().await;
        let task_id = single_leaf(&queen, tree_id).await;

        let worker_id = queen.spawn_worker().await;
        {
            let mut state = queen.state.lock().await;
            if let Some(worker) = state.workers.get_mut(&worker_id) {
                worker.task_id = Some(task_id);
                worker.status = WorkerStatus::Coding;
                worker.last_action_at = chrono::Utc::now() - chrono::Duration::milliseconds(queen.config.worker_timeout_ms + 1000);
            }
            state.trees.update_task_status(tree_id, task_id, TaskStatus::Coding).unwrap();
        }

        queen.sweep_timeouts(tree_id).await.unwrap();

        let node = queen.get_node(task_id).await.unwrap();
        assert_eq!(node.status, TaskStatus::TestFailed);
        let decisions = queen.decision_log().await;
        assert!(decisions.iter().any(|d| d.kind == DecisionKind::Escalate));
    }

    /// Green fails on the first two attempts, then passes on the third.
    struct FlakyGreenExecutor {
        green_attempts: Arc<std::sync::atomic::AtomicU32>,
    }

    #[async_trait]
    impl PhaseExecutor for FlakyGreenExecutor {
        async fn execute_phase(&self, ctx: PhaseContext) -> Result<PhaseOutcome, OrchestratorError> {
            let n = ctx.node.acceptance_tests.len();
            Ok(match ctx.phase {
                TddPhase::WriteTest => PhaseOutcome::TestCode {
                    test_code: "assert(false)".to_string(),
                    file_path: "t.rs".to_string(),
                    command: "cargo test".to_string(),
                    acceptance_criteria: vec![],
                },
                TddPhase::RunTestRed => PhaseOutcome::RedResult {
                    unit_passed: Some(false),
                    acceptance_results: vec![false; n],
                },
                TddPhase::WriteCode => PhaseOutcome::ImplementationCode { artifacts: vec![] },
                TddPhase::RunTestGreen => {
                    let attempt = self.green_attempts.fetch_add(1, Ordering::SeqCst);
                    PhaseOutcome::GreenResult {
                        unit_passed: Some(attempt >= 2),
                        acceptance_results: vec![attempt >= 2; n],
                    }
                }
                TddPhase::Refactor => PhaseOutcome::RefactorResult { passed: true, artifacts: vec![] },
                TddPhase::Done => unreachable!("loop stops before requesting done"),
            })
        }
    }

    #[tokio::test]
    async fn green_fails_twice_then_passes() {
        let dir = tempfile::tempdir().unwrap();
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let executor = FlakyGreenExecutor { green_attempts: Arc::clone(&counter) };
        let queen = new_queen(dir.path(), Box::new(executor)).await;
        let bp = one_task_blueprint();
        queen.initialize(&bp, &DefaultAcceptanceTestGenerator).await;

        let tree_id = queen.task_tree_id().await;
        let task_id = single_leaf(&queen, tree_id).await;

        let worker_id = queen.spawn_worker().await;
        queen.clone().run_worker_task(worker_id, task_id).await.unwrap();

        let node = queen.get_node(task_id).await.unwrap();
        assert_eq!(node.status, TaskStatus::Passed);

        // Two failing green attempts (iteration bumped twice) then a third
        // that finally passes, well inside `maxIterations`.
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        let decisions = queen.decision_log().await;
        assert!(!decisions.iter().any(|d| d.kind == DecisionKind::Escalate));
    }

    fn two_independent_modules_blueprint(file_a: &str, file_b: &str) -> Blueprint {
        let mut bp = Blueprint::new("proj", "desc", "/tmp/p");
        bp.add_process(BusinessProcess::new("p", "d").with_step("s", "d"));
        bp.add_module(Module::new("a", ModuleType::Backend).with_responsibilities(vec![format!("own {file_a}")]));
        bp.add_module(Module::new("b", ModuleType::Backend).with_responsibilities(vec![format!("own {file_b}")]));
        bp
    }

    /// Writes whatever file the task's own name (its one acceptance
    /// responsibility) says to own, so two sibling tasks can be pointed at
    /// either disjoint files or the same shared one.
    struct FileWritingExecutor {
        /// Task name (the "own <file>" responsibility) this executor should
        /// stall on during `run_test_green`, to widen the lock-hold window.
        stall_on: Option<String>,
    }

    #[async_trait]
    impl PhaseExecutor for FileWritingExecutor {
        async fn execute_phase(&self, ctx: PhaseContext) -> Result<PhaseOutcome, OrchestratorError> {
            let n = ctx.node.acceptance_tests.len();
            let file_path = ctx.node.name.trim_start_matches("own ").to_string();
            Ok(match ctx.phase {
                TddPhase::WriteTest => PhaseOutcome::TestCode {
                    test_code: "assert(false)".to_string(),
                    file_path: "t.rs".to_string(),
                    command: "cargo test".to_string(),
                    acceptance_criteria: vec![],
                },
                TddPhase::RunTestRed => PhaseOutcome::RedResult {
                    unit_passed: Some(false),
                    acceptance_results: vec![false; n],
                },
                TddPhase::WriteCode => PhaseOutcome::ImplementationCode {
                    artifacts: vec![CodeArtifact::new(file_path, Some(format!("// {}\n", ctx.node.name)), ChangeType::Create)],
                },
                TddPhase::RunTestGreen => {
                    if self.stall_on.as_deref() == Some(ctx.node.name.as_str()) {
                        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
                    }
                    PhaseOutcome::GreenResult {
                        unit_passed: Some(true),
                        acceptance_results: vec![true; n],
                    }
                }
                TddPhase::Refactor => PhaseOutcome::RefactorResult { passed: true, artifacts: vec![] },
                TddPhase::Done => unreachable!("loop stops before requesting done"),
            })
        }
    }

    #[tokio::test]
    async fn two_workers_disjoint_files_both_pass() {
        let dir = tempfile::tempdir().unwrap();
        let queen = new_queen(dir.path(), Box::new(FileWritingExecutor { stall_on: None })).await;
        let bp = two_independent_modules_blueprint("a.ts", "b.ts");
        queen.initialize(&bp, &DefaultAcceptanceTestGenerator).await;

        let tree_id = queen.task_tree_id().await;
        let (task_a, task_b) = {
            let state = queen.state.lock().await;
            let tree = state.trees.get_tree(tree_id).unwrap();
            let mut leaves = tree.leaves();
            let a = leaves.next().unwrap().id;
            let b = leaves.next().unwrap().id;
            (a, b)
        };

        let worker_a = queen.spawn_worker().await;
        let worker_b = queen.spawn_worker().await;

        let (result_a, result_b) = tokio::join!(
            Arc::clone(&queen).run_worker_task(worker_a, task_a),
            Arc::clone(&queen).run_worker_task(worker_b, task_b),
        );
        result_a.unwrap();
        result_b.unwrap();

        assert_eq!(queen.get_node(task_a).await.unwrap().status, TaskStatus::Passed);
        assert_eq!(queen.get_node(task_b).await.unwrap().status, TaskStatus::Passed);
        assert!(dir.path().join("a.ts").is_file());
        assert!(dir.path().join("b.ts").is_file());
    }

    #[tokio::test]
    async fn two_workers_shared_file_conflict_second_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bp = two_independent_modules_blueprint("shared.ts", "shared.ts");
        // Whichever leaf comes first in iteration order is made to stall in
        // `run_test_green`, holding the lock on `shared.ts` open long enough
        // for the other worker to collide with it in `write_code`.
        let stalling_name = {
            let mut mgr = TaskTreeManager::new();
            let tree_id = mgr.generate_from_blueprint(&bp, &DefaultAcceptanceTestGenerator);
            let name = mgr.get_tree(tree_id).unwrap().leaves().next().unwrap().name.clone();
            name
        };
        let queen = new_queen(dir.path(), Box::new(FileWritingExecutor { stall_on: Some(stalling_name) })).await;
        queen.initialize(&bp, &DefaultAcceptanceTestGenerator).await;

        let tree_id = queen.task_tree_id().await;
        let (task_a, task_b) = {
            let state = queen.state.lock().await;
            let tree = state.trees.get_tree(tree_id).unwrap();
            let mut leaves = tree.leaves();
            let a = leaves.next().unwrap().id;
            let b = leaves.next().unwrap().id;
            (a, b)
        };

        let worker_a = queen.spawn_worker().await;
        let worker_b = queen.spawn_worker().await;

        let (result_a, result_b) = tokio::join!(
            Arc::clone(&queen).run_worker_task(worker_a, task_a),
            Arc::clone(&queen).run_worker_task(worker_b, task_b),
        );

        let outcomes = [result_a, result_b];
        let failures: Vec<_> = outcomes.iter().filter(|r| r.is_err()).collect();
        let successes = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1, "exactly one of the two racing tasks should succeed");
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].as_ref().unwrap_err(), OrchestratorError::LockConflict(path) if path == "shared.ts"));

        let statuses = [queen.get_node(task_a).await.unwrap().status, queen.get_node(task_b).await.unwrap().status];
        assert_eq!(statuses.iter().filter(|s| **s == TaskStatus::Passed).count(), 1);
        assert_eq!(statuses.iter().filter(|s| **s == TaskStatus::TestFailed).count(), 1);
    }

    #[tokio::test]
    async fn rollback_restores_task_status_at_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let queen = new_queen(dir.path(), Box::new(HappyPathExecutor)).await;
        let bp = one_task_blueprint();
        queen.initialize(&bp, &DefaultAcceptanceTestGenerator).await;

        let tree_id = queen.task_tree_id().await;
        let task_id = single_leaf(&queen, tree_id).await;

        // Move the task into "coding" and snapshot it there before letting
        // the worker run it all the way to completion.
        let checkpoint_id = {
            let mut state = queen.state.lock().await;
            state.trees.update_task_status(tree_id, task_id, TaskStatus::Coding).unwrap();
            state.trees.create_task_checkpoint(tree_id, task_id, "mid-coding", "").unwrap()
        };

        let worker_id = queen.spawn_worker().await;
        queen.clone().run_worker_task(worker_id, task_id).await.unwrap();
        assert_eq!(queen.get_node(task_id).await.unwrap().status, TaskStatus::Passed);

        let timeline_before = queen.get_timeline_view().await;

        queen.rollback(checkpoint_id).await.unwrap();

        assert_eq!(queen.get_node(task_id).await.unwrap().status, TaskStatus::Coding);

        let timeline_after = queen.get_timeline_view().await;
        assert!(timeline_after.len() >= timeline_before.len(), "timeline history is append-only");
        assert!(timeline_after.iter().any(|c| c.name == "mid-coding"));
    }
}
