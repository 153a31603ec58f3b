//! Queen/Worker agent data model and TDD cycle state (spec §3, §4.3)

use crate::ids::{DecisionId, EventId, QueenId, TaskId, TaskTreeId, WorkerId};
use crate::tasktree::{AcceptanceTest, TestSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The six phases of the per-task TDD state machine (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TddPhase {
    WriteTest,
    RunTestRed,
    WriteCode,
    RunTestGreen,
    Refactor,
    Done,
}

/// State of a task's TDD loop (spec §4.3 "State").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TddLoopState {
    pub phase: TddPhase,
    pub iteration: u32,
    pub max_iterations: u32,
    pub test_spec: Option<TestSpec>,
    pub acceptance_tests: Vec<AcceptanceTest>,
    pub code_written: bool,
    pub last_error: Option<String>,
    /// Total phase-transition steps taken, bounded by the overall ceiling
    /// `max(max_iterations * 10, 20)` (spec §4.3).
    pub steps_taken: u32,
}

impl TddLoopState {
    #[must_use]
    pub fn new(acceptance_tests: Vec<AcceptanceTest>) -> Self {
        Self {
            phase: TddPhase::WriteTest,
            iteration: 0,
            max_iterations: 10,
            test_spec: None,
            acceptance_tests,
            code_written: false,
            last_error: None,
            steps_taken: 0,
        }
    }

    #[must_use]
    pub fn step_ceiling(&self) -> u32 {
        (self.max_iterations * 10).max(20)
    }
}

/// Queen agent status (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueenStatus {
    Idle,
    Coordinating,
    Paused,
}

/// Worker agent status (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    TestWriting,
    Testing,
    Coding,
    Reporting,
}

/// A single action taken by a worker, for its append-only action log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

/// A running worker agent, owning one task at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerAgent {
    pub id: WorkerId,
    pub queen_id: QueenId,
    pub task_id: Option<TaskId>,
    pub status: WorkerStatus,
    pub cycle: Option<TddLoopState>,
    pub actions: Vec<Action>,
    pub last_action_at: DateTime<Utc>,
}

impl WorkerAgent {
    #[must_use]
    pub fn new(queen_id: QueenId) -> Self {
        Self {
            id: WorkerId::new(),
            queen_id,
            task_id: None,
            status: WorkerStatus::Idle,
            cycle: None,
            actions: Vec::new(),
            last_action_at: Utc::now(),
        }
    }

    pub fn record(&mut self, description: impl Into<String>) {
        self.actions.push(Action {
            timestamp: Utc::now(),
            description: description.into(),
        });
        self.last_action_at = Utc::now();
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.task_id.is_none() && matches!(self.status, WorkerStatus::Idle)
    }
}

/// The kind of a queen [`Decision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Assign,
    Retry,
    Escalate,
    Rollback,
}

/// An entry in the queen's append-only decision log (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: DecisionId,
    pub timestamp: DateTime<Utc>,
    pub kind: DecisionKind,
    pub description: String,
    pub reasoning: String,
}

impl Decision {
    #[must_use]
    pub fn new(kind: DecisionKind, description: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            id: DecisionId::new(),
            timestamp: Utc::now(),
            kind,
            description: description.into(),
            reasoning: reasoning.into(),
        }
    }
}

/// Timeline event kind (spec §3 "TimelineEvent").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
    TaskStart,
    TaskComplete,
    TestPass,
    TestFail,
    Rollback,
    Decision,
}

/// A globally-ordered event on the orchestrator's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub kind: TimelineEventKind,
    pub description: String,
    pub payload: Option<serde_json::Value>,
}

impl TimelineEvent {
    #[must_use]
    pub fn new(kind: TimelineEventKind, description: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            kind,
            description: description.into(),
            payload: None,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// A queen coordinator instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueenAgent {
    pub id: QueenId,
    pub blueprint_id: crate::ids::BlueprintId,
    pub task_tree_id: TaskTreeId,
    pub status: QueenStatus,
    pub worker_ids: Vec<WorkerId>,
    pub global_context: String,
    pub decisions: Vec<Decision>,
}

impl QueenAgent {
    #[must_use]
    pub fn new(blueprint_id: crate::ids::BlueprintId, task_tree_id: TaskTreeId) -> Self {
        Self {
            id: QueenId::new(),
            blueprint_id,
            task_tree_id,
            status: QueenStatus::Idle,
            worker_ids: Vec::new(),
            global_context: String::new(),
            decisions: Vec::new(),
        }
    }

    pub fn record_decision(&mut self, decision: Decision) {
        self.decisions.push(decision);
    }
}
