//! Data model for the agent-based TDD task orchestrator.
//!
//! This is the leaf crate in the workspace's dependency order: it defines
//! the [`Blueprint`](blueprint::Blueprint)/[`TaskTree`](tasktree::TaskTree)
//! data model and its JSON persistence, with no dependency on any other
//! workspace crate. Every other crate builds on these types.

#![allow(missing_docs)]

pub mod agents;
pub mod blueprint;
pub mod checkpoint;
pub mod error;
pub mod hash;
pub mod ids;
pub mod persistence;
pub mod tasktree;

pub mod prelude {
    pub use crate::agents::{
        Action, Decision, DecisionKind, QueenAgent, QueenStatus, TddLoopState, TddPhase,
        TimelineEvent, TimelineEventKind, WorkerAgent, WorkerStatus,
    };
    pub use crate::blueprint::{
        Blueprint, BlueprintStatus, BlueprintValidation, BusinessProcess, ChangeKind, ChangeRecord,
        Module, ModuleType, Nfr, NfrPriority, ProcessStep, Version,
    };
    pub use crate::checkpoint::{Checkpoint, CheckpointKind};
    pub use crate::hash::ContentHash;
    pub use crate::ids::{
        AcceptanceTestId, BlueprintId, CheckpointId, DecisionId, EventId, ModuleId, NfrId,
        ProcessId, QueenId, TaskId, TaskTreeId, WorkerId,
    };
    pub use crate::tasktree::{
        AcceptanceCriterion, AcceptanceTest, ChangeType, CodeArtifact, RegressionScope, TaskNode,
        TaskStatus, TaskTree, TaskTreeStats, TestSpec,
    };
}
