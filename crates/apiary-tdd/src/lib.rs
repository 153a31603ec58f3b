//! Per-task TDD state machine (spec §4.3).
//!
//! Advances via a pure `(state, event) -> state'` transformation over
//! [`TddLoopState`], so the coordinator can be driven and tested without a
//! real phase executor (Design Notes guidance: model the TDD machine as a
//! tagged sum, advance with a pure function).

use std::collections::HashMap;

use apiary_model::agents::{TddLoopState, TddPhase};
use apiary_model::ids::{AcceptanceTestId, TaskId};
use apiary_model::tasktree::{AcceptanceTest, CodeArtifact, TestSpec};
use thiserror::Error;

/// Errors raised by the TDD engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TddError {
    #[error("task {0} has no active TDD loop")]
    NotInLoop(TaskId),
    #[error("task {0} already has an active TDD loop")]
    AlreadyInLoop(TaskId),
    #[error("task {0} is in phase {1:?}, which does not accept this operation")]
    WrongPhase(TaskId, TddPhase),
    #[error("expected {expected} acceptance test results, got {actual}")]
    ResultCountMismatch { expected: usize, actual: usize },
    #[error("unknown acceptance test id for this task")]
    UnknownAcceptanceTest,
}

/// Outcome of submitting a green-phase result, surfaced to the coordinator
/// so it can decide whether to keep driving the loop or mark the task
/// failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreenOutcome {
    /// Not every declared result has arrived yet; still waiting.
    Pending,
    /// All tests passed; phase advanced to `refactor`.
    Advanced,
    /// At least one test failed; re-entered `write_code` for another pass.
    RetryWriteCode,
    /// The iteration or overall step ceiling was reached; the coordinator
    /// should transition the task to `test_failed`.
    CeilingExceeded,
}

/// Textual guidance for the phase executor (spec §4.3 `getPhaseGuidance`).
#[derive(Debug, Clone)]
pub struct PhaseGuidance {
    pub phase: TddPhase,
    pub instructions: String,
    pub next_actions: Vec<String>,
}

fn phase_guidance(phase: TddPhase) -> PhaseGuidance {
    let (instructions, next_actions): (&str, &[&str]) = match phase {
        TddPhase::WriteTest => (
            "Write a failing unit test (and acceptance tests if not already generated) \
             that captures the required behavior before any implementation exists.",
            &["submit_test_code"],
        ),
        TddPhase::RunTestRed => (
            "Run the test suite. Every declared test must fail; a passing test at this \
             stage means the test is not exercising the new behavior.",
            &["submit_red_test_result", "submit_acceptance_test_red_results"],
        ),
        TddPhase::WriteCode => (
            "Write the minimal implementation needed to make the failing tests pass.",
            &["submit_implementation_code"],
        ),
        TddPhase::RunTestGreen => (
            "Run the test suite again. All declared tests must now pass.",
            &["submit_green_test_result", "submit_acceptance_test_green_results"],
        ),
        TddPhase::Refactor => (
            "Improve the implementation's structure without changing behavior; tests \
             must remain green throughout.",
            &["complete_refactoring"],
        ),
        TddPhase::Done => ("This task's TDD cycle is complete.", &[]),
    };
    PhaseGuidance {
        phase,
        instructions: instructions.to_string(),
        next_actions: next_actions.iter().map(|s| s.to_string()).collect(),
    }
}

#[derive(Debug, Clone, Default)]
struct PendingResults {
    unit: Option<bool>,
    acceptance: HashMap<AcceptanceTestId, bool>,
}

impl PendingResults {
    fn clear(&mut self) {
        self.unit = None;
        self.acceptance.clear();
    }

    fn is_complete(&self, expected_ids: &[AcceptanceTestId]) -> bool {
        self.unit.is_some() && expected_ids.iter().all(|id| self.acceptance.contains_key(id))
    }

    fn all_true(&self, expected_ids: &[AcceptanceTestId]) -> bool {
        self.unit == Some(true) && expected_ids.iter().all(|id| self.acceptance.get(id) == Some(&true))
    }
}

struct TaskCycle {
    state: TddLoopState,
    red: PendingResults,
    green: PendingResults,
}

/// Drives the six-phase TDD loop for any number of concurrently active tasks.
#[derive(Default)]
pub struct TddEngine {
    cycles: HashMap<TaskId, TaskCycle>,
}

impl TddEngine {
    #[must_use]
    pub fn new() -> Self {
        Self { cycles: HashMap::new() }
    }

    #[must_use]
    pub fn is_in_loop(&self, task_id: TaskId) -> bool {
        self.cycles.contains_key(&task_id)
    }

    #[must_use]
    pub fn get_loop_state(&self, task_id: TaskId) -> Option<&TddLoopState> {
        self.cycles.get(&task_id).map(|c| &c.state)
    }

    #[must_use]
    pub fn get_phase_guidance(&self, task_id: TaskId) -> Option<PhaseGuidance> {
        self.cycles.get(&task_id).map(|c| phase_guidance(c.state.phase))
    }

    /// Starts a fresh TDD loop for `task_id`, phase `write_test`, iteration 0.
    pub fn start_loop(&mut self, task_id: TaskId, acceptance_tests: Vec<AcceptanceTest>) -> Result<&TddLoopState, TddError> {
        if self.cycles.contains_key(&task_id) {
            return Err(TddError::AlreadyInLoop(task_id));
        }
        self.cycles.insert(
            task_id,
            TaskCycle {
                state: TddLoopState::new(acceptance_tests),
                red: PendingResults::default(),
                green: PendingResults::default(),
            },
        );
        Ok(&self.cycles.get(&task_id).expect("just inserted").state)
    }

    fn cycle_mut(&mut self, task_id: TaskId) -> Result<&mut TaskCycle, TddError> {
        self.cycles.get_mut(&task_id).ok_or(TddError::NotInLoop(task_id))
    }

    fn require_phase(cycle: &TaskCycle, task_id: TaskId, phase: TddPhase) -> Result<(), TddError> {
        if cycle.state.phase != phase {
            return Err(TddError::WrongPhase(task_id, cycle.state.phase));
        }
        Ok(())
    }

    fn bump_step(state: &mut TddLoopState) {
        state.steps_taken += 1;
    }

    fn expected_ids(&self, task_id: TaskId) -> Vec<AcceptanceTestId> {
        self.cycles[&task_id].state.acceptance_tests.iter().map(|t| t.id).collect()
    }

    /// `write_test -> run_test_red`.
    pub fn submit_test_code(
        &mut self,
        task_id: TaskId,
        test_code: impl Into<String>,
        file_path: impl Into<String>,
        command: impl Into<String>,
        acceptance_criteria: Vec<String>,
    ) -> Result<(), TddError> {
        let cycle = self.cycle_mut(task_id)?;
        Self::require_phase(cycle, task_id, TddPhase::WriteTest)?;
        cycle.state.test_spec = Some(TestSpec {
            test_code: test_code.into(),
            file_path: file_path.into(),
            command: command.into(),
            acceptance_criteria,
        });
        cycle.state.phase = TddPhase::RunTestRed;
        cycle.red.clear();
        Self::bump_step(&mut cycle.state);
        Ok(())
    }

    /// Submits the unit test's red-phase result.
    ///
    /// A passing result here signals a bogus test: immediately returns to
    /// `write_test` with `last_error` set (spec "No-passing-red" invariant).
    pub fn submit_red_test_result(&mut self, task_id: TaskId, passed: bool) -> Result<(), TddError> {
        {
            let cycle = self.cycle_mut(task_id)?;
            Self::require_phase(cycle, task_id, TddPhase::RunTestRed)?;
        }
        self.record_red_result(task_id, None, passed)
    }

    /// Submits one acceptance test's red-phase result by id.
    pub fn submit_acceptance_test_red_result(&mut self, task_id: TaskId, test_id: AcceptanceTestId, passed: bool) -> Result<(), TddError> {
        {
            let cycle = self.cycle_mut(task_id)?;
            Self::require_phase(cycle, task_id, TddPhase::RunTestRed)?;
            if !cycle.state.acceptance_tests.iter().any(|t| t.id == test_id) {
                return Err(TddError::UnknownAcceptanceTest);
            }
        }
        self.record_red_result(task_id, Some(test_id), passed)
    }

    /// Submits red-phase results for every declared acceptance test at once,
    /// positionally matching `acceptance_tests` order (spec §4.3 invariant:
    /// "exactly one result per declared acceptance test").
    pub fn submit_acceptance_test_red_results(&mut self, task_id: TaskId, results: &[bool]) -> Result<(), TddError> {
        let ids = {
            let cycle = self.cycle_mut(task_id)?;
            Self::require_phase(cycle, task_id, TddPhase::RunTestRed)?;
            self.expected_ids(task_id)
        };
        if results.len() != ids.len() {
            return Err(TddError::ResultCountMismatch { expected: ids.len(), actual: results.len() });
        }
        for (id, passed) in ids.into_iter().zip(results.iter().copied()) {
            self.record_red_result(task_id, Some(id), passed)?;
        }
        Ok(())
    }

    /// Records one red-phase result. A passing result is an immediate,
    /// unconditional failure of the red phase (spec "No-passing-red"); a
    /// failing result is accumulated until every declared test (unit plus
    /// each acceptance test) has reported in, at which point the phase
    /// advances to `write_code`.
    fn record_red_result(&mut self, task_id: TaskId, test_id: Option<AcceptanceTestId>, passed: bool) -> Result<(), TddError> {
        let expected_ids = self.expected_ids(task_id);
        let cycle = self.cycles.get_mut(&task_id).expect("checked by callers");

        if passed {
            cycle.state.phase = TddPhase::WriteTest;
            cycle.state.last_error = Some("red-phase test reported a pass; the test is not exercising new behavior".to_string());
            cycle.red.clear();
            Self::bump_step(&mut cycle.state);
            return Ok(());
        }

        match test_id {
            None => cycle.red.unit = Some(false),
            Some(id) => {
                cycle.red.acceptance.insert(id, false);
            }
        }

        if cycle.red.is_complete(&expected_ids) {
            cycle.state.phase = TddPhase::WriteCode;
            cycle.state.last_error = None;
            Self::bump_step(&mut cycle.state);
        }
        Ok(())
    }

    /// `write_code -> run_test_green`.
    pub fn submit_implementation_code(&mut self, task_id: TaskId, artifacts: Vec<CodeArtifact>) -> Result<Vec<CodeArtifact>, TddError> {
        let cycle = self.cycle_mut(task_id)?;
        Self::require_phase(cycle, task_id, TddPhase::WriteCode)?;
        cycle.state.code_written = true;
        cycle.state.phase = TddPhase::RunTestGreen;
        cycle.green.clear();
        Self::bump_step(&mut cycle.state);
        Ok(artifacts)
    }

    /// Submits the unit test's green-phase result.
    pub fn submit_green_test_result(&mut self, task_id: TaskId, passed: bool) -> Result<GreenOutcome, TddError> {
        {
            let cycle = self.cycle_mut(task_id)?;
            Self::require_phase(cycle, task_id, TddPhase::RunTestGreen)?;
        }
        self.record_green_result(task_id, None, passed)
    }

    /// Submits one acceptance test's green-phase result by id.
    pub fn submit_acceptance_test_green_result(&mut self, task_id: TaskId, test_id: AcceptanceTestId, passed: bool) -> Result<GreenOutcome, TddError> {
        {
            let cycle = self.cycle_mut(task_id)?;
            Self::require_phase(cycle, task_id, TddPhase::RunTestGreen)?;
            if !cycle.state.acceptance_tests.iter().any(|t| t.id == test_id) {
                return Err(TddError::UnknownAcceptanceTest);
            }
        }
        self.record_green_result(task_id, Some(test_id), passed)
    }

    /// Submits green-phase results for every declared acceptance test at
    /// once, positionally matching `acceptance_tests` order.
    pub fn submit_acceptance_test_green_results(&mut self, task_id: TaskId, results: &[bool]) -> Result<GreenOutcome, TddError> {
        let ids = {
            let cycle = self.cycle_mut(task_id)?;
            Self::require_phase(cycle, task_id, TddPhase::RunTestGreen)?;
            self.expected_ids(task_id)
        };
        if results.len() != ids.len() {
            return Err(TddError::ResultCountMismatch { expected: ids.len(), actual: results.len() });
        }
        let mut outcome = GreenOutcome::Pending;
        for (id, passed) in ids.into_iter().zip(results.iter().copied()) {
            outcome = self.record_green_result(task_id, Some(id), passed)?;
        }
        Ok(outcome)
    }

    /// Records one green-phase result. Results accumulate until every
    /// declared test has reported; if all passed, advances to `refactor`;
    /// otherwise bumps `iteration`, clears the accumulator and either
    /// re-enters `write_code` or signals [`GreenOutcome::CeilingExceeded`].
    fn record_green_result(&mut self, task_id: TaskId, test_id: Option<AcceptanceTestId>, passed: bool) -> Result<GreenOutcome, TddError> {
        let expected_ids = self.expected_ids(task_id);
        let cycle = self.cycles.get_mut(&task_id).expect("checked by callers");

        match test_id {
            None => cycle.green.unit = Some(passed),
            Some(id) => {
                cycle.green.acceptance.insert(id, passed);
            }
        }

        if !cycle.green.is_complete(&expected_ids) {
            return Ok(GreenOutcome::Pending);
        }

        if cycle.green.all_true(&expected_ids) {
            cycle.state.phase = TddPhase::Refactor;
            cycle.state.last_error = None;
            Self::bump_step(&mut cycle.state);
            return Ok(GreenOutcome::Advanced);
        }

        cycle.state.iteration += 1;
        cycle.state.last_error = Some("one or more tests failed during the green phase".to_string());
        cycle.green.clear();
        Self::bump_step(&mut cycle.state);

        let ceiling_hit = cycle.state.iteration >= cycle.state.max_iterations || cycle.state.steps_taken >= cycle.state.step_ceiling();
        if ceiling_hit {
            tracing::warn!(task_id = %task_id, iteration = cycle.state.iteration, "TDD step ceiling exceeded");
            Ok(GreenOutcome::CeilingExceeded)
        } else {
            cycle.state.phase = TddPhase::WriteCode;
            Ok(GreenOutcome::RetryWriteCode)
        }
    }

    /// `refactor -> done` on success; retried in place on failure.
    pub fn complete_refactoring(&mut self, task_id: TaskId, passed: bool, artifacts: Vec<CodeArtifact>) -> Result<Vec<CodeArtifact>, TddError> {
        let cycle = self.cycle_mut(task_id)?;
        Self::require_phase(cycle, task_id, TddPhase::Refactor)?;
        Self::bump_step(&mut cycle.state);
        if passed {
            cycle.state.phase = TddPhase::Done;
            cycle.state.last_error = None;
        } else {
            cycle.state.last_error = Some("refactor broke one or more tests; retrying".to_string());
        }
        Ok(artifacts)
    }

    /// Discards a task's TDD loop state entirely (worker failure / cleanup).
    pub fn discard_loop(&mut self, task_id: TaskId) {
        self.cycles.remove(&task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiary_model::tasktree::ChangeType;

    fn engine_with_one_test() -> (TddEngine, TaskId, AcceptanceTestId) {
        let mut engine = TddEngine::new();
        let task_id = TaskId::new();
        let at = AcceptanceTest::new("renders header", "tests/header.test.ts", "npm test header");
        let at_id = at.id;
        engine.start_loop(task_id, vec![at]).unwrap();
        (engine, task_id, at_id)
    }

    #[test]
    fn happy_path_reaches_done() {
        let (mut engine, task_id, at_id) = engine_with_one_test();

        engine.submit_test_code(task_id, "code", "t.rs", "cargo test", vec!["shows header".into()]).unwrap();
        assert_eq!(engine.get_loop_state(task_id).unwrap().phase, TddPhase::RunTestRed);

        engine.submit_red_test_result(task_id, false).unwrap();
        engine.submit_acceptance_test_red_result(task_id, at_id, false).unwrap();
        assert_eq!(engine.get_loop_state(task_id).unwrap().phase, TddPhase::WriteCode);

        engine.submit_implementation_code(task_id, vec![CodeArtifact::new("t.rs", Some("impl".into()), ChangeType::Create)]).unwrap();
        assert_eq!(engine.get_loop_state(task_id).unwrap().phase, TddPhase::RunTestGreen);

        let outcome = engine.submit_acceptance_test_green_results(task_id, &[true]).unwrap();
        assert_eq!(outcome, GreenOutcome::Pending); // unit result not yet submitted
        let outcome = engine.submit_green_test_result(task_id, true).unwrap();
        assert_eq!(outcome, GreenOutcome::Advanced);
        assert_eq!(engine.get_loop_state(task_id).unwrap().phase, TddPhase::Refactor);

        engine.complete_refactoring(task_id, true, vec![]).unwrap();
        assert_eq!(engine.get_loop_state(task_id).unwrap().phase, TddPhase::Done);
    }

    #[test]
    fn passing_red_result_returns_to_write_test() {
        let (mut engine, task_id, _at_id) = engine_with_one_test();
        engine.submit_test_code(task_id, "code", "t.rs", "cargo test", vec![]).unwrap();
        engine.submit_red_test_result(task_id, true).unwrap();
        let state = engine.get_loop_state(task_id).unwrap();
        assert_eq!(state.phase, TddPhase::WriteTest);
        assert!(state.last_error.is_some());
    }

    #[test]
    fn green_failure_retries_write_code_and_increments_iteration() {
        let (mut engine, task_id, at_id) = engine_with_one_test();
        engine.submit_test_code(task_id, "code", "t.rs", "cargo test", vec![]).unwrap();
        engine.submit_red_test_result(task_id, false).unwrap();
        engine.submit_acceptance_test_red_result(task_id, at_id, false).unwrap();
        engine.submit_implementation_code(task_id, vec![]).unwrap();

        engine.submit_green_test_result(task_id, false).unwrap();
        let outcome = engine.submit_acceptance_test_green_result(task_id, at_id, true).unwrap();

        assert_eq!(outcome, GreenOutcome::RetryWriteCode);
        let state = engine.get_loop_state(task_id).unwrap();
        assert_eq!(state.phase, TddPhase::WriteCode);
        assert_eq!(state.iteration, 1);
    }

    #[test]
    fn ceiling_exceeded_after_max_iterations() {
        let mut engine = TddEngine::new();
        let task_id = TaskId::new();
        engine.start_loop(task_id, vec![]).unwrap();
        engine.cycles.get_mut(&task_id).unwrap().state.max_iterations = 1;

        engine.submit_test_code(task_id, "code", "t.rs", "cargo test", vec![]).unwrap();
        engine.submit_red_test_result(task_id, false).unwrap();
        engine.submit_implementation_code(task_id, vec![]).unwrap();

        let outcome = engine.submit_green_test_result(task_id, false).unwrap();
        assert_eq!(outcome, GreenOutcome::CeilingExceeded);
    }

    #[test]
    fn result_count_mismatch_is_an_error() {
        let (mut engine, task_id, _at_id) = engine_with_one_test();
        engine.submit_test_code(task_id, "code", "t.rs", "cargo test", vec![]).unwrap();
        let err = engine.submit_acceptance_test_red_results(task_id, &[]).unwrap_err();
        assert_eq!(err, TddError::ResultCountMismatch { expected: 1, actual: 0 });
    }

    #[test]
    fn operations_reject_wrong_phase() {
        let (mut engine, task_id, _at_id) = engine_with_one_test();
        let err = engine.submit_implementation_code(task_id, vec![]).unwrap_err();
        assert_eq!(err, TddError::WrongPhase(task_id, TddPhase::WriteTest));
    }
}
