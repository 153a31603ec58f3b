//! Placeholder [`PhaseExecutor`]: writing the actual test/implementation
//! code is delegated to an LLM-backed worker, which is out of scope here.
//! This executor produces minimal, always-passing artifacts so `queen run`
//! can exercise the full coordinator loop end to end without one wired in.

use apiary_model::agents::TddPhase;
use apiary_model::tasktree::{ChangeType, CodeArtifact};
use apiary_queen::{OrchestratorError, PhaseContext, PhaseExecutor, PhaseOutcome};
use async_trait::async_trait;

pub(crate) struct StubPhaseExecutor;

#[async_trait]
impl PhaseExecutor for StubPhaseExecutor {
    async fn execute_phase(&self, ctx: PhaseContext) -> Result<PhaseOutcome, OrchestratorError> {
        let n = ctx.node.acceptance_tests.len();
        let outcome = match ctx.phase {
            TddPhase::WriteTest => PhaseOutcome::TestCode {
                test_code: format!("// placeholder test for task {}\nassert!(false);\n", ctx.node.name),
                file_path: format!("tests/{}.rs", ctx.task_id),
                command: "cargo test".to_string(),
                acceptance_criteria: ctx.node.acceptance_tests.iter().map(|t| t.name.clone()).collect(),
            },
            TddPhase::RunTestRed => PhaseOutcome::RedResult {
                unit_passed: Some(false),
                acceptance_results: vec![false; n],
            },
            TddPhase::WriteCode => PhaseOutcome::ImplementationCode {
                artifacts: vec![CodeArtifact::new(
                    format!("src/generated/{}.rs", ctx.task_id),
                    Some(format!("// placeholder implementation for task {}\n", ctx.node.name)),
                    ChangeType::Create,
                )],
            },
            TddPhase::RunTestGreen => PhaseOutcome::GreenResult {
                unit_passed: Some(true),
                acceptance_results: vec![true; n],
            },
            TddPhase::Refactor => PhaseOutcome::RefactorResult { passed: true, artifacts: vec![] },
            TddPhase::Done => return Err(OrchestratorError::PhaseExecutor("execute_phase called after Done".to_string())),
        };
        Ok(outcome)
    }
}
