//! `AgentRuntime` and `PlannerRuntime`: the polymorphic seams the scheduler
//! calls out through. Grounded in the teacher's `Harness` trait
//! (`gator-core::harness::trait_def`), collapsed from its streaming
//! spawn/events/kill shape into the single `run_step` call this
//! specification's contract describes, since here the runtime itself
//! (not the scheduler) is responsible for prompting the process/SDK and
//! honouring the timeout before returning a finished result.

pub mod registry;

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::model::{AgentResult, ExecutionPlan, PlanStep, RuntimeOutcome, StepContext, Ticket};

/// One operation: run a step to completion inside a prepared workspace and
/// report the judged result plus usage telemetry.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    fn name(&self) -> &str;

    async fn run_step(&self, ctx: &StepContext) -> Result<(AgentResult, RuntimeOutcome), RuntimeError>;
}

/// Definition of an agent available to the planner, used to build prompts
/// and to validate plan steps reference known agents.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub agent_id: String,
    pub role: crate::model::Role,
    pub default_model: String,
}

#[async_trait]
pub trait PlannerRuntime: Send + Sync {
    async fn generate_plan(
        &self,
        ticket: &Ticket,
        agent_definitions: &[AgentDefinition],
        rules: &[crate::validator::Rule],
        workspace_path: &std::path::Path,
    ) -> Result<ExecutionPlan, crate::error::PlanningError>;

    /// Must return 1-2 minimal steps whose `step_number >= 900 +
    /// failed_step.step_number` by convention, avoiding collision with the
    /// initial plan's `1..N` numbering.
    async fn plan_rework(
        &self,
        ticket: &Ticket,
        failed_step: &PlanStep,
        failure_result: &AgentResult,
        workspace_path: &std::path::Path,
        run_steps: &[PlanStep],
        rework_attempt: i32,
        previous_rework_results: &[AgentResult],
    ) -> Result<Vec<PlanStep>, crate::error::PlanningError>;
}

/// Lower bound rework step numbers must respect, per §3 invariant 6.
pub const REWORK_STEP_NUMBER_FLOOR: i64 = 900;

pub fn rework_step_number_floor(failed_step_number: i64) -> i64 {
    REWORK_STEP_NUMBER_FLOOR + failed_step_number
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rework_floor_avoids_collision_with_initial_steps() {
        assert_eq!(rework_step_number_floor(2), 902);
        assert!(rework_step_number_floor(1) >= 900);
    }
}
