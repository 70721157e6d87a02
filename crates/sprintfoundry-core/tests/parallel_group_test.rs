//! Parallel-group rework merging and the scheduler's own runtime deadlock
//! check (distinct from the plan validator's structural cycle detection,
//! which a hand-crafted unsatisfiable plan here deliberately bypasses).

mod support;

use sprintfoundry_core::model::{EventType, ParallelGroup, Priority, RunStatus};
use sprintfoundry_core::scheduler::RunOutcome;
use sprintfoundry_test_utils::{complete_result, default_outcome, execution_plan, needs_rework_result, plan_step, ticket, ScriptedAgentRuntime};

use support::ScenarioBuilder;

#[tokio::test]
async fn parallel_group_merges_simultaneous_rework_into_one_plan_rework_call() {
    let t = ticket("T-7", Priority::P2, &[]);
    let mut plan = execution_plan(vec![plan_step(1, "developer", &[]), plan_step(2, "developer", &[])]);
    plan.parallel_groups.push(ParallelGroup { step_numbers: vec![1, 2] });

    // Both group members need rework on their first attempt, then succeed
    // on their second; the rework step lands at 901 or 902 depending on
    // which member happens to be reconciled first (the group spawns both
    // concurrently), so both are queued.
    let runtime = ScriptedAgentRuntime::new("runtime-1")
        .with_result("developer", 1, needs_rework_result("needs more tests"), default_outcome())
        .with_result("developer", 1, complete_result("fixed"), default_outcome())
        .with_result("developer", 2, needs_rework_result("needs docs"), default_outcome())
        .with_result("developer", 2, complete_result("fixed"), default_outcome())
        .with_result("developer", 901, complete_result("rework applied"), default_outcome())
        .with_result("developer", 902, complete_result("rework applied"), default_outcome());

    let (output, scenario) = ScenarioBuilder::new(t, plan, runtime).run().await;

    assert_eq!(output.run.status, RunStatus::Completed);
    assert!(output.run.error.is_none());

    let kinds: Vec<EventType> = output.events.iter().map(|e| e.event_type).collect();
    assert!(kinds.contains(&EventType::StepReworkTriggered));
    // Exactly one `planRework` call for the whole group, not one per member.
    assert_eq!(scenario.planner.rework_calls().len(), 1);

    let step_ones = output.run.steps.iter().filter(|s| s.step_number == 1).count();
    let step_twos = output.run.steps.iter().filter(|s| s.step_number == 2).count();
    assert_eq!(step_ones, 2);
    assert_eq!(step_twos, 2);
    assert!(output.run.steps.iter().any(|s| s.step_number == 901 || s.step_number == 902));
}

#[tokio::test]
async fn an_unsatisfiable_dependency_graph_is_caught_by_the_scheduler_as_a_deadlock() {
    let t = ticket("T-8", Priority::P2, &[]);

    // Step 1 depends on step 2 and step 2 depends on step 1: a cycle the
    // plan validator's own structural check would normally reject before
    // the scheduler ever sees it, so this drives the scheduler directly.
    let plan = execution_plan(vec![plan_step(1, "developer", &[2]), plan_step(2, "developer", &[1])]);

    let runtime = ScriptedAgentRuntime::new("runtime-1");

    let (outcome, run, events, _scenario) = ScenarioBuilder::new(t, plan, runtime).execute_plan_directly().await;

    assert!(matches!(outcome, RunOutcome::Failed(_)));
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap_or_default().to_lowercase().contains("deadlock"));

    let kinds: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert!(!kinds.contains(&EventType::TaskCompleted));
}
