//! `sprintfoundry plan` subcommands: validate and inspect an `ExecutionPlan`
//! against a `Ticket`, both loaded from disk as JSON, without needing a
//! running scheduler.

use anyhow::{Context, Result};

use sprintfoundry_core::validator::{AgentCatalog, PlanValidator, Rule};
use sprintfoundry_core::{ExecutionPlan, Ticket};

use crate::PlanCommands;

pub fn run_plan_command(command: PlanCommands) -> Result<()> {
    match command {
        PlanCommands::Validate { ticket, plan, rules } => cmd_validate(&ticket, &plan, rules.as_deref()),
        PlanCommands::Show { plan } => cmd_show(&plan),
    }
}

fn read_ticket(path: &str) -> Result<Ticket> {
    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read ticket file: {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse ticket JSON: {path}"))
}

fn read_plan(path: &str) -> Result<ExecutionPlan> {
    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read plan file: {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse plan JSON: {path}"))
}

fn read_rules(path: Option<&str>) -> Result<Vec<Rule>> {
    match path {
        None => Ok(sprintfoundry_core::validator::rules::default_rules()),
        Some(path) => {
            let content = std::fs::read_to_string(path).with_context(|| format!("failed to read rules file: {path}"))?;
            serde_json::from_str(&content).with_context(|| format!("failed to parse rules JSON: {path}"))
        }
    }
}

/// Run the plan through `PlanValidator` and print the resulting (possibly
/// rule-augmented) plan, or the validation errors.
fn cmd_validate(ticket_path: &str, plan_path: &str, rules_path: Option<&str>) -> Result<()> {
    let ticket = read_ticket(ticket_path)?;
    let plan = read_plan(plan_path)?;
    let rules = read_rules(rules_path)?;

    let validator = PlanValidator::new(AgentCatalog::default_catalog(), rules);
    println!("Validating plan {} against ticket {}...", plan.plan_id, ticket.id);
    println!();

    match validator.validate(plan, &ticket) {
        Ok(validated) => {
            println!("OK: plan is valid.");
            println!("  Steps after validation: {}", validated.steps.len());
            println!("  Human gates: {}", validated.human_gates.len());
            for gate in &validated.human_gates {
                println!("    after step {}: {} (required={})", gate.after_step, gate.reason, gate.required);
            }
            Ok(())
        }
        Err(errors) => {
            println!("FAILED: {} validation error(s):", errors.len());
            for err in &errors {
                println!("  - {err}");
            }
            anyhow::bail!("plan failed validation")
        }
    }
}

/// Pretty-print a plan's steps, dependencies, and parallel groups.
fn cmd_show(plan_path: &str) -> Result<()> {
    let plan = read_plan(plan_path)?;

    println!("Plan: {}", plan.plan_id);
    println!("Ticket: {}", plan.ticket_id);
    println!("Classification: {}", plan.classification);
    println!("Reasoning: {}", plan.reasoning);
    println!();

    println!("Steps:");
    for step in &plan.steps {
        let deps = if step.depends_on.is_empty() {
            "none".to_string()
        } else {
            step.depends_on.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        };
        println!(
            "  [{:>3}] {:<14} ({:<6}) depends_on={deps}: {}",
            step.step_number, step.agent, step.estimated_complexity, step.task
        );
    }

    if !plan.parallel_groups.is_empty() {
        println!();
        println!("Parallel groups:");
        for group in &plan.parallel_groups {
            println!("  {:?}", group.step_numbers);
        }
    }

    if !plan.human_gates.is_empty() {
        println!();
        println!("Human gates:");
        for gate in &plan.human_gates {
            println!("  after step {}: {} (required={})", gate.after_step, gate.reason, gate.required);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprintfoundry_core::model::{Classification, Complexity, Priority, TicketSource};
    use uuid::Uuid;

    fn ticket_json() -> String {
        serde_json::json!({
            "id": "T-1",
            "source": "prompt",
            "title": "fix the thing",
            "description": "it is broken",
            "priority": "p2",
            "author": "alice",
        })
        .to_string()
    }

    fn plan_json(steps: usize) -> String {
        let steps: Vec<_> = (1..=steps)
            .map(|n| {
                serde_json::json!({
                    "step_number": n,
                    "agent": "developer",
                    "model": "m",
                    "task": "do work",
                    "depends_on": if n > 1 { vec![n - 1] } else { vec![] },
                    "estimated_complexity": "low",
                })
            })
            .collect();
        serde_json::json!({
            "plan_id": Uuid::new_v4(),
            "ticket_id": "T-1",
            "classification": "new_feature",
            "reasoning": "because",
            "steps": steps,
        })
        .to_string()
    }

    #[test]
    fn validate_injects_code_review_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let ticket_path = dir.path().join("ticket.json");
        let plan_path = dir.path().join("plan.json");
        std::fs::write(&ticket_path, ticket_json()).unwrap();
        std::fs::write(&plan_path, plan_json(1)).unwrap();

        let ticket = read_ticket(ticket_path.to_str().unwrap()).unwrap();
        assert_eq!(ticket.source, TicketSource::Prompt);
        assert_eq!(ticket.priority, Priority::P2);

        let plan = read_plan(plan_path.to_str().unwrap()).unwrap();
        assert_eq!(plan.classification, Classification::NewFeature);
        assert_eq!(plan.steps[0].estimated_complexity, Complexity::Low);

        cmd_validate(ticket_path.to_str().unwrap(), plan_path.to_str().unwrap(), None).unwrap();
    }

    #[test]
    fn validate_reports_cycle_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ticket_path = dir.path().join("ticket.json");
        let plan_path = dir.path().join("plan.json");
        std::fs::write(&ticket_path, ticket_json()).unwrap();
        std::fs::write(
            &plan_path,
            serde_json::json!({
                "plan_id": Uuid::new_v4(),
                "ticket_id": "T-1",
                "classification": "new_feature",
                "reasoning": "because",
                "steps": [
                    {"step_number": 1, "agent": "developer", "model": "m", "task": "a", "depends_on": [2], "estimated_complexity": "low"},
                    {"step_number": 2, "agent": "qa", "model": "m", "task": "b", "depends_on": [1], "estimated_complexity": "low"},
                ],
            })
            .to_string(),
        )
        .unwrap();

        let err = cmd_validate(ticket_path.to_str().unwrap(), plan_path.to_str().unwrap(), None).unwrap_err();
        assert!(err.to_string().contains("failed validation"));
    }

    #[test]
    fn show_reads_and_prints_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let plan_path = dir.path().join("plan.json");
        std::fs::write(&plan_path, plan_json(2)).unwrap();
        cmd_show(plan_path.to_str().unwrap()).unwrap();
    }
}
