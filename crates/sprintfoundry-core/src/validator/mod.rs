//! Structural and semantic validation of a plan, and rule-driven injection
//! of missing steps/gates.
//!
//! Structural checks and the acyclicity check are grounded directly in the
//! teacher's `plan::parser::{validate, check_for_cycles}`, adapted from
//! name-keyed tasks to step-number-keyed steps. The rule/action system is
//! new: the teacher has no equivalent, so it is modeled after the same
//! "library of data, not code" shape the teacher uses for invariant
//! presets.

pub mod catalog;
pub mod rules;

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::ValidationError;
use crate::model::{ExecutionPlan, HumanGate, PlanStep, Role, Ticket};

pub use catalog::AgentCatalog;
pub use rules::{Action, Condition, Rule};

pub struct PlanValidator {
    catalog: AgentCatalog,
    rules: Vec<Rule>,
}

impl PlanValidator {
    pub fn new(catalog: AgentCatalog, rules: Vec<Rule>) -> Self {
        Self { catalog, rules }
    }

    pub fn with_defaults() -> Self {
        Self::new(AgentCatalog::default_catalog(), rules::default_rules())
    }

    /// Returns a rule-augmented plan, or the full set of structural
    /// failures discovered. Per the belt-and-braces decision, an explicit
    /// cycle check runs here even though the scheduler's own deadlock
    /// detector is retained as a second, independent guard.
    pub fn validate(&self, plan: ExecutionPlan, ticket: &Ticket) -> Result<ExecutionPlan, Vec<ValidationError>> {
        let errors = structural_errors(&plan);
        if !errors.is_empty() {
            return Err(errors);
        }

        let mut plan = plan;
        let mut next_injected_number = plan.steps.iter().map(|s| s.step_number).max().unwrap_or(0) + 1;
        for rule in &self.rules {
            if rule.condition.matches(&plan, ticket) {
                if let Err(err) = self.apply_action(&mut plan, &rule.action, &mut next_injected_number) {
                    if rule.enforced {
                        return Err(vec![err]);
                    }
                }
            }
        }
        Ok(plan)
    }

    fn apply_action(
        &self,
        plan: &mut ExecutionPlan,
        action: &Action,
        next_injected_number: &mut i64,
    ) -> Result<(), ValidationError> {
        match action {
            Action::RequireRole { role } => {
                let role: Role = role.parse().map_err(|_| ValidationError::NoAgentForRole { role: role.clone() })?;
                if self.role_present(plan, role) {
                    return Ok(());
                }
                let agent = self
                    .catalog
                    .default_agent_for_role(role)
                    .ok_or_else(|| ValidationError::NoAgentForRole { role: role.to_string() })?
                    .to_string();
                self.inject_step(plan, role, &agent, next_injected_number);
                Ok(())
            }
            Action::RequireAgent { agent } => {
                if plan.steps.iter().any(|s| &s.agent == agent) {
                    return Ok(());
                }
                let role = self
                    .catalog
                    .role_of(agent)
                    .ok_or_else(|| ValidationError::NoAgentForRole { role: agent.clone() })?;
                self.inject_step(plan, role, agent, next_injected_number);
                Ok(())
            }
            Action::RequireHumanGate { after_agent } => {
                let after_step = plan
                    .steps
                    .iter()
                    .filter(|s| &s.agent == after_agent)
                    .map(|s| s.step_number)
                    .max();
                if let Some(after_step) = after_step {
                    let already = plan.human_gates.iter().any(|g| g.after_step == after_step);
                    if !already {
                        plan.human_gates.push(HumanGate {
                            after_step,
                            reason: format!("required after {after_agent}"),
                            required: true,
                        });
                    }
                }
                Ok(())
            }
            // Budget overrides are applied by the scheduler, not the validator.
            Action::SetBudget { .. } => Ok(()),
        }
    }

    fn role_present(&self, plan: &ExecutionPlan, role: Role) -> bool {
        plan.steps
            .iter()
            .any(|s| self.catalog.role_of(&s.agent) == Some(role))
    }

    /// Injects a step so role order is preserved, with `depends_on`
    /// pointing at the last existing step of the preceding role.
    fn inject_step(&self, plan: &mut ExecutionPlan, role: Role, agent: &str, next_injected_number: &mut i64) {
        let depends_on = plan
            .steps
            .iter()
            .filter(|s| {
                self.catalog
                    .role_of(&s.agent)
                    .map(|r| r.ordinal() < role.ordinal())
                    .unwrap_or(false)
            })
            .max_by_key(|s| s.step_number)
            .map(|s| vec![s.step_number])
            .unwrap_or_default();

        let step_number = *next_injected_number;
        *next_injected_number += 1;

        plan.steps.push(PlanStep {
            step_number,
            agent: agent.to_string(),
            model: "default".to_string(),
            task: format!("[AUTO-INJECTED BY RULE] Perform {role} review for this change."),
            context_inputs: vec![crate::model::ContextInput::Ticket],
            depends_on,
            estimated_complexity: crate::model::Complexity::Low,
        });
    }
}

fn structural_errors(plan: &ExecutionPlan) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for step in &plan.steps {
        if !seen.insert(step.step_number) {
            errors.push(ValidationError::DuplicateStepNumber(step.step_number));
        }
    }
    if !errors.is_empty() {
        return errors;
    }

    let known: HashSet<i64> = plan.steps.iter().map(|s| s.step_number).collect();
    for step in &plan.steps {
        for dep in &step.depends_on {
            if !known.contains(dep) {
                errors.push(ValidationError::UnknownDependency {
                    step: step.step_number,
                    dependency: *dep,
                });
            }
        }
    }
    if !errors.is_empty() {
        return errors;
    }

    if let Some(cycle) = detect_cycle(plan) {
        errors.push(ValidationError::CycleDetected(cycle));
    }
    errors
}

/// Kahn's algorithm over step numbers, mirroring the teacher's
/// `check_for_cycles` task-name version.
fn detect_cycle(plan: &ExecutionPlan) -> Option<Vec<i64>> {
    let step_numbers: Vec<i64> = plan.steps.iter().map(|s| s.step_number).collect();
    let idx: HashMap<i64, usize> = step_numbers.iter().enumerate().map(|(i, n)| (*n, i)).collect();

    let n = step_numbers.len();
    let mut in_degree = vec![0usize; n];
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];

    for step in &plan.steps {
        let step_idx = idx[&step.step_number];
        for dep in &step.depends_on {
            let dep_idx = idx[dep];
            adj[dep_idx].push(step_idx);
            in_degree[step_idx] += 1;
        }
    }

    let mut queue: VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut sorted_count = 0;
    while let Some(node) = queue.pop_front() {
        sorted_count += 1;
        for &neighbor in &adj[node] {
            in_degree[neighbor] -= 1;
            if in_degree[neighbor] == 0 {
                queue.push_back(neighbor);
            }
        }
    }

    if sorted_count != n {
        let cycle: Vec<i64> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d > 0)
            .map(|(i, _)| step_numbers[i])
            .collect();
        Some(cycle)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Classification, Complexity, Priority, TicketSource};
    use uuid::Uuid;

    fn ticket(priority: Priority, labels: &[&str]) -> Ticket {
        Ticket {
            id: "T-1".to_string(),
            source: TicketSource::Prompt,
            title: "t".to_string(),
            description: "d".to_string(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            priority,
            acceptance_criteria: vec![],
            linked_tickets: vec![],
            comments: vec![],
            author: "a".to_string(),
            assignee: None,
            raw: serde_json::Value::Null,
        }
    }

    fn step(n: i64, agent: &str, deps: &[i64]) -> PlanStep {
        PlanStep {
            step_number: n,
            agent: agent.to_string(),
            model: "m".to_string(),
            task: "t".to_string(),
            context_inputs: vec![],
            depends_on: deps.to_vec(),
            estimated_complexity: Complexity::Low,
        }
    }

    fn plan(steps: Vec<PlanStep>) -> ExecutionPlan {
        ExecutionPlan {
            plan_id: Uuid::new_v4(),
            ticket_id: "T-1".to_string(),
            classification: Classification::NewFeature,
            reasoning: "r".to_string(),
            steps,
            parallel_groups: vec![],
            human_gates: vec![],
        }
    }

    #[test]
    fn rejects_duplicate_step_number() {
        let p = plan(vec![step(1, "developer", &[]), step(1, "qa", &[])]);
        let validator = PlanValidator::with_defaults();
        let err = validator.validate(p, &ticket(Priority::P2, &[])).unwrap_err();
        assert!(matches!(err[0], ValidationError::DuplicateStepNumber(1)));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let p = plan(vec![step(1, "developer", &[99])]);
        let validator = PlanValidator::with_defaults();
        let err = validator.validate(p, &ticket(Priority::P2, &[])).unwrap_err();
        assert!(matches!(err[0], ValidationError::UnknownDependency { step: 1, dependency: 99 }));
    }

    #[test]
    fn rejects_cycle() {
        let p = plan(vec![step(1, "developer", &[2]), step(2, "qa", &[1])]);
        let validator = PlanValidator::with_defaults();
        let err = validator.validate(p, &ticket(Priority::P2, &[])).unwrap_err();
        assert!(matches!(err[0], ValidationError::CycleDetected(_)));
    }

    #[test]
    fn injects_code_review_by_default_rule() {
        let p = plan(vec![step(1, "developer", &[])]);
        let validator = PlanValidator::with_defaults();
        let validated = validator.validate(p, &ticket(Priority::P2, &[])).unwrap();
        assert!(validated.steps.iter().any(|s| s.agent == "code-review"));
    }

    #[test]
    fn does_not_inject_duplicate_role() {
        let p = plan(vec![step(1, "developer", &[]), step(2, "code-review", &[1])]);
        let validator = PlanValidator::with_defaults();
        let validated = validator.validate(p, &ticket(Priority::P2, &[])).unwrap();
        assert_eq!(validated.steps.iter().filter(|s| s.agent == "code-review").count(), 1);
    }

    #[test]
    fn p0_priority_injects_human_gate_after_qa() {
        let p = plan(vec![step(1, "developer", &[]), step(2, "qa", &[1])]);
        let validator = PlanValidator::with_defaults();
        let validated = validator.validate(p, &ticket(Priority::P0, &[])).unwrap();
        assert!(validated.human_gates.iter().any(|g| g.after_step == 2 && g.required));
    }

    #[test]
    fn security_label_injects_security_role() {
        let p = plan(vec![step(1, "developer", &[])]);
        let validator = PlanValidator::with_defaults();
        let validated = validator.validate(p, &ticket(Priority::P2, &["security"])).unwrap();
        assert!(validated.steps.iter().any(|s| s.agent == "security"));
    }

    #[test]
    fn validation_is_idempotent() {
        let p = plan(vec![step(1, "developer", &[])]);
        let validator = PlanValidator::with_defaults();
        let once = validator.validate(p, &ticket(Priority::P2, &[])).unwrap();
        let twice = validator.validate(once.clone(), &ticket(Priority::P2, &[])).unwrap();
        assert_eq!(once.steps.len(), twice.steps.len());
    }
}
