//! Budget resolution: merge platform defaults, project overrides, and any
//! matching `set_budget` rule action, left-to-right, rightmost wins per
//! field (§6 "Budget configuration").

use crate::model::{Budget, BudgetOverride};

/// Pure merge function used by the scheduler's pre-flight checks.
pub fn resolve_budget(
    platform_defaults: &Budget,
    project_override: Option<&BudgetOverride>,
    rule_overrides: &[BudgetOverride],
) -> Budget {
    let mut budget = platform_defaults.clone();
    if let Some(over) = project_override {
        budget = budget.merge(over);
    }
    for over in rule_overrides {
        budget = budget.merge(over);
    }
    budget
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_override_wins_over_platform_default() {
        let platform = Budget::default();
        let project = BudgetOverride {
            max_rework_cycles: Some(5),
            ..Default::default()
        };
        let resolved = resolve_budget(&platform, Some(&project), &[]);
        assert_eq!(resolved.max_rework_cycles, 5);
        assert_eq!(resolved.per_agent_tokens, platform.per_agent_tokens);
    }

    #[test]
    fn rule_override_wins_over_project_override() {
        let platform = Budget::default();
        let project = BudgetOverride {
            max_rework_cycles: Some(5),
            ..Default::default()
        };
        let rule = BudgetOverride {
            max_rework_cycles: Some(1),
            ..Default::default()
        };
        let resolved = resolve_budget(&platform, Some(&project), std::slice::from_ref(&rule));
        assert_eq!(resolved.max_rework_cycles, 1);
    }

    #[test]
    fn no_overrides_returns_platform_defaults() {
        let platform = Budget::default();
        let resolved = resolve_budget(&platform, None, &[]);
        assert_eq!(resolved.per_task_total_tokens, platform.per_task_total_tokens);
    }
}
