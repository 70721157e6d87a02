//! Rule-driven plan augmentation. Rules are data (`condition`, `action`,
//! `enforced`), mirroring the teacher's `InvariantPreset` library-as-data
//! design (`gator-core::presets`) rather than hardcoded branches.

use serde::{Deserialize, Serialize};

use crate::model::{ContextInput, Classification, ExecutionPlan, Priority};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Always,
    LabelContains { value: String },
    PriorityIs { values: Vec<Priority> },
    ClassificationIs { values: Vec<Classification> },
    FilePathMatches { pattern: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    RequireRole { role: String },
    RequireAgent { agent: String },
    RequireHumanGate { after_agent: String },
    SetBudget { budget: crate::model::BudgetOverride },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub condition: Condition,
    pub action: Action,
    pub enforced: bool,
}

impl Condition {
    pub fn matches(&self, plan: &ExecutionPlan, ticket: &crate::model::Ticket) -> bool {
        match self {
            Condition::Always => true,
            Condition::LabelContains { value } => {
                let needle = value.to_lowercase();
                ticket.labels.iter().any(|l| l.to_lowercase().contains(&needle))
            }
            Condition::PriorityIs { values } => values.contains(&ticket.priority),
            Condition::ClassificationIs { values } => values.contains(&plan.classification),
            Condition::FilePathMatches { pattern } => plan.steps.iter().any(|step| {
                step.context_inputs.iter().any(|input| match input {
                    ContextInput::File { path } => glob_match(pattern, path),
                    _ => false,
                })
            }),
        }
    }
}

/// Minimal glob matcher supporting `*` (any run of characters, no path
/// separator semantics needed here) and `**` (any run including `/`).
/// The corpus does not pull in a dedicated glob crate for this kind of
/// path-pattern check, so this stays a small hand-rolled matcher rather
/// than a new dependency.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    fn match_here(pat: &[u8], text: &[u8]) -> bool {
        if pat.is_empty() {
            return text.is_empty();
        }
        if pat[0] == b'*' {
            if pat.len() >= 2 && pat[1] == b'*' {
                let rest = &pat[2..];
                (0..=text.len()).any(|i| match_here(rest, &text[i..]))
            } else {
                let rest = &pat[1..];
                (0..=text.len()).any(|i| match_here(rest, &text[i..]))
            }
        } else if !text.is_empty() && (pat[0] == text[0] || pat[0] == b'?') {
            match_here(&pat[1..], &text[1..])
        } else {
            false
        }
    }
    match_here(pattern.as_bytes(), text.as_bytes())
}

/// Default built-in rule set used when a project supplies none of its own.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            condition: Condition::LabelContains {
                value: "security".to_string(),
            },
            action: Action::RequireRole {
                role: "security".to_string(),
            },
            enforced: true,
        },
        Rule {
            condition: Condition::ClassificationIs {
                values: vec![Classification::SecurityFix],
            },
            action: Action::RequireRole {
                role: "security".to_string(),
            },
            enforced: true,
        },
        Rule {
            condition: Condition::PriorityIs {
                values: vec![Priority::P0],
            },
            action: Action::RequireHumanGate {
                after_agent: "qa".to_string(),
            },
            enforced: true,
        },
        Rule {
            condition: Condition::FilePathMatches {
                pattern: "**/*.sql".to_string(),
            },
            action: Action::RequireRole {
                role: "devops".to_string(),
            },
            enforced: true,
        },
        Rule {
            condition: Condition::Always,
            action: Action::RequireRole {
                role: "code-review".to_string(),
            },
            enforced: true,
        },
    ]
}
