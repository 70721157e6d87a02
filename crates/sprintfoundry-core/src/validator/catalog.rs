//! Project agent catalog: which concrete agent ids serve which role.
//!
//! Mirrors the teacher's `presets::load_presets` embedded-default-plus-
//! override pattern (there: a library of invariant presets baked in via
//! `include_str!`; here: a default role → agent mapping used whenever a
//! project does not supply its own catalog).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::Role;

/// Maps roles to the agent ids that can serve them, and agent ids back to
/// their role. The first agent listed for a role is its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCatalog {
    by_role: HashMap<Role, Vec<String>>,
    by_agent: HashMap<String, Role>,
}

impl AgentCatalog {
    pub fn from_role_map(by_role: HashMap<Role, Vec<String>>) -> Self {
        let mut by_agent = HashMap::new();
        for (role, agents) in &by_role {
            for agent in agents {
                by_agent.insert(agent.clone(), *role);
            }
        }
        Self { by_role, by_agent }
    }

    /// Built-in mapping used when a project supplies no catalog of its
    /// own. One default agent id per role, matching the ids named in
    /// the step-number section of the data model (`developer`, `qa`,
    /// `code-review`, `security`, `product`, `architect`, `ui-ux`,
    /// `devops`).
    pub fn default_catalog() -> Self {
        let mut by_role = HashMap::new();
        by_role.insert(Role::Product, vec!["product".to_string()]);
        by_role.insert(Role::Architect, vec!["architect".to_string()]);
        by_role.insert(Role::UiUx, vec!["ui-ux".to_string()]);
        by_role.insert(Role::Developer, vec!["developer".to_string()]);
        by_role.insert(Role::CodeReview, vec!["code-review".to_string()]);
        by_role.insert(Role::Qa, vec!["qa".to_string(), "go-qa".to_string()]);
        by_role.insert(Role::Security, vec!["security".to_string()]);
        by_role.insert(Role::Devops, vec!["devops".to_string()]);
        Self::from_role_map(by_role)
    }

    pub fn default_agent_for_role(&self, role: Role) -> Option<&str> {
        self.by_role.get(&role).and_then(|v| v.first()).map(|s| s.as_str())
    }

    pub fn agents_for_role(&self, role: Role) -> &[String] {
        self.by_role.get(&role).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn role_of(&self, agent: &str) -> Option<Role> {
        self.by_agent.get(agent).copied()
    }
}

impl Default for AgentCatalog {
    fn default() -> Self {
        Self::default_catalog()
    }
}
