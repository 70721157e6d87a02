//! Per-step model resolution: a project's explicit per-agent override wins,
//! falling back to a per-role platform default, falling back to a single
//! hardcoded default. Mirrors the same override-then-default shape as
//! [`crate::budget::resolve_budget`], just keyed by agent/role instead of
//! budget fields.

use std::collections::HashMap;

use crate::model::Role;

#[derive(Debug, Clone)]
pub struct ModelResolver {
    pub agent_overrides: HashMap<String, String>,
    pub role_defaults: HashMap<Role, String>,
    pub fallback_model: String,
}

impl ModelResolver {
    pub fn new(fallback_model: impl Into<String>) -> Self {
        Self {
            agent_overrides: HashMap::new(),
            role_defaults: HashMap::new(),
            fallback_model: fallback_model.into(),
        }
    }

    pub fn resolve(&self, agent: &str, role: Option<Role>) -> String {
        if let Some(model) = self.agent_overrides.get(agent) {
            return model.clone();
        }
        if let Some(role) = role {
            if let Some(model) = self.role_defaults.get(&role) {
                return model.clone();
            }
        }
        self.fallback_model.clone()
    }
}

impl Default for ModelResolver {
    fn default() -> Self {
        Self::new("claude-sonnet-4-5")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_override_wins_over_role_default() {
        let mut resolver = ModelResolver::new("fallback");
        resolver.role_defaults.insert(Role::Developer, "role-model".to_string());
        resolver.agent_overrides.insert("developer".to_string(), "agent-model".to_string());
        assert_eq!(resolver.resolve("developer", Some(Role::Developer)), "agent-model");
    }

    #[test]
    fn role_default_wins_over_fallback() {
        let mut resolver = ModelResolver::new("fallback");
        resolver.role_defaults.insert(Role::Qa, "qa-model".to_string());
        assert_eq!(resolver.resolve("qa", Some(Role::Qa)), "qa-model");
    }

    #[test]
    fn unknown_agent_and_role_uses_fallback() {
        let resolver = ModelResolver::new("fallback");
        assert_eq!(resolver.resolve("mystery", None), "fallback");
    }
}
