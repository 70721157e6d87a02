//! Registry of named `AgentRuntime` implementations, grounded directly in
//! the teacher's `harness::registry::HarnessRegistry`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::AgentRuntime;

#[derive(Default)]
pub struct RuntimeRegistry {
    runtimes: HashMap<String, Arc<dyn AgentRuntime>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, runtime: Arc<dyn AgentRuntime>) {
        self.runtimes.insert(runtime.name().to_string(), runtime);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentRuntime>> {
        self.runtimes.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.runtimes.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }
}

impl fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeRegistry")
            .field("runtimes", &self.runtimes.keys().collect::<Vec<_>>())
            .finish()
    }
}
