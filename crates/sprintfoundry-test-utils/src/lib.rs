//! In-memory fakes for the core's external collaborators
//! (`TicketProvider`, `Git`, `Notifier`, `AgentRuntime`, `PlannerRuntime`),
//! shared by the integration test suites of `sprintfoundry-core` and
//! `sprintfoundry-cli`. Mirrors the teacher's `gator-test-utils` role as a
//! shared fixtures crate, minus the Postgres testcontainer it no longer
//! needs: this core has no database, so every fake here is a plain
//! in-memory struct behind a `Mutex`.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use sprintfoundry_core::error::{PlanningError, RuntimeError};
use sprintfoundry_core::external::{Git, NotificationEvent, Notifier, TicketProvider};
use sprintfoundry_core::model::{
    AgentResult, AgentResultStatus, Classification, Complexity, ContextInput, ExecutionPlan, PlanStep, RuntimeOutcome,
    TaskRun, Ticket, TicketSource,
};
use sprintfoundry_core::runtime::{AgentDefinition, AgentRuntime, PlannerRuntime};
use sprintfoundry_core::validator::Rule;

/// A ticket provider backed by a fixed, pre-registered set of tickets.
/// `update_status` calls are recorded rather than sent anywhere.
#[derive(Default)]
pub struct FakeTicketProvider {
    tickets: Mutex<HashMap<String, Ticket>>,
    updates: Mutex<Vec<(String, String, Option<String>)>>,
}

impl FakeTicketProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticket(self, ticket: Ticket) -> Self {
        self.tickets.lock().expect("poisoned").insert(ticket.id.clone(), ticket);
        self
    }

    pub fn updates(&self) -> Vec<(String, String, Option<String>)> {
        self.updates.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl TicketProvider for FakeTicketProvider {
    async fn fetch(&self, id: &str, source: TicketSource) -> anyhow::Result<Ticket> {
        if let Some(ticket) = self.tickets.lock().expect("poisoned").get(id) {
            return Ok(ticket.clone());
        }
        // Unregistered id: synthesise a minimal ticket, the way a `prompt`
        // source ticket is built from raw text in the real provider.
        Ok(Ticket {
            id: id.to_string(),
            source,
            title: format!("ticket {id}"),
            description: String::new(),
            labels: Vec::new(),
            priority: sprintfoundry_core::model::Priority::P2,
            acceptance_criteria: Vec::new(),
            linked_tickets: Vec::new(),
            comments: Vec::new(),
            author: "fake".to_string(),
            assignee: None,
            raw: serde_json::Value::Null,
        })
    }

    async fn update_status(&self, ticket: &Ticket, status: &str, pr_url: Option<&str>) -> anyhow::Result<()> {
        self.updates
            .lock()
            .expect("poisoned")
            .push((ticket.id.clone(), status.to_string(), pr_url.map(str::to_string)));
        Ok(())
    }
}

/// `Git` fake: `clone_and_branch` creates an empty directory (so the event
/// store and session store have somewhere real to write), and checkpoint
/// commits are scripted by step number so tests can exercise invariant 5/6
/// (`step.committed` iff the checkpoint reports an actual commit).
pub struct FakeGit {
    branch_name: String,
    pr_url: String,
    no_diff_steps: Mutex<std::collections::HashSet<i64>>,
    commits: Mutex<Vec<(String, i64, String)>>,
    fail_commit_for: Mutex<std::collections::HashSet<i64>>,
}

impl Default for FakeGit {
    fn default() -> Self {
        Self {
            branch_name: "sprintfoundry/auto".to_string(),
            pr_url: "https://example.invalid/pr/1".to_string(),
            no_diff_steps: Mutex::new(std::collections::HashSet::new()),
            commits: Mutex::new(Vec::new()),
            fail_commit_for: Mutex::new(std::collections::HashSet::new()),
        }
    }
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a step number as producing no diff: its checkpoint reports
    /// `false` and no `step.committed` event should follow.
    pub fn with_no_diff(self, step_number: i64) -> Self {
        self.no_diff_steps.lock().expect("poisoned").insert(step_number);
        self
    }

    /// Mark a step number whose checkpoint commit should fail outright
    /// (persistence-error path).
    pub fn with_failing_commit(self, step_number: i64) -> Self {
        self.fail_commit_for.lock().expect("poisoned").insert(step_number);
        self
    }

    pub fn commits(&self) -> Vec<(String, i64, String)> {
        self.commits.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl Git for FakeGit {
    async fn clone_and_branch(&self, workspace_path: &Path, _ticket: &Ticket) -> anyhow::Result<String> {
        tokio::fs::create_dir_all(workspace_path).await?;
        Ok(self.branch_name.clone())
    }

    async fn commit_step_checkpoint(
        &self,
        _workspace_path: &Path,
        run_id: &str,
        step_number: i64,
        agent_id: &str,
    ) -> anyhow::Result<bool> {
        if self.fail_commit_for.lock().expect("poisoned").contains(&step_number) {
            anyhow::bail!("simulated checkpoint failure for step {step_number}");
        }
        let committed = !self.no_diff_steps.lock().expect("poisoned").contains(&step_number);
        if committed {
            self.commits
                .lock()
                .expect("poisoned")
                .push((run_id.to_string(), step_number, agent_id.to_string()));
        }
        Ok(committed)
    }

    async fn commit_and_push(&self, _workspace_path: &Path, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn create_pull_request(&self, _workspace_path: &Path, _run: &TaskRun) -> anyhow::Result<String> {
        Ok(self.pr_url.clone())
    }
}

/// Best-effort notifier that never fails, recording every notification it
/// receives for assertions.
#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<NotificationEvent>>,
}

impl FakeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<NotificationEvent> {
        self.sent.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        self.sent.lock().expect("poisoned").push(event.clone());
        Ok(())
    }
}

/// A scripted `AgentRuntime`: each `(agent, step_number)` pair has its own
/// queue of `(AgentResult, RuntimeOutcome)` to hand back in order, one per
/// call. Once a queue is exhausted, the last entry repeats -- most tests
/// only need a handful of scripted attempts per step (e.g. `needs_rework`
/// once, then `complete`) and this avoids every rework test pre-computing
/// an exact call count.
pub struct ScriptedAgentRuntime {
    name: String,
    scripts: Mutex<HashMap<(String, i64), VecDeque<(AgentResult, RuntimeOutcome)>>>,
    calls: Mutex<Vec<(String, i64, i32)>>,
}

impl ScriptedAgentRuntime {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_result(self, agent: &str, step_number: i64, result: AgentResult, outcome: RuntimeOutcome) -> Self {
        self.scripts
            .lock()
            .expect("poisoned")
            .entry((agent.to_string(), step_number))
            .or_default()
            .push_back((result, outcome));
        self
    }

    pub fn calls(&self) -> Vec<(String, i64, i32)> {
        self.calls.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl AgentRuntime for ScriptedAgentRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_step(
        &self,
        ctx: &sprintfoundry_core::model::StepContext,
    ) -> Result<(AgentResult, RuntimeOutcome), RuntimeError> {
        self.calls
            .lock()
            .expect("poisoned")
            .push((ctx.step.agent.clone(), ctx.step.step_number, ctx.attempt));

        let mut scripts = self.scripts.lock().expect("poisoned");
        let key = (ctx.step.agent.clone(), ctx.step.step_number);
        let queue = scripts.entry(key).or_default();
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match next {
            Some((result, outcome)) => Ok((result, outcome)),
            None => Ok((complete_result("no script configured; defaulting to complete"), default_outcome())),
        }
    }
}

pub fn complete_result(summary: &str) -> AgentResult {
    AgentResult {
        status: AgentResultStatus::Complete,
        summary: summary.to_string(),
        artifacts_created: Vec::new(),
        artifacts_modified: Vec::new(),
        issues: Vec::new(),
        rework_reason: None,
        rework_target: None,
        metadata: Default::default(),
    }
}

pub fn needs_rework_result(reason: &str) -> AgentResult {
    AgentResult {
        status: AgentResultStatus::NeedsRework,
        summary: reason.to_string(),
        artifacts_created: Vec::new(),
        artifacts_modified: Vec::new(),
        issues: Vec::new(),
        rework_reason: Some(reason.to_string()),
        rework_target: None,
        metadata: Default::default(),
    }
}

pub fn failed_result(summary: &str) -> AgentResult {
    AgentResult {
        status: AgentResultStatus::Failed,
        summary: summary.to_string(),
        artifacts_created: Vec::new(),
        artifacts_modified: Vec::new(),
        issues: Vec::new(),
        rework_reason: None,
        rework_target: None,
        metadata: Default::default(),
    }
}

pub fn default_outcome() -> RuntimeOutcome {
    RuntimeOutcome {
        tokens_used: 1_000,
        runtime_id: format!("sess-{}", Uuid::new_v4()),
        cost_usd: Some(0.01),
        ..Default::default()
    }
}

pub fn outcome_with_tokens(tokens_used: i64) -> RuntimeOutcome {
    RuntimeOutcome {
        tokens_used,
        runtime_id: format!("sess-{}", Uuid::new_v4()),
        cost_usd: Some(0.0),
        ..Default::default()
    }
}

/// A planner fake: returns a fixed initial plan and, for rework, a minimal
/// one-step "fix it" plan whose step number respects the
/// `900 + failed_step` floor (§3 invariant 6). Every call is recorded.
pub struct FakePlannerRuntime {
    plan: ExecutionPlan,
    rework_agent: String,
    rework_calls: Mutex<Vec<i64>>,
}

impl FakePlannerRuntime {
    pub fn new(plan: ExecutionPlan) -> Self {
        Self {
            plan,
            rework_agent: "developer".to_string(),
            rework_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rework_agent(mut self, agent: impl Into<String>) -> Self {
        self.rework_agent = agent.into();
        self
    }

    pub fn rework_calls(&self) -> Vec<i64> {
        self.rework_calls.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl PlannerRuntime for FakePlannerRuntime {
    async fn generate_plan(
        &self,
        _ticket: &Ticket,
        _agent_definitions: &[AgentDefinition],
        _rules: &[Rule],
        _workspace_path: &Path,
    ) -> Result<ExecutionPlan, PlanningError> {
        Ok(self.plan.clone())
    }

    async fn plan_rework(
        &self,
        _ticket: &Ticket,
        failed_step: &PlanStep,
        failure_result: &AgentResult,
        _workspace_path: &Path,
        _run_steps: &[PlanStep],
        rework_attempt: i32,
        _previous_rework_results: &[AgentResult],
    ) -> Result<Vec<PlanStep>, PlanningError> {
        self.rework_calls.lock().expect("poisoned").push(failed_step.step_number);
        let step_number = sprintfoundry_core::runtime::rework_step_number_floor(failed_step.step_number) + rework_attempt as i64
            - 1;
        Ok(vec![PlanStep {
            step_number,
            agent: self.rework_agent.clone(),
            model: "claude-sonnet-4-5".to_string(),
            task: format!(
                "Address rework feedback for step {}: {}",
                failed_step.step_number,
                failure_result.rework_reason.clone().unwrap_or_default()
            ),
            context_inputs: vec![ContextInput::StepOutput {
                step_number: failed_step.step_number,
            }],
            depends_on: Vec::new(),
            estimated_complexity: Complexity::Low,
        }])
    }
}

/// Minimal `PlanStep` builder for test plans.
pub fn plan_step(step_number: i64, agent: &str, depends_on: &[i64]) -> PlanStep {
    PlanStep {
        step_number,
        agent: agent.to_string(),
        model: "claude-sonnet-4-5".to_string(),
        task: format!("do the {agent} work"),
        context_inputs: vec![ContextInput::Ticket],
        depends_on: depends_on.to_vec(),
        estimated_complexity: Complexity::Medium,
    }
}

pub fn execution_plan(steps: Vec<PlanStep>) -> ExecutionPlan {
    ExecutionPlan {
        plan_id: Uuid::new_v4(),
        ticket_id: "T-1".to_string(),
        classification: Classification::NewFeature,
        reasoning: "fake plan for tests".to_string(),
        steps,
        parallel_groups: Vec::new(),
        human_gates: Vec::new(),
    }
}

pub fn ticket(id: &str, priority: sprintfoundry_core::model::Priority, labels: &[&str]) -> Ticket {
    Ticket {
        id: id.to_string(),
        source: TicketSource::Prompt,
        title: format!("Ticket {id}"),
        description: "A test ticket.".to_string(),
        labels: labels.iter().map(|s| s.to_string()).collect(),
        priority,
        acceptance_criteria: Vec::new(),
        linked_tickets: Vec::new(),
        comments: Vec::new(),
        author: "tester".to_string(),
        assignee: None,
        raw: serde_json::Value::Null,
    }
}

pub fn temp_workspace() -> PathBuf {
    std::env::temp_dir().join(format!("sprintfoundry-test-{}", Uuid::new_v4()))
}

pub fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}
