//! Shared harness for the scenario tests (S1-S7 from the specification's
//! testable-properties section): wires `sprintfoundry-test-utils` fakes
//! into a real `Scheduler`/`handle_task` call so the tests exercise the
//! actual engine, not a re-implementation of it.

#![allow(dead_code)]

use std::sync::Arc;

use sprintfoundry_core::event_store::EventStore;
use sprintfoundry_core::external::human_gate::MemoryHumanGateChannel;
use sprintfoundry_core::model::{Event, TaskRun};
use sprintfoundry_core::runtime::registry::RuntimeRegistry;
use sprintfoundry_core::runtime::AgentRuntime as _;
use sprintfoundry_core::scheduler::{AgentRuntimeMap, ModelResolver, RunOutcome, Scheduler};
use sprintfoundry_core::session_store::RuntimeSessionStore;
use sprintfoundry_core::validator::{AgentCatalog, PlanValidator, Rule};
use sprintfoundry_core::{Budget, ExecutionPlan, HandleTaskInput, HandleTaskOutput, Ticket};
use sprintfoundry_test_utils::{temp_workspace, FakeGit, FakeNotifier, FakePlannerRuntime, FakeTicketProvider, ScriptedAgentRuntime};

pub struct Scenario {
    pub git: Arc<FakeGit>,
    pub notifier: Arc<FakeNotifier>,
    pub human_gate: Arc<MemoryHumanGateChannel>,
    pub agent_runtime: Arc<ScriptedAgentRuntime>,
    pub planner: Arc<FakePlannerRuntime>,
    pub ticket_provider: Arc<FakeTicketProvider>,
}

pub struct ScenarioBuilder {
    pub plan: ExecutionPlan,
    pub ticket: Ticket,
    pub agent_runtime: ScriptedAgentRuntime,
    pub rules: Vec<Rule>,
    pub budget: Budget,
    pub git: FakeGit,
    pub rework_agent: String,
}

impl ScenarioBuilder {
    pub fn new(ticket: Ticket, plan: ExecutionPlan, agent_runtime: ScriptedAgentRuntime) -> Self {
        Self {
            plan,
            ticket,
            agent_runtime,
            rules: Vec::new(),
            budget: Budget::default(),
            git: FakeGit::new(),
            rework_agent: "developer".to_string(),
        }
    }

    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_git(mut self, git: FakeGit) -> Self {
        self.git = git;
        self
    }

    pub fn with_rework_agent(mut self, agent: impl Into<String>) -> Self {
        self.rework_agent = agent.into();
        self
    }

    fn build(self) -> (HandleTaskInput, Scenario) {
        let workspace = temp_workspace();
        let planner = Arc::new(FakePlannerRuntime::new(self.plan).with_rework_agent(self.rework_agent));
        let git = Arc::new(self.git);
        let notifier = Arc::new(FakeNotifier::new());
        let human_gate = Arc::new(MemoryHumanGateChannel::new());
        let ticket_provider = Arc::new(FakeTicketProvider::new().with_ticket(self.ticket.clone()));
        let agent_runtime = Arc::new(self.agent_runtime);

        let mut registry = RuntimeRegistry::new();
        registry.register(agent_runtime.clone());
        let runtime_map = AgentRuntimeMap::single(agent_runtime.name().to_string());

        let scheduler = Arc::new(Scheduler {
            runtimes: registry,
            runtime_map,
            planner: planner.clone(),
            git: git.clone(),
            human_gate: human_gate.clone(),
            catalog: AgentCatalog::default_catalog(),
            model_resolver: ModelResolver::default(),
            platform_budget: self.budget,
            project_budget_override: None,
            workspace_path: workspace.clone(),
            cancellation: Default::default(),
        });

        let validator = Arc::new(PlanValidator::new(AgentCatalog::default_catalog(), self.rules.clone()));

        let input = HandleTaskInput {
            project_id: "proj-1".to_string(),
            ticket_id: self.ticket.id.clone(),
            ticket_source: self.ticket.source,
            workspace_path: workspace,
            global_log_dir: None,
            ticket_provider: ticket_provider.clone(),
            planner: planner.clone(),
            git: git.clone(),
            notifier: notifier.clone(),
            validator,
            rules: self.rules,
            scheduler,
        };

        (
            input,
            Scenario {
                git,
                notifier,
                human_gate,
                agent_runtime,
                planner,
                ticket_provider,
            },
        )
    }

    /// Build and run `handle_task` to completion.
    pub async fn run(self) -> (HandleTaskOutput, Scenario) {
        let (input, scenario) = self.build();
        let output = sprintfoundry_core::handle_task(input).await;
        (output, scenario)
    }

    /// Build, then spawn `handle_task` in the background, returning its
    /// `JoinHandle` alongside the `Scenario` immediately -- for tests that
    /// need to observe or resolve something (a human gate) while the run is
    /// still in flight.
    pub fn spawn(self) -> (tokio::task::JoinHandle<HandleTaskOutput>, Scenario) {
        let (input, scenario) = self.build();
        let handle = tokio::spawn(sprintfoundry_core::handle_task(input));
        (handle, scenario)
    }

    /// Call `Scheduler::execute_plan` directly, bypassing `PlanValidator`
    /// entirely. For exercising the scheduler's own runtime deadlock check
    /// (an unsatisfiable `depends_on` graph) that a validated plan could
    /// never reach, since `PlanValidator` would have rejected it first.
    pub async fn execute_plan_directly(self) -> (RunOutcome, TaskRun, Vec<Event>, Scenario) {
        let plan = self.plan.clone();
        let ticket = self.ticket.clone();
        let (input, scenario) = self.build();

        let events = EventStore::new();
        events
            .initialize(&input.workspace_path, None)
            .expect("event store initialization");
        let sessions = RuntimeSessionStore::new(&input.workspace_path);

        let mut run = TaskRun::new(input.project_id, ticket, sprintfoundry_test_utils::now());
        run.plan = Some(plan.clone());
        run.validated_plan = Some(plan.clone());

        let outcome = input.scheduler.execute_plan(&mut run, &plan, &events, &sessions, &[]).await;
        let collected = events.get_all();
        (outcome, run, collected, scenario)
    }
}
