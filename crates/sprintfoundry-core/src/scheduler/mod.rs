//! The scheduler: dependency-DAG-driven execution of a validated plan.
//!
//! This is the heart of the engine (§4.6). Structured concurrency for
//! parallel groups is implemented with `tokio::spawn` + a join collection,
//! not `futures::join_all`, so the "coordinator join, reconcile after"
//! pattern is explicit in the control flow. The rework retry loop is an
//! iterative `loop {}` carrying an explicit `resume_reason` frame rather
//! than recursive `async fn` calls, per §9 Design Notes.

pub mod model_resolver;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::budget::resolve_budget;
use crate::error::{PersistenceError, PreflightViolation, RunError};
use crate::event_store::EventStore;
use crate::external::human_gate::{HumanGateChannel, ReviewDecisionStatus};
use crate::external::Git;
use crate::gate::run_quality_gate;
use crate::model::{
    AgentResult, AgentResultStatus, Budget, BudgetOverride, Event, EventType, ExecutionPlan, HumanGate, HumanReview,
    ParallelGroup, PlanStep, ReviewStatus, Role, RunStatus, StepContext, StepExecution, StepStatus, TaskRun,
};
use crate::runtime::registry::RuntimeRegistry;
use crate::runtime::{rework_step_number_floor, PlannerRuntime};
use crate::session_store::{RuntimeSessionRecord, RuntimeSessionStore};
use crate::validator::AgentCatalog;

pub use model_resolver::ModelResolver;

/// Runtimes a given agent id may be routed to. Concrete runtime selection
/// (CLI subprocess vs. container) is out of scope for the core per §1; this
/// is the thin mapping the scheduler needs to find *which* registered
/// `AgentRuntime` serves a given agent id.
#[derive(Debug, Clone, Default)]
pub struct AgentRuntimeMap {
    pub by_agent: HashMap<String, String>,
    pub default_runtime: Option<String>,
}

impl AgentRuntimeMap {
    pub fn single(runtime_name: impl Into<String>) -> Self {
        Self {
            by_agent: HashMap::new(),
            default_runtime: Some(runtime_name.into()),
        }
    }

    fn resolve(&self, agent: &str) -> Option<&str> {
        self.by_agent
            .get(agent)
            .map(String::as_str)
            .or(self.default_runtime.as_deref())
    }
}

pub struct Scheduler {
    pub runtimes: RuntimeRegistry,
    pub runtime_map: AgentRuntimeMap,
    pub planner: Arc<dyn PlannerRuntime>,
    pub git: Arc<dyn Git>,
    pub human_gate: Arc<dyn HumanGateChannel>,
    pub catalog: AgentCatalog,
    pub model_resolver: ModelResolver,
    pub platform_budget: Budget,
    pub project_budget_override: Option<BudgetOverride>,
    pub workspace_path: PathBuf,
    pub cancellation: CancellationToken,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Failed(RunError),
    Cancelled,
}

/// Which check produced a `needs_rework` signal: the agent's own result, or
/// the post-completion developer quality gate. §4.6 (`complete` branch)
/// requires the sequential retry loop to pass a different `resumeReason`
/// depending on which one it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReworkOrigin {
    AgentReported,
    QualityGate,
}

/// A step's signal inside a parallel group: it reported (or the quality
/// gate judged) `needs_rework`, collected for merge-after-join instead of
/// triggering its own `planRework` call.
#[derive(Debug, Clone)]
struct ReworkSignal {
    step: PlanStep,
    rework_count: i32,
    reason: String,
    origin: ReworkOrigin,
}

/// What a single attempt at a step (sequential or one parallel member)
/// resolved to, after bookkeeping (totals, events, git checkpoint, quality
/// gate) has already been applied.
enum AttemptOutcome {
    Completed,
    Rework(ReworkSignal),
    Failed,
}

impl Scheduler {
    /// `resolve_budget`'s merge order (§6): platform defaults, then the
    /// project override, then any `set_budget` rule actions matched against
    /// the validated plan (supplied by the caller, since only the
    /// orchestrator knows which rules matched).
    fn effective_budget(&self, rule_overrides: &[BudgetOverride]) -> Budget {
        resolve_budget(&self.platform_budget, self.project_budget_override.as_ref(), rule_overrides)
    }

    fn resolve_runtime(&self, agent: &str) -> Option<Arc<dyn crate::runtime::AgentRuntime>> {
        self.runtime_map.resolve(agent).and_then(|name| self.runtimes.get(name))
    }

    /// Execute `plan` to a terminal outcome. Mutates `run` in place;
    /// `run.status` reflects the terminal state on return.
    pub async fn execute_plan(
        &self,
        run: &mut TaskRun,
        plan: &ExecutionPlan,
        events: &EventStore,
        sessions: &RuntimeSessionStore,
        rule_budget_overrides: &[BudgetOverride],
    ) -> RunOutcome {
        let budget = self.effective_budget(rule_budget_overrides);
        let mut completed: HashSet<i64> = HashSet::new();
        let mut rework_counts: HashMap<i64, i32> = HashMap::new();
        let mut reviewed_gates: HashSet<i64> = HashSet::new();

        loop {
            if self.cancellation.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            if completed.len() == plan.steps.len() {
                run.status = RunStatus::Completed;
                return RunOutcome::Completed;
            }

            let ready: Vec<&PlanStep> = plan
                .steps
                .iter()
                .filter(|s| !completed.contains(&s.step_number) && s.depends_on.iter().all(|d| completed.contains(d)))
                .collect();

            if ready.is_empty() {
                run.status = RunStatus::Failed;
                run.error = Some(RunError::Deadlock.to_string());
                return RunOutcome::Failed(RunError::Deadlock);
            }

            let ready_numbers: HashSet<i64> = ready.iter().map(|s| s.step_number).collect();
            let group = largest_ready_group(&plan.parallel_groups, &ready_numbers);

            let batch_result = match group {
                Some(group_numbers) => {
                    let group_steps: Vec<PlanStep> = plan
                        .steps
                        .iter()
                        .filter(|s| group_numbers.contains(&s.step_number))
                        .cloned()
                        .collect();
                    self.execute_group(run, plan, &group_steps, &budget, &mut rework_counts, events, sessions)
                        .await
                }
                None => {
                    let step = ready[0].clone();
                    self.execute_step_sequential(run, plan, &step, &budget, &mut rework_counts, events, sessions)
                        .await
                        .and_then(|outcome| match outcome {
                            AttemptOutcome::Completed => Ok(vec![step.step_number]),
                            // Rework is fully resolved inside execute_step_sequential's own
                            // retry loop; a Failed reaching here is terminal and must end the
                            // run, or the step would stay "ready" forever and loop.
                            AttemptOutcome::Failed => {
                                Err(RunError::Other(format!("step {} failed", step.step_number)))
                            }
                            AttemptOutcome::Rework(_) => Ok(Vec::new()),
                        })
                }
            };

            match batch_result {
                Ok(newly_completed) => completed.extend(newly_completed),
                Err(err) => {
                    run.status = RunStatus::Failed;
                    run.error = Some(err.to_string());
                    self.emit_task_failed(run, events, &err.to_string()).await;
                    return RunOutcome::Failed(err);
                }
            }

            for gate in &plan.human_gates {
                if gate.required && completed.contains(&gate.after_step) && !reviewed_gates.contains(&gate.after_step)
                {
                    reviewed_gates.insert(gate.after_step);
                    if let Err(err) = self.process_human_gate(run, gate, &budget, events).await {
                        run.status = RunStatus::Failed;
                        run.error = Some(err.to_string());
                        self.emit_task_failed(run, events, &err.to_string()).await;
                        return RunOutcome::Failed(err);
                    }
                }
            }
        }
    }

    async fn emit_task_failed(&self, run: &TaskRun, events: &EventStore, message: &str) {
        let mut data = serde_json::Map::new();
        data.insert("error".to_string(), serde_json::Value::String(message.to_string()));
        let _ = events
            .store(Event::new(run.run_id.clone(), EventType::TaskFailed, Utc::now()).with_data(data))
            .await;
    }

    // -- Sequential single-step execution -------------------------------

    async fn execute_step_sequential(
        &self,
        run: &mut TaskRun,
        plan: &ExecutionPlan,
        step: &PlanStep,
        budget: &Budget,
        rework_counts: &mut HashMap<i64, i32>,
        events: &EventStore,
        sessions: &RuntimeSessionStore,
    ) -> Result<AttemptOutcome, RunError> {
        let mut resume_reason: Option<String> = None;
        loop {
            let rework_count = *rework_counts.get(&step.step_number).unwrap_or(&0);
            let ctx = match self
                .begin_attempt(run, events, sessions, step, budget, rework_count, resume_reason.as_deref())
                .await?
            {
                Some(ctx) => ctx,
                None => return Ok(AttemptOutcome::Failed),
            };

            let runtime = self
                .resolve_runtime(&step.agent)
                .ok_or_else(|| RunError::Other(format!("no runtime registered for agent {}", step.agent)))?;
            let call = runtime.run_step(&ctx).await;

            let outcome = self
                .finalize_attempt(run, events, sessions, step, &ctx, call, rework_count)
                .await?;

            match outcome {
                AttemptOutcome::Completed => return Ok(AttemptOutcome::Completed),
                AttemptOutcome::Failed => return Ok(AttemptOutcome::Failed),
                AttemptOutcome::Rework(signal) => {
                    if signal.rework_count >= budget.max_rework_cycles {
                        self.fail_step_rework_overflow(run, step, events, budget.max_rework_cycles)
                            .await;
                        return Ok(AttemptOutcome::Failed);
                    }
                    rework_counts.insert(step.step_number, signal.rework_count + 1);
                    self.emit_rework_triggered(run, events, &signal, false).await;

                    let rework_steps = self
                        .planner
                        .plan_rework(
                            &run.ticket,
                            step,
                            &rework_agent_result(&signal.reason),
                            &self.workspace_path,
                            &plan.steps,
                            signal.rework_count + 1,
                            &[],
                        )
                        .await
                        .map_err(|e| RunError::Planning(e))?;

                    self.execute_rework_steps(run, &rework_steps, budget, events, sessions)
                        .await?;

                    resume_reason = Some(match signal.origin {
                        ReworkOrigin::AgentReported => "rework_retry".to_string(),
                        ReworkOrigin::QualityGate => "quality_gate_retry".to_string(),
                    });
                }
            }
        }
    }

    /// Rework steps are minimal fixups with no rework chaining of their
    /// own; a rework step that itself fails or asks for rework fails the
    /// whole run rather than recursing further.
    async fn execute_rework_steps(
        &self,
        run: &mut TaskRun,
        rework_steps: &[PlanStep],
        budget: &Budget,
        events: &EventStore,
        sessions: &RuntimeSessionStore,
    ) -> Result<(), RunError> {
        for rs in rework_steps {
            if rs.step_number < rework_step_number_floor(0) {
                return Err(RunError::Other(format!(
                    "planRework returned step_number {} below the reserved rework floor",
                    rs.step_number
                )));
            }
            let ctx = match self
                .begin_attempt(run, events, sessions, rs, budget, 0, Some("rework_plan"))
                .await?
            {
                Some(ctx) => ctx,
                None => return Err(RunError::Other(format!("rework step {} failed preflight", rs.step_number))),
            };
            let runtime = self
                .resolve_runtime(&rs.agent)
                .ok_or_else(|| RunError::Other(format!("no runtime registered for agent {}", rs.agent)))?;
            let call = runtime.run_step(&ctx).await;
            match self.finalize_attempt(run, events, sessions, rs, &ctx, call, 0).await? {
                AttemptOutcome::Completed => {}
                AttemptOutcome::Rework(_) | AttemptOutcome::Failed => {
                    return Err(RunError::Other(format!("rework step {} did not complete", rs.step_number)));
                }
            }
        }
        Ok(())
    }

    // -- Parallel group execution ----------------------------------------

    async fn execute_group(
        &self,
        run: &mut TaskRun,
        plan: &ExecutionPlan,
        group_steps: &[PlanStep],
        budget: &Budget,
        rework_counts: &mut HashMap<i64, i32>,
        events: &EventStore,
        sessions: &RuntimeSessionStore,
    ) -> Result<Vec<i64>, RunError> {
        // Phase 1: begin every member's attempt (main context: push running
        // records, emit step.started, resolve sessions) before spawning.
        let mut contexts = Vec::new();
        for step in group_steps {
            let rework_count = *rework_counts.get(&step.step_number).unwrap_or(&0);
            match self
                .begin_attempt(run, events, sessions, step, budget, rework_count, None)
                .await?
            {
                Some(ctx) => contexts.push((step.clone(), rework_count, ctx)),
                // begin_attempt already recorded the step as failed; the run
                // must terminate here too, or the group stays fully `ready`
                // and the same preflight violation re-fires every iteration.
                None => return Err(RunError::Other(format!("step {} failed preflight", step.step_number))),
            }
        }

        // Phase 2: run members concurrently via a join channel.
        let (tx, mut rx) = tokio::sync::mpsc::channel(contexts.len().max(1));
        for (step, rework_count, ctx) in contexts {
            let runtime = self
                .resolve_runtime(&step.agent)
                .ok_or_else(|| RunError::Other(format!("no runtime registered for agent {}", step.agent)))?;
            let tx = tx.clone();
            tokio::spawn(async move {
                let call = runtime.run_step(&ctx).await;
                let _ = tx.send((step, rework_count, ctx, call)).await;
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(group_steps.len());
        while let Some(item) = rx.recv().await {
            results.push(item);
        }

        // Phase 3: reconcile in the main context, one at a time.
        let mut signals = Vec::new();
        let mut completed_numbers = Vec::new();
        for (step, rework_count, ctx, call) in results {
            match self.finalize_attempt(run, events, sessions, &step, &ctx, call, rework_count).await? {
                AttemptOutcome::Completed => completed_numbers.push(step.step_number),
                AttemptOutcome::Failed => {
                    return Err(RunError::Other(format!("step {} failed in parallel group", step.step_number)))
                }
                AttemptOutcome::Rework(signal) => signals.push(signal),
            }
        }

        if signals.is_empty() {
            return Ok(completed_numbers);
        }

        // A group never spawns multiple parallel rework plans: at most one
        // planRework call per rework round per group.
        if signals.iter().any(|s| s.rework_count >= budget.max_rework_cycles) {
            return Err(RunError::Rework(crate::error::ReworkOverflow {
                step_number: signals[0].step.step_number,
                max: budget.max_rework_cycles,
            }));
        }

        let merged = true; // any step.rework_triggered emitted here is part of a group reconciliation
        for signal in &signals {
            rework_counts.insert(signal.step.step_number, signal.rework_count + 1);
            self.emit_rework_triggered(run, events, signal, merged && signals.len() > 1).await;
        }

        let primary = &signals[0];
        let merged_reason = if signals.len() == 1 {
            primary.reason.clone()
        } else {
            signals
                .iter()
                .map(|s| format!("[{}] {}", s.step.agent, s.reason))
                .collect::<Vec<_>>()
                .join("; ")
        };

        let rework_steps = self
            .planner
            .plan_rework(
                &run.ticket,
                &primary.step,
                &rework_agent_result(&merged_reason),
                &self.workspace_path,
                &plan.steps,
                primary.rework_count + 1,
                &[],
            )
            .await
            .map_err(RunError::Planning)?;

        self.execute_rework_steps(run, &rework_steps, budget, events, sessions).await?;

        // Group members stay absent from `completed`; the outer loop will
        // pick them up again.
        Ok(completed_numbers)
    }

    // -- Shared attempt bookkeeping ---------------------------------------

    /// Pushes a `running` `StepExecution`, resolves model/runtime params and
    /// the resume session, enforces pre-flight budgets, and (if they pass)
    /// emits `step.started`. Returns `None` if the step failed during
    /// preflight (already recorded as `failed`); `Some(ctx)` otherwise.
    async fn begin_attempt(
        &self,
        run: &mut TaskRun,
        events: &EventStore,
        sessions: &RuntimeSessionStore,
        step: &PlanStep,
        budget: &Budget,
        rework_count: i32,
        resume_reason: Option<&str>,
    ) -> Result<Option<StepContext>, RunError> {
        let attempt = run.steps.iter().filter(|s| s.step_number == step.step_number).count() as i32;
        let now = Utc::now();

        run.steps.push(StepExecution {
            step_number: step.step_number,
            agent: step.agent.clone(),
            status: StepStatus::Running,
            runtime_id: None,
            tokens_used: 0,
            cost_usd: 0.0,
            started_at: now,
            completed_at: None,
            result: None,
            rework_count,
        });

        if let Some(violation) = self.check_preflight(run, budget) {
            self.mark_failed(run, step.step_number, now);
            match &violation {
                PreflightViolation::TokenBudgetExceeded { used, budget } => {
                    let mut data = serde_json::Map::new();
                    data.insert("used".to_string(), serde_json::json!(used));
                    data.insert("budget".to_string(), serde_json::json!(budget));
                    data.insert("reason".to_string(), serde_json::json!("token_budget"));
                    let _ = events
                        .store(Event::new(run.run_id.clone(), EventType::AgentTokenLimitExceeded, now).with_data(data))
                        .await;
                }
                PreflightViolation::CostBudgetExceeded { used, budget } => {
                    let mut data = serde_json::Map::new();
                    data.insert("used".to_string(), serde_json::json!(used));
                    data.insert("budget".to_string(), serde_json::json!(budget));
                    data.insert("reason".to_string(), serde_json::json!("cost_budget"));
                    let _ = events
                        .store(Event::new(run.run_id.clone(), EventType::AgentTokenLimitExceeded, now).with_data(data))
                        .await;
                }
                PreflightViolation::TaskTimeoutExceeded { minutes } => {
                    let mut data = serde_json::Map::new();
                    data.insert("minutes".to_string(), serde_json::json!(minutes));
                    let _ = events
                        .store(Event::new(run.run_id.clone(), EventType::TaskFailed, now).with_data(data))
                        .await;
                }
                PreflightViolation::RegistryUnreachable { .. } => {}
            }
            return Ok(None);
        }

        let role = self.catalog.role_of(&step.agent);
        let model = self.model_resolver.resolve(&step.agent, role);

        let resume_session_id = if resume_reason.is_some() {
            sessions
                .find_latest_by_agent(&run.run_id, &step.agent)
                .await
                .ok()
                .flatten()
                .map(|r| r.session_id)
        } else {
            None
        };

        let ctx = StepContext {
            run_id: run.run_id.clone(),
            step: step.clone(),
            workspace_path: self.workspace_path.clone(),
            model_config: model,
            api_key: None,
            timeout_minutes: budget.timeout_minutes,
            token_budget: budget.per_agent_tokens,
            resume_session_id: resume_session_id.clone(),
            resume_reason: resume_reason.map(|s| s.to_string()),
            attempt,
        };

        let mut data = serde_json::Map::new();
        data.insert("resume_session_id".to_string(), serde_json::json!(resume_session_id));
        data.insert("resume_reason".to_string(), serde_json::json!(resume_reason));
        data.insert("attempt".to_string(), serde_json::json!(attempt));
        data.insert("agent".to_string(), serde_json::json!(step.agent));
        let mut ev = Event::new(run.run_id.clone(), EventType::StepStarted, now).with_data(data);
        ev.data.insert("step_number".to_string(), serde_json::json!(step.step_number));
        let _ = events.store(ev).await;

        Ok(Some(ctx))
    }

    fn check_preflight(&self, run: &TaskRun, budget: &Budget) -> Option<PreflightViolation> {
        if run.total_tokens_used >= budget.per_task_total_tokens {
            return Some(PreflightViolation::TokenBudgetExceeded {
                used: run.total_tokens_used,
                budget: budget.per_task_total_tokens,
            });
        }
        if budget.per_task_max_cost_usd > 0.0 && run.total_cost_usd >= budget.per_task_max_cost_usd {
            return Some(PreflightViolation::CostBudgetExceeded {
                used: run.total_cost_usd,
                budget: budget.per_task_max_cost_usd,
            });
        }
        let elapsed_minutes = (Utc::now() - run.created_at).num_minutes();
        if elapsed_minutes >= budget.task_timeout_minutes {
            return Some(PreflightViolation::TaskTimeoutExceeded {
                minutes: budget.task_timeout_minutes,
            });
        }
        None
    }

    fn mark_failed(&self, run: &mut TaskRun, step_number: i64, now: chrono::DateTime<Utc>) {
        if let Some(exec) = run
            .steps
            .iter_mut()
            .rev()
            .find(|s| s.step_number == step_number && s.status == StepStatus::Running)
        {
            exec.status = StepStatus::Failed;
            exec.completed_at = Some(now);
        }
    }

    async fn fail_step_rework_overflow(&self, run: &mut TaskRun, step: &PlanStep, events: &EventStore, max: i32) {
        let now = Utc::now();
        self.mark_failed(run, step.step_number, now);
        let mut data = serde_json::Map::new();
        data.insert("step_number".to_string(), serde_json::json!(step.step_number));
        data.insert("reason".to_string(), serde_json::json!("max_rework_exceeded"));
        data.insert("max_rework_cycles".to_string(), serde_json::json!(max));
        let _ = events
            .store(Event::new(run.run_id.clone(), EventType::StepFailed, now).with_data(data))
            .await;
    }

    async fn emit_rework_triggered(&self, run: &TaskRun, events: &EventStore, signal: &ReworkSignal, merged: bool) {
        let mut data = serde_json::Map::new();
        data.insert("step_number".to_string(), serde_json::json!(signal.step.step_number));
        data.insert("agent".to_string(), serde_json::json!(signal.step.agent));
        data.insert("reason".to_string(), serde_json::json!(signal.reason));
        data.insert("merged".to_string(), serde_json::json!(merged));
        let _ = events
            .store(Event::new(run.run_id.clone(), EventType::StepReworkTriggered, Utc::now()).with_data(data))
            .await;
    }

    /// Applies the outcome of one `run_step` call: updates run totals and
    /// the step record, records a resumable session when one was returned,
    /// commits a git checkpoint and runs the quality gate on `complete`,
    /// and classifies the result for the caller (sequential loop or group
    /// reconciliation) to act on.
    async fn finalize_attempt(
        &self,
        run: &mut TaskRun,
        events: &EventStore,
        sessions: &RuntimeSessionStore,
        step: &PlanStep,
        ctx: &StepContext,
        call: Result<(AgentResult, crate::model::RuntimeOutcome), crate::error::RuntimeError>,
        rework_count: i32,
    ) -> Result<AttemptOutcome, RunError> {
        let now = Utc::now();
        let (agent_result, outcome) = match call {
            Ok(v) => v,
            Err(err) => {
                self.mark_failed(run, step.step_number, now);
                let mut data = serde_json::Map::new();
                data.insert("step_number".to_string(), serde_json::json!(step.step_number));
                data.insert("error".to_string(), serde_json::json!(err.to_string()));
                let _ = events
                    .store(Event::new(run.run_id.clone(), EventType::StepFailed, now).with_data(data))
                    .await;
                return Ok(AttemptOutcome::Failed);
            }
        };

        run.total_tokens_used += outcome.tokens_used;
        run.total_cost_usd += outcome.cost_usd.unwrap_or(0.0);

        if looks_like_real_session(&outcome.runtime_id) {
            let _ = sessions
                .record(RuntimeSessionRecord {
                    run_id: run.run_id.clone(),
                    agent: step.agent.clone(),
                    step_number: step.step_number,
                    step_attempt: ctx.attempt,
                    session_id: outcome.runtime_id.clone(),
                    updated_at: now,
                })
                .await;
        }

        let exec_idx = run
            .steps
            .iter()
            .rposition(|s| s.step_number == step.step_number && s.status == StepStatus::Running)
            .ok_or_else(|| RunError::Other(format!("no running StepExecution found for step {}", step.step_number)))?;
        run.steps[exec_idx].runtime_id = Some(outcome.runtime_id.clone());
        run.steps[exec_idx].tokens_used = outcome.tokens_used;
        run.steps[exec_idx].cost_usd = outcome.cost_usd.unwrap_or(0.0);

        match agent_result.status {
            AgentResultStatus::Complete => {
                run.steps[exec_idx].status = StepStatus::Completed;
                run.steps[exec_idx].completed_at = Some(now);
                run.steps[exec_idx].result = Some(agent_result.clone());

                let committed = self
                    .git
                    .commit_step_checkpoint(&self.workspace_path, &run.run_id, step.step_number, &step.agent)
                    .await;
                match committed {
                    Err(e) => {
                        run.steps[exec_idx].status = StepStatus::Failed;
                        let mut data = serde_json::Map::new();
                        data.insert("step_number".to_string(), serde_json::json!(step.step_number));
                        data.insert("error".to_string(), serde_json::json!(e.to_string()));
                        let _ = events
                            .store(Event::new(run.run_id.clone(), EventType::StepFailed, now).with_data(data))
                            .await;
                        return Err(RunError::Persistence(PersistenceError {
                            step_number: step.step_number,
                            message: e.to_string(),
                        }));
                    }
                    Ok(true) => {
                        let mut data = serde_json::Map::new();
                        data.insert("step_number".to_string(), serde_json::json!(step.step_number));
                        let _ = events
                            .store(Event::new(run.run_id.clone(), EventType::StepCommitted, Utc::now()).with_data(data))
                            .await;
                    }
                    Ok(false) => {}
                }

                let mut data = serde_json::Map::new();
                data.insert("step_number".to_string(), serde_json::json!(step.step_number));
                data.insert("agent".to_string(), serde_json::json!(step.agent));
                let _ = events
                    .store(Event::new(run.run_id.clone(), EventType::StepCompleted, Utc::now()).with_data(data))
                    .await;

                if self.catalog.role_of(&step.agent) == Some(Role::Developer) {
                    let gate = run_quality_gate(&self.workspace_path).await;
                    if !gate.passed {
                        run.steps[exec_idx].status = StepStatus::NeedsRework;
                        return Ok(AttemptOutcome::Rework(ReworkSignal {
                            step: step.clone(),
                            rework_count,
                            reason: format!("Quality gate failed: {}", gate.failures.join("; ")),
                            origin: ReworkOrigin::QualityGate,
                        }));
                    }
                }
                Ok(AttemptOutcome::Completed)
            }
            AgentResultStatus::NeedsRework => {
                run.steps[exec_idx].status = StepStatus::NeedsRework;
                run.steps[exec_idx].completed_at = Some(now);
                run.steps[exec_idx].result = Some(agent_result.clone());
                Ok(AttemptOutcome::Rework(ReworkSignal {
                    step: step.clone(),
                    rework_count,
                    reason: agent_result
                        .rework_reason
                        .clone()
                        .unwrap_or_else(|| "agent requested rework".to_string()),
                    origin: ReworkOrigin::AgentReported,
                }))
            }
            AgentResultStatus::Blocked | AgentResultStatus::Failed => {
                run.steps[exec_idx].status = StepStatus::Failed;
                run.steps[exec_idx].completed_at = Some(now);
                run.steps[exec_idx].result = Some(agent_result.clone());
                let mut data = serde_json::Map::new();
                data.insert("step_number".to_string(), serde_json::json!(step.step_number));
                data.insert("status".to_string(), serde_json::json!(agent_result.status.to_string()));
                data.insert("summary".to_string(), serde_json::json!(agent_result.summary));
                let _ = events
                    .store(Event::new(run.run_id.clone(), EventType::StepFailed, now).with_data(data))
                    .await;
                Ok(AttemptOutcome::Failed)
            }
        }
    }

    // -- Human gates -------------------------------------------------------

    async fn process_human_gate(
        &self,
        run: &mut TaskRun,
        gate: &HumanGate,
        budget: &Budget,
        events: &EventStore,
    ) -> Result<(), RunError> {
        run.status = RunStatus::WaitingHumanReview;
        let review_id = Uuid::new_v4();
        let review = HumanReview {
            review_id,
            run_id: run.run_id.clone(),
            after_step: gate.after_step,
            status: ReviewStatus::Pending,
            summary: gate.reason.clone(),
            artifacts_to_review: Vec::new(),
            reviewer_feedback: None,
            decided_at: None,
        };

        self.human_gate
            .request(&review)
            .await
            .map_err(|e| RunError::Other(format!("failed to request human review: {e}")))?;

        let mut data = serde_json::Map::new();
        data.insert("review_id".to_string(), serde_json::json!(review_id));
        data.insert("after_step".to_string(), serde_json::json!(gate.after_step));
        let _ = events
            .store(Event::new(run.run_id.clone(), EventType::HumanGateRequested, Utc::now()).with_data(data))
            .await;

        let timeout = Duration::from_secs((budget.human_gate_timeout_hours.max(0) as u64) * 3600);
        let decision = self
            .human_gate
            .await_decision(review_id, timeout)
            .await
            .map_err(|e| RunError::Other(format!("failed awaiting human review: {e}")))?;

        match decision.status {
            ReviewDecisionStatus::Approved => {
                if let Some(exec) = run.steps.iter_mut().rev().find(|s| s.step_number == gate.after_step) {
                    if let Some(result) = exec.result.as_mut() {
                        result.mark_human_reviewed();
                    }
                }
                let _ = events
                    .store(Event::new(run.run_id.clone(), EventType::HumanGateApproved, Utc::now()))
                    .await;
                run.status = RunStatus::Executing;
                Ok(())
            }
            ReviewDecisionStatus::Rejected => {
                let _ = events
                    .store(Event::new(run.run_id.clone(), EventType::HumanGateRejected, Utc::now()))
                    .await;
                Err(RunError::HumanReview(crate::error::HumanReviewError::Rejected {
                    feedback: decision.reviewer_feedback,
                }))
            }
        }
    }
}

/// Heuristic: a session id "looks real" when it is nonempty and not a
/// locally-synthesised placeholder, per §4.6 step 5.
fn looks_like_real_session(runtime_id: &str) -> bool {
    !runtime_id.is_empty() && !runtime_id.starts_with("local-") && !runtime_id.starts_with("sprintfoundry-")
}

fn rework_agent_result(reason: &str) -> AgentResult {
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

/// The largest parallel group whose step numbers are all members of
/// `ready`. Falls back to `None` (sequential execution of the first ready
/// step) when no declared group is fully ready or every ready group has
/// size <= 1.
fn largest_ready_group(groups: &[ParallelGroup], ready: &HashSet<i64>) -> Option<HashSet<i64>> {
    groups
        .iter()
        .filter(|g| g.step_numbers.len() > 1 && g.step_numbers.iter().all(|n| ready.contains(n)))
        .max_by_key(|g| g.step_numbers.len())
        .map(|g| g.step_numbers.iter().copied().collect())
}
