//! `handleTask`: the end-to-end pipeline a single ticket drives through
//! (§4.7). Grounded in the teacher's `run_agent_lifecycle` sequencing
//! (workspace prep -> materialize -> spawn -> collect -> gate -> commit),
//! generalised from one agent invocation to a full scheduled plan, and with
//! the teacher's Postgres task-state machine replaced by the filesystem
//! event log and an in-process `TaskRun`.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use crate::event_store::EventStore;
use crate::external::{Git, Notifier, TicketProvider};
use crate::model::{BudgetOverride, Event, EventType, RunStatus, Ticket, TicketSource};
use crate::preflight::registry_preflight;
use crate::runtime::PlannerRuntime;
use crate::scheduler::{RunOutcome, Scheduler};
use crate::session_store::RuntimeSessionStore;
use crate::validator::{Action, PlanValidator, Rule};

use super::model::TaskRun;

/// Everything `handle_task` needs to run one ticket to completion. The
/// `Scheduler` is built by the caller (it already owns the runtime registry,
/// planner, git, and human-gate channel) since those collaborators outlive
/// any single run.
pub struct HandleTaskInput {
    pub project_id: String,
    pub ticket_id: String,
    pub ticket_source: TicketSource,
    pub workspace_path: PathBuf,
    pub global_log_dir: Option<PathBuf>,
    pub ticket_provider: Arc<dyn TicketProvider>,
    pub planner: Arc<dyn PlannerRuntime>,
    pub git: Arc<dyn Git>,
    pub notifier: Arc<dyn Notifier>,
    pub validator: Arc<PlanValidator>,
    pub rules: Vec<Rule>,
    pub scheduler: Arc<Scheduler>,
}

/// Outcome of a single `handleTask` run. The event log (closed, by the time
/// this is returned) and the `TaskRun` snapshot carry everything a caller
/// needs to report or inspect the run afterward.
pub struct HandleTaskOutput {
    pub run: TaskRun,
    pub events: Vec<Event>,
}

/// Runs one ticket through planning, validation, scheduled execution, and
/// (on success) PR creation and ticket update. `events.close()` happens on
/// every code path, success or failure, as the very last step.
pub async fn handle_task(input: HandleTaskInput) -> HandleTaskOutput {
    let event_store = EventStore::new();
    let now = Utc::now();

    let result = run_pipeline(&input, &event_store, now).await;

    let events = event_store.get_all();
    event_store.close();

    match result {
        Ok(run) => HandleTaskOutput { run, events },
        Err((run, err)) => {
            let _ = input
                .notifier
                .notify(&crate::external::NotificationEvent {
                    run_id: run.run_id.clone(),
                    kind: "task.failed".to_string(),
                    message: err.to_string(),
                })
                .await;
            HandleTaskOutput { run, events }
        }
    }
}

async fn run_pipeline(
    input: &HandleTaskInput,
    event_store: &EventStore,
    now: chrono::DateTime<Utc>,
) -> Result<TaskRun, (TaskRun, anyhow::Error)> {
    let ticket = input
        .ticket_provider
        .fetch(&input.ticket_id, input.ticket_source)
        .await
        .map_err(|e| (placeholder_run(input, now), e))?;

    let mut run = TaskRun::new(input.project_id.clone(), ticket.clone(), now);
    let _ = event_store
        .store(Event::new(run.run_id.clone(), EventType::TaskCreated, now))
        .await;

    if let Err(e) = run_pipeline_inner(input, event_store, &mut run, &ticket).await {
        run.status = RunStatus::Failed;
        run.error = Some(e.to_string());
        run.completed_at = Some(Utc::now());
        let mut data = serde_json::Map::new();
        data.insert("error".to_string(), serde_json::Value::String(e.to_string()));
        let _ = event_store
            .store(Event::new(run.run_id.clone(), EventType::TaskFailed, Utc::now()).with_data(data))
            .await;
        return Err((run, e));
    }

    Ok(run)
}

async fn run_pipeline_inner(
    input: &HandleTaskInput,
    event_store: &EventStore,
    run: &mut TaskRun,
    ticket: &Ticket,
) -> anyhow::Result<()> {
    run.status = RunStatus::Planning;

    prepare_workspace(input, event_store, run, ticket).await?;

    registry_preflight(&input.workspace_path).await?;

    let catalog = crate::validator::AgentCatalog::default_catalog();
    let definitions: Vec<crate::runtime::AgentDefinition> = crate::model::Role::ALL
        .iter()
        .filter_map(|role| {
            catalog
                .default_agent_for_role(*role)
                .map(|agent| crate::runtime::AgentDefinition {
                    agent_id: agent.to_string(),
                    role: *role,
                    default_model: "claude-sonnet-4-5".to_string(),
                })
        })
        .collect();

    let plan = input
        .planner
        .generate_plan(ticket, &definitions, &input.rules, &input.workspace_path)
        .await?;

    let mut data = serde_json::Map::new();
    data.insert("plan_id".to_string(), serde_json::json!(plan.plan_id));
    data.insert("step_count".to_string(), serde_json::json!(plan.steps.len()));
    let _ = event_store
        .store(Event::new(run.run_id.clone(), EventType::TaskPlanGenerated, Utc::now()).with_data(data))
        .await;
    run.plan = Some(plan.clone());

    let validated = input
        .validator
        .validate(plan, ticket)
        .map_err(|errors| anyhow::anyhow!("plan validation failed: {errors:?}"))?;

    let _ = event_store
        .store(Event::new(run.run_id.clone(), EventType::TaskPlanValidated, Utc::now()))
        .await;
    run.validated_plan = Some(validated.clone());
    run.status = RunStatus::Executing;

    // `set_budget` rule actions matched against the validated plan feed the
    // scheduler's budget resolution (§6); this is the one piece of
    // `resolve_budget`'s three-way merge the scheduler cannot compute on
    // its own, since only the orchestrator runs the rule engine.
    let rule_budget_overrides: Vec<BudgetOverride> = input
        .rules
        .iter()
        .filter_map(|r| match &r.action {
            Action::SetBudget { budget } if r.condition.matches(&validated, ticket) => Some(budget.clone()),
            _ => None,
        })
        .collect();

    let sessions = RuntimeSessionStore::new(&input.workspace_path);
    let outcome = input
        .scheduler
        .execute_plan(run, &validated, event_store, &sessions, &rule_budget_overrides)
        .await;

    match outcome {
        RunOutcome::Completed => {}
        RunOutcome::Cancelled => return Err(anyhow::anyhow!("run cancelled")),
        RunOutcome::Failed(err) => return Err(anyhow::anyhow!(err)),
    }

    finish_successful_run(input, event_store, run, ticket).await
}

async fn prepare_workspace(
    input: &HandleTaskInput,
    event_store: &EventStore,
    run: &mut TaskRun,
    ticket: &Ticket,
) -> anyhow::Result<()> {
    let branch = input.git.clone_and_branch(&input.workspace_path, ticket).await?;
    tracing::info!(branch, run_id = %run.run_id, "workspace prepared");

    // Must be initialised after the clone: creating `.events.jsonl` first
    // would make the clone target non-empty and fail the clone.
    event_store.initialize(&input.workspace_path, input.global_log_dir.as_deref())?;
    Ok(())
}

async fn finish_successful_run(
    input: &HandleTaskInput,
    event_store: &EventStore,
    run: &mut TaskRun,
    ticket: &Ticket,
) -> anyhow::Result<()> {
    let pr_url = input.git.create_pull_request(&input.workspace_path, run).await?;
    run.pr_url = Some(pr_url.clone());

    let mut data = serde_json::Map::new();
    data.insert("pr_url".to_string(), serde_json::json!(pr_url));
    let _ = event_store
        .store(Event::new(run.run_id.clone(), EventType::PrCreated, Utc::now()).with_data(data))
        .await;

    input
        .ticket_provider
        .update_status(ticket, "in_review", Some(&pr_url))
        .await?;
    let _ = event_store
        .store(Event::new(run.run_id.clone(), EventType::TicketUpdated, Utc::now()))
        .await;

    if let Err(e) = input
        .notifier
        .notify(&crate::external::NotificationEvent {
            run_id: run.run_id.clone(),
            kind: "task.completed".to_string(),
            message: format!("PR created: {pr_url}"),
        })
        .await
    {
        tracing::warn!(error = %e, "notification failed; run still reports success");
    }

    run.status = RunStatus::Completed;
    run.completed_at = Some(Utc::now());
    let _ = event_store
        .store(Event::new(run.run_id.clone(), EventType::TaskCompleted, Utc::now()))
        .await;

    Ok(())
}

fn placeholder_run(input: &HandleTaskInput, now: chrono::DateTime<Utc>) -> TaskRun {
    TaskRun::new(
        input.project_id.clone(),
        Ticket {
            id: input.ticket_id.clone(),
            source: input.ticket_source,
            title: String::new(),
            description: String::new(),
            labels: Vec::new(),
            priority: crate::model::Priority::P2,
            acceptance_criteria: Vec::new(),
            linked_tickets: Vec::new(),
            comments: Vec::new(),
            author: String::new(),
            assignee: None,
            raw: serde_json::Value::Null,
        },
        now,
    )
}

