//! The data model: tickets, plans, step executions, results, runs, reviews
//! and events. Mirrors the shapes every other module in this crate trades in.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant),+
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s = match self {
                    $(Self::$variant => $text),+
                };
                f.write_str(s)
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError {
                        type_name: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {type_name} value: {value:?}")]
pub struct ParseEnumError {
    pub type_name: &'static str,
    pub value: String,
}

closed_enum! {
    pub enum TicketSource {
        Linear => "linear",
        Github => "github",
        Jira => "jira",
        Prompt => "prompt",
    }
}

closed_enum! {
    pub enum Priority {
        P0 => "p0",
        P1 => "p1",
        P2 => "p2",
        P3 => "p3",
    }
}

closed_enum! {
    pub enum Complexity {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

closed_enum! {
    pub enum Classification {
        NewFeature => "new_feature",
        BugFix => "bug_fix",
        UiChange => "ui_change",
        Refactor => "refactor",
        Infrastructure => "infrastructure",
        SecurityFix => "security_fix",
        Documentation => "documentation",
        ProductQuestion => "product_question",
    }
}

closed_enum! {
    pub enum StepStatus {
        Running => "running",
        Completed => "completed",
        NeedsRework => "needs_rework",
        Failed => "failed",
    }
}

closed_enum! {
    pub enum AgentResultStatus {
        Complete => "complete",
        NeedsRework => "needs_rework",
        Blocked => "blocked",
        Failed => "failed",
    }
}

closed_enum! {
    pub enum RunStatus {
        Pending => "pending",
        Planning => "planning",
        Executing => "executing",
        WaitingHumanReview => "waiting_human_review",
        Completed => "completed",
        Failed => "failed",
    }
}

closed_enum! {
    pub enum ReviewStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

/// Nine recognised agent roles, in the injection-ordering used by the
/// validator (`product < architect < ui-ux < developer < code-review < qa <
/// security < devops`).
closed_enum! {
    pub enum Role {
        Product => "product",
        Architect => "architect",
        UiUx => "ui-ux",
        Developer => "developer",
        CodeReview => "code-review",
        Qa => "qa",
        Security => "security",
        Devops => "devops",
    }
}

impl Role {
    /// Ordinal used to preserve role ordering when the validator injects
    /// steps. Lower sorts first.
    pub fn ordinal(self) -> u8 {
        match self {
            Role::Product => 0,
            Role::Architect => 1,
            Role::UiUx => 2,
            Role::Developer => 3,
            Role::CodeReview => 4,
            Role::Qa => 5,
            Role::Security => 6,
            Role::Devops => 7,
        }
    }

    pub const ALL: [Role; 8] = [
        Role::Product,
        Role::Architect,
        Role::UiUx,
        Role::Developer,
        Role::CodeReview,
        Role::Qa,
        Role::Security,
        Role::Devops,
    ];
}

/// Immutable for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub source: TicketSource,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub priority: Priority,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub linked_tickets: Vec<String>,
    #[serde(default)]
    pub comments: Vec<String>,
    pub author: String,
    #[serde(default)]
    pub assignee: Option<String>,
    /// Opaque provider-specific payload, never interpreted by the core.
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// One of a step's context inputs; the two planner dialects for
/// `parallel_groups` get collapsed at ingestion, this enum does the same
/// job for context input shapes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextInput {
    Ticket,
    File { path: String },
    Directory { path: String },
    StepOutput { step_number: i64 },
    Artifact { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_number: i64,
    pub agent: String,
    pub model: String,
    pub task: String,
    #[serde(default)]
    pub context_inputs: Vec<ContextInput>,
    #[serde(default)]
    pub depends_on: Vec<i64>,
    pub estimated_complexity: Complexity,
}

/// A disjoint set of step numbers the planner asserts may run concurrently.
/// Normalises the two source dialects (bare array of numbers, or
/// `{step_numbers:[...]}`) into one shape.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ParallelGroup {
    #[serde(deserialize_with = "deserialize_step_numbers")]
    pub step_numbers: Vec<i64>,
}

fn deserialize_step_numbers<'de, D>(deserializer: D) -> Result<Vec<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Dialect {
        Bare(Vec<i64>),
        Wrapped { step_numbers: Vec<i64> },
    }
    match Dialect::deserialize(deserializer)? {
        Dialect::Bare(v) => Ok(v),
        Dialect::Wrapped { step_numbers } => Ok(step_numbers),
    }
}

impl Serialize for ParallelGroup {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.step_numbers.serialize(serializer)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanGate {
    pub after_step: i64,
    pub reason: String,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan_id: Uuid,
    pub ticket_id: String,
    pub classification: Classification,
    pub reasoning: String,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub parallel_groups: Vec<ParallelGroup>,
    #[serde(default)]
    pub human_gates: Vec<HumanGate>,
}

/// Runtime output contract, per `AgentRuntime.runStep`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub status: AgentResultStatus,
    pub summary: String,
    #[serde(default)]
    pub artifacts_created: Vec<String>,
    #[serde(default)]
    pub artifacts_modified: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub rework_reason: Option<String>,
    #[serde(default)]
    pub rework_target: Option<i64>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AgentResult {
    /// Reserved metadata key the core itself writes, never inspected beyond
    /// this single annotation.
    pub const HUMAN_REVIEWED_KEY: &'static str = "human_reviewed";

    pub fn mark_human_reviewed(&mut self) {
        self.metadata
            .insert(Self::HUMAN_REVIEWED_KEY.to_string(), serde_json::Value::Bool(true));
    }
}

/// Telemetry describing what an `AgentRuntime.runStep` call produced, beyond
/// the `AgentResult` judgement itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeOutcome {
    pub tokens_used: i64,
    pub runtime_id: String,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub usage: Option<serde_json::Value>,
    #[serde(default)]
    pub token_savings: Option<i64>,
    #[serde(default)]
    pub resume_used: bool,
    #[serde(default)]
    pub resume_failed: bool,
    #[serde(default)]
    pub resume_fallback: bool,
    #[serde(default)]
    pub runtime_metadata: Option<serde_json::Value>,
}

/// Per-attempt record. Each re-execution of a step appends a fresh
/// `StepExecution` rather than mutating a prior attempt's record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_number: i64,
    pub agent: String,
    pub status: StepStatus,
    pub runtime_id: Option<String>,
    pub tokens_used: i64,
    pub cost_usd: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<AgentResult>,
    pub rework_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanReview {
    pub review_id: Uuid,
    pub run_id: String,
    pub after_step: i64,
    pub status: ReviewStatus,
    pub summary: String,
    #[serde(default)]
    pub artifacts_to_review: Vec<String>,
    #[serde(default)]
    pub reviewer_feedback: Option<String>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
}

/// Run-scoped mutable aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub run_id: String,
    pub project_id: String,
    pub ticket: Ticket,
    pub plan: Option<ExecutionPlan>,
    pub validated_plan: Option<ExecutionPlan>,
    pub status: RunStatus,
    pub steps: Vec<StepExecution>,
    pub total_tokens_used: i64,
    pub total_cost_usd: f64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pr_url: Option<String>,
    pub error: Option<String>,
}

impl TaskRun {
    /// `run_id` uniqueness is timestamp + random, matching the convention
    /// in §3: "unique: timestamp+random".
    pub fn new_run_id(now: DateTime<Utc>) -> String {
        format!("run-{}-{}", now.format("%Y%m%dT%H%M%S%3f"), random_suffix())
    }

    pub fn new(project_id: impl Into<String>, ticket: Ticket, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Self::new_run_id(now),
            project_id: project_id.into(),
            ticket,
            plan: None,
            validated_plan: None,
            status: RunStatus::Pending,
            steps: Vec::new(),
            total_tokens_used: 0,
            total_cost_usd: 0.0,
            created_at: now,
            completed_at: None,
            pr_url: None,
            error: None,
        }
    }
}

fn random_suffix() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let n: u32 = rng.random();
    format!("{n:08x}")
}

/// Closed event-type vocabulary (§6).
closed_enum! {
    pub enum EventType {
        TaskCreated => "task.created",
        TaskPlanGenerated => "task.plan_generated",
        TaskPlanValidated => "task.plan_validated",
        TaskCompleted => "task.completed",
        TaskFailed => "task.failed",
        StepStarted => "step.started",
        StepCompleted => "step.completed",
        StepFailed => "step.failed",
        StepCommitted => "step.committed",
        StepReworkTriggered => "step.rework_triggered",
        AgentTokenLimitExceeded => "agent.token_limit_exceeded",
        HumanGateRequested => "human_gate.requested",
        HumanGateApproved => "human_gate.approved",
        HumanGateRejected => "human_gate.rejected",
        PrCreated => "pr.created",
        TicketUpdated => "ticket.updated",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub run_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    pub fn new(run_id: impl Into<String>, event_type: EventType, now: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            run_id: run_id.into(),
            event_type,
            timestamp: now,
            data: serde_json::Map::new(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Map<String, serde_json::Value>) -> Self {
        self.data = data;
        self
    }
}

/// Budget configuration, resolved by merging platform defaults, project
/// overrides and then any matching `set_budget` rule action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub per_agent_tokens: i64,
    pub per_task_total_tokens: i64,
    pub per_task_max_cost_usd: f64,
    pub max_rework_cycles: i32,
    pub task_timeout_minutes: i64,
    pub human_gate_timeout_hours: i64,
    pub timeout_minutes: i64,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            per_agent_tokens: 200_000,
            per_task_total_tokens: 2_000_000,
            per_task_max_cost_usd: 0.0,
            max_rework_cycles: 3,
            task_timeout_minutes: 120,
            human_gate_timeout_hours: 24,
            timeout_minutes: 30,
        }
    }
}

/// Partial overlay applied on top of a `Budget`; every field `None` means
/// "inherit from the layer beneath".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetOverride {
    pub per_agent_tokens: Option<i64>,
    pub per_task_total_tokens: Option<i64>,
    pub per_task_max_cost_usd: Option<f64>,
    pub max_rework_cycles: Option<i32>,
    pub task_timeout_minutes: Option<i64>,
    pub human_gate_timeout_hours: Option<i64>,
    pub timeout_minutes: Option<i64>,
}

impl Budget {
    pub fn merge(mut self, over: &BudgetOverride) -> Self {
        macro_rules! take {
            ($field:ident) => {
                if let Some(v) = over.$field {
                    self.$field = v;
                }
            };
        }
        take!(per_agent_tokens);
        take!(per_task_total_tokens);
        take!(per_task_max_cost_usd);
        take!(max_rework_cycles);
        take!(task_timeout_minutes);
        take!(human_gate_timeout_hours);
        take!(timeout_minutes);
        self
    }
}

/// Per-step resolved invocation parameters, threaded through to the
/// runtime. Not part of the wire data model, but shared by scheduler and
/// runtime trait.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: String,
    pub step: PlanStep,
    pub workspace_path: std::path::PathBuf,
    pub model_config: String,
    pub api_key: Option<String>,
    pub timeout_minutes: i64,
    pub token_budget: i64,
    pub resume_session_id: Option<String>,
    pub resume_reason: Option<String>,
    pub attempt: i32,
}

pub type Metadata = HashMap<String, serde_json::Value>;
