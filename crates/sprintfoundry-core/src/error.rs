//! The error taxonomy consumed at the `handleTask` boundary.
//!
//! Each library-facing component returns a typed error; the orchestrator
//! folds all of them into `anyhow::Error` when it narrates a failed run.

use thiserror::Error;

/// Configuration problems discovered before any step executes.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing API key for runtime {runtime:?}")]
    MissingApiKey { runtime: String },
    #[error("no agent catalog available and no default mapping for role {role:?}")]
    MissingCatalogEntry { role: String },
}

/// The planner returned something the orchestrator cannot use.
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("planner produced a malformed plan: {message}\nfirst output: {excerpt:?}")]
    MalformedPlan { message: String, excerpt: String },
}

/// Structural/semantic plan validation failures. Always fail the run before
/// execution starts.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ValidationError {
    #[error("duplicate step_number: {0}")]
    DuplicateStepNumber(i64),
    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: i64, dependency: i64 },
    #[error("dependency cycle detected involving steps: {0:?}")]
    CycleDetected(Vec<i64>),
    #[error("no agent available for role {role:?} and no catalog override")]
    NoAgentForRole { role: String },
}

/// Budget/timeout/registry preflight violations.
#[derive(Debug, Error)]
pub enum PreflightViolation {
    #[error("per-task token budget exceeded: used {used} >= budget {budget}")]
    TokenBudgetExceeded { used: i64, budget: i64 },
    #[error("per-task cost budget exceeded: used {used} >= budget {budget}")]
    CostBudgetExceeded { used: f64, budget: f64 },
    #[error("task wall-clock timeout exceeded ({minutes} minutes)")]
    TaskTimeoutExceeded { minutes: i64 },
    #[error("npm registry {registry:?} unreachable: {source}")]
    RegistryUnreachable {
        registry: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures surfaced by an `AgentRuntime` invocation.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("agent runtime timed out after {minutes} minutes")]
    TimedOut { minutes: i64 },
    #[error("agent runtime crashed: {0}")]
    Crashed(String),
    #[error("agent reported status={status:?}: {summary}")]
    Reported { status: String, summary: String },
}

/// A step exhausted its rework budget.
#[derive(Debug, Error)]
#[error("step {step_number} exceeded max_rework_cycles ({max})")]
pub struct ReworkOverflow {
    pub step_number: i64,
    pub max: i32,
}

/// A git checkpoint failed after a step reported `complete`.
#[derive(Debug, Error)]
#[error("failed to commit checkpoint for step {step_number}: {message}")]
pub struct PersistenceError {
    pub step_number: i64,
    pub message: String,
}

/// Human review was rejected or timed out.
#[derive(Debug, Error)]
pub enum HumanReviewError {
    #[error("human review rejected: {feedback:?}")]
    Rejected { feedback: Option<String> },
    #[error("human review timed out")]
    TimedOut,
}

/// Top-level reasons a run fails, narrated into `TaskRun.error` and the
/// final `task.failed` event.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Planning(#[from] PlanningError),
    #[error("plan validation failed: {0:?}")]
    Validation(Vec<ValidationError>),
    #[error(transparent)]
    Preflight(#[from] PreflightViolation),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Rework(#[from] ReworkOverflow),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    HumanReview(#[from] HumanReviewError),
    #[error("Deadlock: no executable steps remaining")]
    Deadlock,
    #[error("{0}")]
    Other(String),
}
