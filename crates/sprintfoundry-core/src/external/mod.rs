//! Contracts for the collaborators this specification treats as external:
//! ticket providers, version control, notifications, and the human-gate
//! rendezvous channel. Only the interface the core consumes is specified
//! here; concrete ticket/VCS/notification backends are out of scope, the
//! way the teacher's `Harness` trait specifies an interface while leaving
//! concrete CLI/container backends to their own modules.

pub mod human_gate;

use async_trait::async_trait;

use crate::model::Ticket;

#[async_trait]
pub trait TicketProvider: Send + Sync {
    async fn fetch(&self, id: &str, source: crate::model::TicketSource) -> anyhow::Result<Ticket>;
    async fn update_status(&self, ticket: &Ticket, status: &str, pr_url: Option<&str>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Git: Send + Sync {
    /// Files/directories the `commitStepCheckpoint`/`commitAndPush`
    /// implementations must exclude so bot-owned bookkeeping never leaks
    /// into history.
    const DENYLIST: &'static [&'static str] = &[
        "CLAUDE.md",
        "AGENTS.md",
        ".agent-profile.md",
        ".agent-task.md",
        ".agent-result.json",
        ".events.jsonl",
        "artifacts",
        ".codex-home",
    ]
    where
        Self: Sized;

    async fn clone_and_branch(&self, workspace_path: &std::path::Path, ticket: &Ticket) -> anyhow::Result<String>;

    /// Returns whether a checkpoint was actually committed (`false` when
    /// there was no diff — per invariant 5, the scheduler must never emit
    /// `step.committed` in that case).
    async fn commit_step_checkpoint(
        &self,
        workspace_path: &std::path::Path,
        run_id: &str,
        step_number: i64,
        agent_id: &str,
    ) -> anyhow::Result<bool>;

    async fn commit_and_push(&self, workspace_path: &std::path::Path, message: &str) -> anyhow::Result<()>;

    async fn create_pull_request(
        &self,
        workspace_path: &std::path::Path,
        run: &crate::model::TaskRun,
    ) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub run_id: String,
    pub kind: String,
    pub message: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best-effort: a send failure must never turn a successful run into a
    /// failed one.
    async fn notify(&self, event: &NotificationEvent) -> anyhow::Result<()>;
}
