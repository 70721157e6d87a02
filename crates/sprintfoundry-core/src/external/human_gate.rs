//! `HumanGateChannel`: the filesystem rendezvous described in §4.6.1, behind
//! an interface so tests can swap in an in-memory implementation (§9 Design
//! Notes: "Filesystem-based human rendezvous -> an interface
//! `HumanGateChannel.await(review) -> decision` with the filesystem
//! implementation as the default").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::HumanReview;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecisionStatus {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub status: ReviewDecisionStatus,
    #[serde(default)]
    pub reviewer_feedback: Option<String>,
}

impl ReviewDecision {
    pub fn timed_out() -> Self {
        Self {
            status: ReviewDecisionStatus::Rejected,
            reviewer_feedback: Some("Human review timed out".to_string()),
        }
    }
}

#[async_trait]
pub trait HumanGateChannel: Send + Sync {
    /// Materialise the pending review so an external operator can see it.
    async fn request(&self, review: &HumanReview) -> anyhow::Result<()>;

    /// Block (cooperatively) until a decision is observed or `timeout`
    /// elapses. On timeout, resolves to a rejected decision with feedback
    /// `"Human review timed out"` -- the channel itself never errors on
    /// timeout, matching §4.6.1.
    async fn await_decision(&self, review_id: Uuid, timeout: Duration) -> anyhow::Result<ReviewDecision>;
}

/// Default implementation: writes `<review_id>.pending.json` under
/// `<workspace>/.sprintfoundry/reviews/`, polls for
/// `<review_id>.decision.json` every second, and removes the pending file
/// once a decision is observed (success or timeout).
pub struct FsHumanGateChannel {
    reviews_dir: PathBuf,
    poll_interval: Duration,
}

impl FsHumanGateChannel {
    pub fn new(workspace_path: &Path) -> Self {
        Self {
            reviews_dir: workspace_path.join(".sprintfoundry").join("reviews"),
            poll_interval: Duration::from_secs(1),
        }
    }

    fn pending_path(&self, review_id: Uuid) -> PathBuf {
        self.reviews_dir.join(format!("{review_id}.pending.json"))
    }

    fn decision_path(&self, review_id: Uuid) -> PathBuf {
        self.reviews_dir.join(format!("{review_id}.decision.json"))
    }
}

#[async_trait]
impl HumanGateChannel for FsHumanGateChannel {
    async fn request(&self, review: &HumanReview) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.reviews_dir).await?;
        let body = serde_json::to_string_pretty(review)?;
        tokio::fs::write(self.pending_path(review.review_id), body).await?;
        Ok(())
    }

    async fn await_decision(&self, review_id: Uuid, timeout: Duration) -> anyhow::Result<ReviewDecision> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let path = self.decision_path(review_id);
            if let Ok(content) = tokio::fs::read_to_string(&path).await {
                let decision: ReviewDecision = serde_json::from_str(&content)?;
                let _ = tokio::fs::remove_file(self.pending_path(review_id)).await;
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(decision);
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = tokio::fs::remove_file(self.pending_path(review_id)).await;
                return Ok(ReviewDecision::timed_out());
            }
            tokio::time::sleep(self.poll_interval.min(deadline - tokio::time::Instant::now())).await;
        }
    }
}

/// In-memory implementation for tests: decisions are injected directly
/// rather than written to disk.
#[derive(Default)]
pub struct MemoryHumanGateChannel {
    decisions: Mutex<HashMap<Uuid, ReviewDecision>>,
    requested: Mutex<Vec<Uuid>>,
}

impl MemoryHumanGateChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, review_id: Uuid, decision: ReviewDecision) {
        self.decisions.lock().expect("poisoned").insert(review_id, decision);
    }

    pub fn requested_reviews(&self) -> Vec<Uuid> {
        self.requested.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl HumanGateChannel for MemoryHumanGateChannel {
    async fn request(&self, review: &HumanReview) -> anyhow::Result<()> {
        self.requested.lock().expect("poisoned").push(review.review_id);
        Ok(())
    }

    async fn await_decision(&self, review_id: Uuid, timeout: Duration) -> anyhow::Result<ReviewDecision> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(decision) = self.decisions.lock().expect("poisoned").remove(&review_id) {
                return Ok(decision);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(ReviewDecision::timed_out());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
