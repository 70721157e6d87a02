//! `sprintfoundry gate` command: list and resolve pending human review gates
//! filed by a running scheduler under `<workspace>/.sprintfoundry/reviews/`.

use anyhow::{Context, Result};
use uuid::Uuid;

use sprintfoundry_core::external::human_gate::{ReviewDecision, ReviewDecisionStatus};
use sprintfoundry_core::model::HumanReview;

use crate::GateCommands;

pub async fn run_gate_command(command: GateCommands, workspace: &std::path::Path) -> Result<()> {
    match command {
        GateCommands::List => cmd_list(workspace).await,
        GateCommands::Approve { review_id, feedback } => cmd_decide(workspace, &review_id, ReviewDecisionStatus::Approved, feedback).await,
        GateCommands::Reject { review_id, feedback } => cmd_decide(workspace, &review_id, ReviewDecisionStatus::Rejected, feedback).await,
    }
}

fn reviews_dir(workspace: &std::path::Path) -> std::path::PathBuf {
    workspace.join(".sprintfoundry").join("reviews")
}

async fn cmd_list(workspace: &std::path::Path) -> Result<()> {
    let dir = reviews_dir(workspace);
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            println!("No pending reviews (no reviews directory yet).");
            return Ok(());
        }
        Err(err) => return Err(err).with_context(|| format!("failed to read {}", dir.display())),
    };

    let mut pending = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.ends_with(".pending.json") {
            continue;
        }
        let content = tokio::fs::read_to_string(entry.path()).await?;
        let review: HumanReview = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", entry.path().display()))?;
        pending.push(review);
    }

    if pending.is_empty() {
        println!("No pending reviews.");
        return Ok(());
    }

    pending.sort_by_key(|r| r.after_step);
    println!("Pending reviews ({}):", pending.len());
    for review in &pending {
        println!(
            "  [{}] after step {}: {}",
            review.review_id, review.after_step, review.summary
        );
        for artifact in &review.artifacts_to_review {
            println!("      - {artifact}");
        }
    }
    Ok(())
}

async fn cmd_decide(
    workspace: &std::path::Path,
    review_id: &str,
    status: ReviewDecisionStatus,
    feedback: Option<String>,
) -> Result<()> {
    let review_id = Uuid::parse_str(review_id).with_context(|| format!("invalid review id: {review_id}"))?;
    let dir = reviews_dir(workspace);
    let pending_path = dir.join(format!("{review_id}.pending.json"));
    if !pending_path.exists() {
        anyhow::bail!("no pending review {review_id} found under {}", dir.display());
    }

    let decision = ReviewDecision {
        status,
        reviewer_feedback: feedback,
    };
    let decision_path = dir.join(format!("{review_id}.decision.json"));
    tokio::fs::write(&decision_path, serde_json::to_string_pretty(&decision)?).await?;

    println!("Recorded decision {:?} for review {review_id}.", decision.status);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprintfoundry_core::model::ReviewStatus;

    fn review(review_id: Uuid) -> HumanReview {
        HumanReview {
            review_id,
            run_id: "run-1".to_string(),
            after_step: 2,
            status: ReviewStatus::Pending,
            summary: "release sign-off".to_string(),
            artifacts_to_review: vec!["src/main.rs".to_string()],
            reviewer_feedback: None,
            decided_at: None,
        }
    }

    #[tokio::test]
    async fn list_reports_no_reviews_when_directory_missing() {
        let dir = tempfile::tempdir().unwrap();
        cmd_list(dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn approve_writes_decision_file() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path();
        let review_id = Uuid::new_v4();
        let reviews = reviews_dir(workspace);
        tokio::fs::create_dir_all(&reviews).await.unwrap();
        tokio::fs::write(
            reviews.join(format!("{review_id}.pending.json")),
            serde_json::to_string(&review(review_id)).unwrap(),
        )
        .await
        .unwrap();

        cmd_list(workspace).await.unwrap();
        cmd_decide(workspace, &review_id.to_string(), ReviewDecisionStatus::Approved, Some("lgtm".to_string()))
            .await
            .unwrap();

        let decision_path = reviews.join(format!("{review_id}.decision.json"));
        let content = tokio::fs::read_to_string(&decision_path).await.unwrap();
        let decision: ReviewDecision = serde_json::from_str(&content).unwrap();
        assert_eq!(decision.status, ReviewDecisionStatus::Approved);
        assert_eq!(decision.reviewer_feedback.as_deref(), Some("lgtm"));
    }

    #[tokio::test]
    async fn decide_rejects_unknown_review() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_decide(dir.path(), &Uuid::new_v4().to_string(), ReviewDecisionStatus::Rejected, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no pending review"));
    }
}
