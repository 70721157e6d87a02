//! `sprintfoundry sessions` command: inspect the resumable-runtime session
//! records a workspace has accumulated, for debugging resume behaviour.

use std::path::Path;

use anyhow::Result;

use sprintfoundry_core::session_store::RuntimeSessionStore;

/// Run the sessions command, optionally filtered to one agent.
pub async fn run_sessions_show(workspace: &Path, agent: Option<&str>) -> Result<()> {
    let store = RuntimeSessionStore::new(workspace);
    let mut records = store.list_all().await?;
    if let Some(agent) = agent {
        records.retain(|r| r.agent == agent);
    }

    if records.is_empty() {
        println!("No recorded sessions.");
        return Ok(());
    }

    records.sort_by_key(|r| (r.run_id.clone(), r.agent.clone(), r.step_number, r.step_attempt));
    println!("Sessions ({}):", records.len());
    for r in &records {
        println!(
            "  {} / {} / step {} attempt {}: {} (updated {})",
            r.run_id,
            r.agent,
            r.step_number,
            r.step_attempt,
            r.session_id,
            r.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}
