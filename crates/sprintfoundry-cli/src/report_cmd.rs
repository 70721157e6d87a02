//! `sprintfoundry report` command: summarise a run's event log -- duration,
//! step outcomes, and rework/gate activity -- from `.events.jsonl` alone.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use sprintfoundry_core::EventStore;
use sprintfoundry_core::model::EventType;

pub async fn run_report(workspace: &Path, run_id: &str) -> Result<()> {
    let log_path = workspace.join(".events.jsonl");
    let store = EventStore::new();
    store.load_from_file(&log_path).await.context("failed to load event log")?;

    let events = store.get_by_run_id(run_id);
    if events.is_empty() {
        anyhow::bail!("no events found for run {run_id} in {}", log_path.display());
    }

    let mut sorted = events;
    sorted.sort_by_key(|e| e.timestamp);

    let first = sorted.first().unwrap();
    let last = sorted.last().unwrap();
    let duration = last.timestamp - first.timestamp;

    println!("Run: {run_id}");
    println!("Started:  {}", first.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Last event: {}", last.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Elapsed:  {}m {}s", duration.num_seconds() / 60, duration.num_seconds() % 60);
    println!(
        "Outcome:  {}",
        if sorted.iter().any(|e| e.event_type == EventType::TaskCompleted) {
            "completed"
        } else if sorted.iter().any(|e| e.event_type == EventType::TaskFailed) {
            "failed"
        } else {
            "in progress"
        }
    );
    println!();

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for event in &sorted {
        *counts.entry(event.event_type.to_string()).or_default() += 1;
    }

    println!("Event counts:");
    for (kind, count) in &counts {
        println!("  {kind:<28} {count}");
    }

    let rework_count = sorted.iter().filter(|e| e.event_type == EventType::StepReworkTriggered).count();
    let gate_requests = sorted.iter().filter(|e| e.event_type == EventType::HumanGateRequested).count();
    println!();
    println!("Rework cycles triggered: {rework_count}");
    println!("Human gates requested:   {gate_requests}");

    Ok(())
}
