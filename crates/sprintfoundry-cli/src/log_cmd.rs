//! `sprintfoundry events` command: show the append-only event log for a
//! workspace, optionally filtered by run id or event type.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};

use sprintfoundry_core::EventStore;
use sprintfoundry_core::model::EventType;

/// Run the events command.
pub async fn run_events_show(workspace: &Path, run_id: Option<&str>, event_type: Option<&str>) -> Result<()> {
    let log_path = workspace.join(".events.jsonl");
    let store = EventStore::new();
    store.load_from_file(&log_path).await.context("failed to load event log")?;

    let mut events = store.get_all();
    if let Some(run_id) = run_id {
        events.retain(|e| e.run_id == run_id);
    }
    if let Some(type_str) = event_type {
        let wanted = EventType::from_str(type_str).with_context(|| format!("unrecognized event type: {type_str}"))?;
        events.retain(|e| e.event_type == wanted);
    }
    events.sort_by_key(|e| e.timestamp);

    if events.is_empty() {
        println!("No events recorded in {}.", log_path.display());
        return Ok(());
    }

    println!("Events ({}):", events.len());
    for event in &events {
        let time = event.timestamp.format("%H:%M:%S%.3f");
        let data = if event.data.is_empty() {
            String::new()
        } else {
            format!(" {}", serde_json::Value::Object(event.data.clone()))
        };
        println!("  [{time}] {} {}{}", event.run_id, event.event_type, data);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprintfoundry_core::model::Event;
    use sprintfoundry_test_utils::now;

    async fn seed_log(dir: &Path) {
        let store = EventStore::new();
        store.initialize(dir, None).unwrap();
        store.store(Event::new("run-1", EventType::TaskCreated, now())).await.unwrap();
        store.store(Event::new("run-1", EventType::TaskCompleted, now())).await.unwrap();
        store.store(Event::new("run-2", EventType::TaskCreated, now())).await.unwrap();
    }

    #[tokio::test]
    async fn shows_all_events_unfiltered() {
        let dir = tempfile::tempdir().unwrap();
        seed_log(dir.path()).await;
        run_events_show(dir.path(), None, None).await.unwrap();
    }

    #[tokio::test]
    async fn filters_by_run_id() {
        let dir = tempfile::tempdir().unwrap();
        seed_log(dir.path()).await;

        let store = EventStore::new();
        store.load_from_file(&dir.path().join(".events.jsonl")).await.unwrap();
        assert_eq!(store.get_by_run_id("run-1").len(), 2);
        assert_eq!(store.get_by_run_id("run-2").len(), 1);

        run_events_show(dir.path(), Some("run-1"), None).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_unrecognized_event_type() {
        let dir = tempfile::tempdir().unwrap();
        seed_log(dir.path()).await;
        let err = run_events_show(dir.path(), None, Some("not.a.real.type")).await.unwrap_err();
        assert!(err.to_string().contains("unrecognized event type"));
    }

    #[tokio::test]
    async fn handles_missing_log_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        run_events_show(dir.path(), None, None).await.unwrap();
    }
}
