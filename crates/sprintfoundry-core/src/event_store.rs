//! Append-only narration of every state change in a run.
//!
//! Grounded in the teacher's event/query split (`gator_db::queries` reads
//! over an append-only table) but backed by an in-memory buffer plus a
//! JSON-lines file under the workspace, since the core keeps no database.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::io::AsyncWriteExt;

use crate::model::{Event, EventType};

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("event store already closed")]
    Closed,
    #[error("event store already initialized for a different path")]
    AlreadyInitialized,
    #[error("io error writing event log: {0}")]
    Io(#[from] std::io::Error),
}

struct Inner {
    events: Vec<Event>,
    file_path: Option<PathBuf>,
    global_path: Option<PathBuf>,
    closed: bool,
}

/// Durable, totally-ordered (within a run) event log.
///
/// A single `EventStore` instance is constructed per run. `store` is safe
/// to call concurrently; writes serialise through an internal mutex so
/// ordering within the run is preserved even when parallel-group members
/// report events from separate tasks.
pub struct EventStore {
    inner: Mutex<Inner>,
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: Vec::new(),
                file_path: None,
                global_path: None,
                closed: false,
            }),
        }
    }

    /// Idempotent. Must be called **after** the workspace has been
    /// populated by git clone — creating `.events.jsonl` first makes the
    /// clone target non-empty and the clone fails.
    pub fn initialize(&self, workspace_path: &Path, global_log_dir: Option<&Path>) -> Result<(), EventStoreError> {
        let mut inner = self.inner.lock().expect("event store mutex poisoned");
        let target = workspace_path.join(".events.jsonl");
        match &inner.file_path {
            Some(existing) if existing == &target => return Ok(()),
            Some(_) => return Err(EventStoreError::AlreadyInitialized),
            None => {}
        }
        inner.file_path = Some(target);
        inner.global_path = global_log_dir.map(|d| d.join("events.jsonl"));
        Ok(())
    }

    /// Append to the in-memory buffer and, if initialized, to the per-run
    /// file and optional global log. Write errors are logged but never
    /// fail the run.
    pub async fn store(&self, event: Event) -> Result<(), EventStoreError> {
        let (line, file_path, global_path) = {
            let mut inner = self.inner.lock().expect("event store mutex poisoned");
            if inner.closed {
                return Err(EventStoreError::Closed);
            }
            let line = serde_json::to_string(&event).expect("Event always serialises");
            inner.events.push(event);
            (line, inner.file_path.clone(), inner.global_path.clone())
        };

        if let Some(path) = file_path {
            if let Err(err) = append_line(&path, &line).await {
                tracing::warn!(error = %err, path = %path.display(), "failed to append event to run log");
            }
        }
        if let Some(path) = global_path {
            if let Err(err) = append_line(&path, &line).await {
                tracing::warn!(error = %err, path = %path.display(), "failed to append event to global log");
            }
        }
        Ok(())
    }

    pub fn get_all(&self) -> Vec<Event> {
        self.inner.lock().expect("event store mutex poisoned").events.clone()
    }

    pub fn get_by_run_id(&self, run_id: &str) -> Vec<Event> {
        self.inner
            .lock()
            .expect("event store mutex poisoned")
            .events
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    pub fn get_by_type(&self, event_type: EventType) -> Vec<Event> {
        self.inner
            .lock()
            .expect("event store mutex poisoned")
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Parse a JSONL file and seed the buffer. Non-JSON lines (partial
    /// writes from a crash) are skipped rather than treated as errors.
    pub async fn load_from_file(&self, path: &Path) -> Result<(), EventStoreError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let mut loaded = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) => loaded.push(event),
                Err(err) => tracing::debug!(error = %err, "skipping unparseable event log line"),
            }
        }
        let mut inner = self.inner.lock().expect("event store mutex poisoned");
        inner.events.extend(loaded);
        Ok(())
    }

    /// Flush and mark closed; further `store` calls return `Closed`.
    pub fn close(&self) {
        self.inner.lock().expect("event store mutex poisoned").closed = true;
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn append_line(path: &Path, line: &str) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(run_id: &str, ty: EventType) -> Event {
        Event::new(run_id, ty, Utc::now())
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new();
        store.initialize(dir.path(), None).unwrap();
        store.initialize(dir.path(), None).unwrap();
    }

    #[tokio::test]
    async fn store_writes_to_file_and_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new();
        store.initialize(dir.path(), None).unwrap();
        store.store(event("run-1", EventType::TaskCreated)).await.unwrap();
        store.store(event("run-1", EventType::TaskCompleted)).await.unwrap();

        assert_eq!(store.get_all().len(), 2);
        let on_disk = tokio::fs::read_to_string(dir.path().join(".events.jsonl")).await.unwrap();
        assert_eq!(on_disk.lines().count(), 2);
    }

    #[tokio::test]
    async fn round_trips_through_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new();
        store.initialize(dir.path(), None).unwrap();
        for _ in 0..5 {
            store.store(event("run-1", EventType::StepStarted)).await.unwrap();
        }
        let ids: Vec<_> = store.get_all().iter().map(|e| e.event_id).collect();

        let reloaded = EventStore::new();
        reloaded.load_from_file(&dir.path().join(".events.jsonl")).await.unwrap();
        let reloaded_ids: Vec<_> = reloaded.get_all().iter().map(|e| e.event_id).collect();
        assert_eq!(ids, reloaded_ids);
    }

    #[tokio::test]
    async fn load_from_file_skips_partial_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".events.jsonl");
        let good = event("run-1", EventType::TaskCreated);
        let content = format!("{}\nnot json at all\n", serde_json::to_string(&good).unwrap());
        tokio::fs::write(&path, content).await.unwrap();

        let store = EventStore::new();
        store.load_from_file(&path).await.unwrap();
        assert_eq!(store.get_all().len(), 1);
    }

    #[tokio::test]
    async fn store_after_close_errors() {
        let store = EventStore::new();
        store.close();
        let err = store.store(event("run-1", EventType::TaskCreated)).await.unwrap_err();
        assert!(matches!(err, EventStoreError::Closed));
    }

    #[tokio::test]
    async fn filters_by_run_id_and_type() {
        let store = EventStore::new();
        store.store(event("run-1", EventType::TaskCreated)).await.unwrap();
        store.store(event("run-2", EventType::TaskCreated)).await.unwrap();
        store.store(event("run-1", EventType::TaskCompleted)).await.unwrap();

        assert_eq!(store.get_by_run_id("run-1").len(), 2);
        assert_eq!(store.get_by_type(EventType::TaskCreated).len(), 2);
    }
}
