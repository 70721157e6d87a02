//! `<workspace>/.sprintfoundry/sessions.json` — a small durable map from
//! `(run_id, agent, step_number, step_attempt)` to a resumable runtime
//! session id.
//!
//! Concurrent writers (parallel-group members completing at the same time)
//! must not clobber each other's records; the read-modify-write cycle is
//! serialised through a per-store mutex, the same hazard and fix the
//! teacher applies to concurrent git worktree operations.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed sessions.json: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSessionRecord {
    pub run_id: String,
    pub agent: String,
    pub step_number: i64,
    pub step_attempt: i32,
    pub session_id: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionsFile {
    version: u32,
    sessions: Vec<RuntimeSessionRecord>,
}

impl Default for SessionsFile {
    fn default() -> Self {
        Self {
            version: 1,
            sessions: Vec::new(),
        }
    }
}

pub struct RuntimeSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RuntimeSessionStore {
    pub fn new(workspace_path: &Path) -> Self {
        Self {
            path: workspace_path.join(".sprintfoundry").join("sessions.json"),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<SessionsFile, SessionStoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(SessionsFile::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, file: &SessionsFile) -> Result<(), SessionStoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(file)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Record a session, replacing any prior record for the same
    /// `(run_id, agent, step_number, step_attempt)` key.
    pub async fn record(&self, record: RuntimeSessionRecord) -> Result<(), SessionStoreError> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        file.sessions.retain(|r| {
            !(r.run_id == record.run_id
                && r.agent == record.agent
                && r.step_number == record.step_number
                && r.step_attempt == record.step_attempt)
        });
        file.sessions.push(record);
        self.write(&file).await
    }

    /// All recorded sessions, oldest first. Used by CLI inspection; the
    /// scheduler itself only ever needs `find_latest_by_agent`.
    pub async fn list_all(&self) -> Result<Vec<RuntimeSessionRecord>, SessionStoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.sessions)
    }

    /// "Latest" is by `updated_at`, then `step_number`, then `attempt`, all
    /// descending.
    pub async fn find_latest_by_agent(
        &self,
        run_id: &str,
        agent: &str,
    ) -> Result<Option<RuntimeSessionRecord>, SessionStoreError> {
        let _guard = self.lock.lock().await;
        let file = self.read().await?;
        let latest = file
            .sessions
            .into_iter()
            .filter(|r| r.run_id == run_id && r.agent == agent)
            .max_by(|a, b| {
                (a.updated_at, a.step_number, a.step_attempt).cmp(&(b.updated_at, b.step_number, b.step_attempt))
            });
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(run_id: &str, step: i64, attempt: i32, updated_at: DateTime<Utc>) -> RuntimeSessionRecord {
        RuntimeSessionRecord {
            run_id: run_id.to_string(),
            agent: "developer".to_string(),
            step_number: step,
            step_attempt: attempt,
            session_id: format!("sess-{step}-{attempt}"),
            updated_at,
        }
    }

    #[tokio::test]
    async fn records_and_finds_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeSessionStore::new(dir.path());
        let t0 = Utc::now();
        store.record(record("run-1", 1, 0, t0)).await.unwrap();
        store
            .record(record("run-1", 1, 1, t0 + chrono::Duration::seconds(5)))
            .await
            .unwrap();

        let latest = store.find_latest_by_agent("run-1", "developer").await.unwrap().unwrap();
        assert_eq!(latest.step_attempt, 1);
        assert_eq!(latest.session_id, "sess-1-1");
    }

    #[tokio::test]
    async fn replaces_record_for_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeSessionStore::new(dir.path());
        let t0 = Utc::now();
        store.record(record("run-1", 1, 0, t0)).await.unwrap();
        let mut updated = record("run-1", 1, 0, t0);
        updated.session_id = "sess-replaced".to_string();
        store.record(updated).await.unwrap();

        let file = store.read().await.unwrap();
        assert_eq!(file.sessions.len(), 1);
        assert_eq!(file.sessions[0].session_id, "sess-replaced");
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeSessionStore::new(dir.path());
        assert!(store.find_latest_by_agent("run-1", "developer").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_all_returns_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeSessionStore::new(dir.path());
        let t0 = Utc::now();
        store.record(record("run-1", 1, 0, t0)).await.unwrap();
        store.record(record("run-2", 2, 0, t0)).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_records_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(RuntimeSessionStore::new(dir.path()));
        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.record(record("run-1", i, 0, Utc::now())).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let file = store.read().await.unwrap();
        assert_eq!(file.sessions.len(), 10);
    }
}
