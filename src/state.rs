//! AlarmState persistence
//!
//! The whole state table is loaded at startup and rewritten on every
//! transition as a single JSON document, via a temp file and rename so a
//! crash mid-write never leaves a torn file. This is what keeps a restart
//! from re-firing alarms that are already in breach within their cooldown.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{AlarmId, AlarmState};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state file i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    schema_version: u32,
    #[serde(default)]
    alarms: HashMap<AlarmId, AlarmState>,
}

/// File-backed alarm state table
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full state table. A missing file is a fresh start, not an
    /// error.
    pub fn load_all(&self) -> Result<HashMap<AlarmId, AlarmState>, StateError> {
        if !self.path.is_file() {
            return Ok(HashMap::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        let document: StateDocument = serde_json::from_str(&text)?;
        Ok(document.alarms)
    }

    /// Write the full state table atomically
    pub fn persist(&self, alarms: &HashMap<AlarmId, AlarmState>) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let document = StateDocument {
            schema_version: 1,
            alarms: alarms.clone(),
        };
        let data = serde_json::to_vec_pretty(&document)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Persist with bounded backoff. On final failure the caller keeps
    /// going: the notification was already sent in-memory, the next cycle
    /// re-detects the condition.
    pub async fn persist_with_retry(
        &self,
        alarms: &HashMap<AlarmId, AlarmState>,
    ) -> Result<(), StateError> {
        let mut delay = RETRY_BASE_DELAY;
        let mut last_error = None;

        for attempt in 1..=RETRY_ATTEMPTS {
            match self.persist(alarms) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        attempt,
                        error = %e,
                        "state write failed"
                    );
                    last_error = Some(e);
                }
            }
            if attempt < RETRY_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            StateError::Io(std::io::Error::other("state write failed with no error"))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlarmStatus;
    use chrono::Utc;

    fn alarmed_state() -> AlarmState {
        AlarmState {
            status: AlarmStatus::Alarmed,
            last_transition_at: Some(Utc::now()),
            last_notified_at: Some(Utc::now()),
            clear_streak: 0,
        }
    }

    #[test]
    fn test_persist_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let mut table = HashMap::new();
        table.insert("a1".to_string(), alarmed_state());
        store.persist(&table).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["a1"].status, AlarmStatus::Alarmed);
        assert!(loaded["a1"].last_notified_at.is_some());
    }

    #[test]
    fn test_missing_file_is_fresh_start() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("never-written.json"));
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_persist_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("nested/deeper/state.json"));
        store.persist(&HashMap::new()).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_bounded_attempts() {
        let dir = tempfile::TempDir::new().unwrap();
        // Parent "directory" is a plain file, so every write attempt fails.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let store = StateStore::new(blocker.join("state.json"));

        let result = store.persist_with_retry(&HashMap::new()).await;
        assert!(matches!(result, Err(StateError::Io(_))));
    }

    #[tokio::test]
    async fn test_retry_succeeds_immediately_on_healthy_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        store.persist_with_retry(&HashMap::new()).await.unwrap();
        assert!(store.path().is_file());
    }
}
