//! Background job registry for long-running tools (`reindex_vector`):
//! spawn, track, and query by an arbitrary string key (the Hub keys these
//! by `kb_id`, at most one non-terminal job per key).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a background job. Mirrors the teacher's scheduler status
/// enum; the Hub never needs `Cancelled` today but keeps it for parity
/// with a future cancel-in-flight-reindex tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Started,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// A single background job instance, keyed by the caller-chosen `key`
/// (e.g. a `kb_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub key: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    fn started(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: JobStatus::Started,
            started_at: Utc::now(),
            completed_at: None,
            result: serde_json::Value::Null,
            error: None,
        }
    }
}

/// Rejects a new job for a key that already has a non-terminal job.
#[derive(Debug, thiserror::Error)]
#[error("a job for '{key}' is already running")]
pub struct AlreadyRunning {
    pub key: String,
}

/// Tracks at most one non-terminal job per key.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a job for `key`, rejecting if one is already non-terminal.
    pub fn spawn_exclusive(&self, key: impl Into<String>) -> Result<(), AlreadyRunning> {
        let key = key.into();
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(existing) = jobs.get(&key) {
            if !existing.status.is_terminal() {
                return Err(AlreadyRunning { key });
            }
        }
        jobs.insert(key.clone(), Job::started(key));
        Ok(())
    }

    pub fn mark_processing(&self, key: &str) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(key) {
            job.status = JobStatus::Processing;
        }
    }

    pub fn complete(&self, key: &str, result: serde_json::Value) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(key) {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            job.result = result;
        }
    }

    pub fn fail(&self, key: &str, error: impl Into<String>) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(key) {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            job.error = Some(error.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<Job> {
        self.jobs.lock().unwrap().get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_then_query_reports_started() {
        let registry = JobRegistry::new();
        registry.spawn_exclusive("kb1").unwrap();
        let job = registry.get("kb1").unwrap();
        assert_eq!(job.status, JobStatus::Started);
    }

    #[test]
    fn spawning_twice_for_same_key_is_rejected_while_non_terminal() {
        let registry = JobRegistry::new();
        registry.spawn_exclusive("kb1").unwrap();
        assert!(registry.spawn_exclusive("kb1").is_err());
    }

    #[test]
    fn spawning_again_after_completion_succeeds() {
        let registry = JobRegistry::new();
        registry.spawn_exclusive("kb1").unwrap();
        registry.complete("kb1", serde_json::json!({"docs": 2}));
        assert!(registry.spawn_exclusive("kb1").is_ok());
    }

    #[test]
    fn distinct_keys_do_not_conflict() {
        let registry = JobRegistry::new();
        registry.spawn_exclusive("kb1").unwrap();
        assert!(registry.spawn_exclusive("kb2").is_ok());
    }

    #[test]
    fn fail_marks_terminal_with_error() {
        let registry = JobRegistry::new();
        registry.spawn_exclusive("kb1").unwrap();
        registry.fail("kb1", "boom");
        let job = registry.get("kb1").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }
}
