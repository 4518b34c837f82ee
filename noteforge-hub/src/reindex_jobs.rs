//! Keeps the Hub's `ReindexJob` bookkeeping per `kb_id`.
//!
//! Shaped like `noteforge_mcp::hub::jobs::JobRegistry`'s at-most-one-
//! non-terminal-job-per-key rule, but keyed directly to
//! `noteforge_core::types::ReindexJob` rather than the registry's own `Job`
//! type, so `get_reindex_status` can hand back exactly the shape
//! `noteforge_core::reindex::ReindexBackend` parses, with no translation
//! layer between two differently-shaped job records.

use std::collections::HashMap;
use std::sync::Mutex;

use noteforge_core::types::{ReindexJob, ReindexStats};

#[derive(Debug, thiserror::Error)]
#[error("a reindex for '{kb_id}' is already running")]
pub struct AlreadyRunning {
    pub kb_id: String,
}

#[derive(Default)]
pub struct ReindexJobs {
    jobs: Mutex<HashMap<String, ReindexJob>>,
}

impl ReindexJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a job for `kb_id`, rejecting while a non-terminal one exists
    /// for the same key (per the spec's state machine, `force` affects how
    /// the reindex runs, not whether a second one may start).
    pub fn spawn_exclusive(&self, kb_id: &str) -> Result<(), AlreadyRunning> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(existing) = jobs.get(kb_id) {
            if !existing.status.is_terminal() {
                return Err(AlreadyRunning {
                    kb_id: kb_id.to_string(),
                });
            }
        }
        jobs.insert(kb_id.to_string(), ReindexJob::started(kb_id));
        Ok(())
    }

    pub fn mark_processing(&self, kb_id: &str) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(kb_id) {
            job.mark_processing();
        }
    }

    pub fn complete(&self, kb_id: &str, stats: ReindexStats) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(kb_id) {
            job.mark_completed(stats);
        }
    }

    pub fn fail(&self, kb_id: &str, message: impl Into<String>) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(kb_id) {
            job.mark_failed(message);
        }
    }

    pub fn get(&self, kb_id: &str) -> Option<ReindexJob> {
        self.jobs.lock().unwrap().get(kb_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noteforge_core::types::ReindexStatus;

    #[test]
    fn spawn_then_get_reports_started() {
        let jobs = ReindexJobs::new();
        jobs.spawn_exclusive("u1:kb").unwrap();
        let job = jobs.get("u1:kb").unwrap();
        assert_eq!(job.status, ReindexStatus::Started);
    }

    #[test]
    fn spawning_twice_while_non_terminal_is_rejected() {
        let jobs = ReindexJobs::new();
        jobs.spawn_exclusive("u1:kb").unwrap();
        assert!(jobs.spawn_exclusive("u1:kb").is_err());
    }

    #[test]
    fn spawning_again_after_completion_succeeds() {
        let jobs = ReindexJobs::new();
        jobs.spawn_exclusive("u1:kb").unwrap();
        jobs.complete("u1:kb", ReindexStats::default());
        assert!(jobs.spawn_exclusive("u1:kb").is_ok());
    }

    #[test]
    fn fail_marks_terminal_with_message() {
        let jobs = ReindexJobs::new();
        jobs.spawn_exclusive("u1:kb").unwrap();
        jobs.fail("u1:kb", "embeddings server unreachable");
        let job = jobs.get("u1:kb").unwrap();
        assert_eq!(job.status, ReindexStatus::Failed);
        assert_eq!(job.message, "embeddings server unreachable");
    }

    #[test]
    fn unknown_kb_id_returns_none() {
        let jobs = ReindexJobs::new();
        assert!(jobs.get("missing").is_none());
    }
}
