//! Git commit/push/pull plumbing (C3) used after a KB file changes.
//!
//! `commit` goes through `git2` directly; `push`/`pull` shell out to the
//! `git` binary so a resolved credential URL is only ever passed as a
//! subprocess argument and the repository's own `origin` remote stays
//! credential-free.

use std::path::Path;

use chrono::Utc;
use tokio::process::Command;
use tracing::info;

use crate::credentials::{mask_secrets, CredentialsStore};
use crate::error::GitOpError;
use crate::event_bus::EventBus;
use crate::types::{GitPlatform, KbChangeEvent};

/// Resolves the credential used for a push/pull: per-user token first,
/// then a configured global fallback, then none (anonymous/public repo).
pub struct CredentialResolver<'a> {
    pub store: &'a CredentialsStore,
    pub global_fallback: Option<(&'a str, &'a str)>,
}

impl<'a> CredentialResolver<'a> {
    pub fn resolve(&self, user_id: i64, platform: GitPlatform) -> Option<(String, String)> {
        if let Ok((username, token)) = self.store.get_token(user_id, platform) {
            return Some((username, token));
        }
        self.global_fallback
            .map(|(u, t)| (u.to_string(), t.to_string()))
    }
}

/// Commit, push, and pull operations against a single KB's local checkout.
pub struct GitOperations {
    event_bus: EventBus,
}

impl GitOperations {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }

    /// Stage every change under `repo_path` and commit with `message`.
    /// No-ops (returns `Ok(None)`) when there is nothing to commit.
    pub fn commit(
        &self,
        repo_path: &Path,
        message: &str,
        user_id: Option<i64>,
    ) -> Result<Option<git2::Oid>, GitOpError> {
        let repo = git2::Repository::open(repo_path)
            .map_err(|e| GitOpError::Other { message: e.message().to_string() })?;

        let mut index = repo
            .index()
            .map_err(|e| GitOpError::Other { message: e.message().to_string() })?;
        index
            .add_all(["*"], git2::IndexAddOption::DEFAULT, None)
            .map_err(|e| GitOpError::Other { message: e.message().to_string() })?;
        index
            .write()
            .map_err(|e| GitOpError::Other { message: e.message().to_string() })?;

        let tree_oid = index
            .write_tree()
            .map_err(|e| GitOpError::Other { message: e.message().to_string() })?;
        let tree = repo
            .find_tree(tree_oid)
            .map_err(|e| GitOpError::Other { message: e.message().to_string() })?;

        let head = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        if let Some(parent) = &head {
            if parent.tree_id() == tree_oid {
                return Ok(None);
            }
        }

        let signature = git2::Signature::now("Noteforge", "noteforge@localhost")
            .map_err(|e| GitOpError::Other { message: e.message().to_string() })?;

        let parents: Vec<&git2::Commit> = head.as_ref().into_iter().collect();
        let oid = repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .map_err(|e| GitOpError::classify(&e.message().to_string(), &mask_secrets))?;

        self.event_bus.publish(KbChangeEvent::GitCommit {
            user_id,
            source: "git_ops".into(),
            ts: Utc::now(),
        });
        info!(commit = %oid, "kb change committed");
        Ok(Some(oid))
    }

    /// Push `HEAD` to `branch` on `remote_url`, authenticated via
    /// `credentials` when present.
    pub async fn push(
        &self,
        repo_path: &Path,
        remote_url: &str,
        branch: &str,
        credentials: Option<(&str, &str)>,
        user_id: Option<i64>,
    ) -> Result<(), GitOpError> {
        let push_url = build_auth_url(remote_url, credentials);
        let output = Command::new("git")
            .current_dir(repo_path)
            .arg("push")
            .arg(&push_url)
            .arg(format!("HEAD:{branch}"))
            .output()
            .await
            .map_err(|e| GitOpError::Other { message: e.to_string() })?;

        if !output.status.success() {
            let raw = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(GitOpError::classify(&raw, &mask_secrets));
        }

        self.event_bus.publish(KbChangeEvent::GitPush {
            user_id,
            source: "git_ops".into(),
            ts: Utc::now(),
        });
        Ok(())
    }

    /// Pull `branch` from `remote_url`, authenticated via `credentials`
    /// when present.
    pub async fn pull(
        &self,
        repo_path: &Path,
        remote_url: &str,
        branch: &str,
        credentials: Option<(&str, &str)>,
        user_id: Option<i64>,
    ) -> Result<(), GitOpError> {
        let pull_url = build_auth_url(remote_url, credentials);
        let output = Command::new("git")
            .current_dir(repo_path)
            .arg("pull")
            .arg(&pull_url)
            .arg(branch)
            .output()
            .await
            .map_err(|e| GitOpError::Other { message: e.to_string() })?;

        if !output.status.success() {
            let raw = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(GitOpError::classify(&raw, &mask_secrets));
        }

        self.event_bus.publish(KbChangeEvent::GitPull {
            user_id,
            source: "git_ops".into(),
            ts: Utc::now(),
        });
        Ok(())
    }

    /// Convenience combining `commit` and `push`, used by the note service
    /// after a successful agent run. Swallows a `None` commit (nothing
    /// changed) without attempting a push.
    pub async fn auto_commit_and_push(
        &self,
        repo_path: &Path,
        message: &str,
        remote_url: Option<&str>,
        branch: &str,
        credentials: Option<(&str, &str)>,
        user_id: Option<i64>,
    ) -> Result<(), GitOpError> {
        let committed = self.commit(repo_path, message, user_id)?;
        if committed.is_none() {
            return Ok(());
        }
        if let Some(remote_url) = remote_url {
            self.push(repo_path, remote_url, branch, credentials, user_id)
                .await?;
        }
        Ok(())
    }
}

fn build_auth_url(remote_url: &str, credentials: Option<(&str, &str)>) -> String {
    match (remote_url.strip_prefix("https://"), credentials) {
        (Some(rest), Some((username, token))) => format!("https://{username}:{token}@{rest}"),
        _ => remote_url.to_string(),
    }
}
