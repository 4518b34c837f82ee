//! Error types for the Noteforge core library.
//!
//! Uses `thiserror` for structured domain error variants covering
//! configuration, authentication, transport, storage, tool, and agent
//! failures. `CoreError` is the umbrella type most callers propagate with
//! `?`; individual subsystems expose their own narrower error enum that
//! converts into it via `#[from]`.

use std::path::PathBuf;

/// Top-level error type for the Noteforge core library.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("transient transport error: {0}")]
    Transport(#[from] TransientTransportError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("credential error: {0}")]
    Credential(#[from] crate::credentials::CredentialError),

    #[error("git error: {0}")]
    Git(#[from] GitOpError),

    #[error("repository error: {0}")]
    Repo(#[from] RepoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors surfaced at startup or on settings mutation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("configuration parse error: {message}")]
    ParseError { message: String },
}

/// Authentication / authorization failures recovered locally with a
/// user-visible message.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("user {user_id} is not on the allow-list")]
    NotAllowListed { user_id: i64 },

    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("git authentication failed: {message}")]
    GitAuthFailed { message: String },
}

/// Retried once for idempotent reads, bubbled otherwise.
#[derive(Debug, thiserror::Error)]
pub enum TransientTransportError {
    #[error("MCP RPC timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("SSE connection disconnected: {message}")]
    SseDisconnected { message: String },

    #[error("upstream HTTP error {status}: {message}")]
    UpstreamHttp { status: u16, message: String },
}

/// I/O or parse failure in memory/KB storage. Falls back to `json` storage
/// for the single failing call where applicable.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("record not found: {id}")]
    NotFound { id: String },

    #[error("backend unavailable: {message}")]
    BackendUnavailable { message: String },
}

/// The agent process failed or returned malformed output.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent process exited with status {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("agent returned malformed output: {message}")]
    MalformedOutput { message: String },

    #[error("agent invocation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

/// KB repository could not be created or opened.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("path {path} is not a git repository and could not be initialized: {message}")]
    NotARepo { path: PathBuf, message: String },

    #[error("git2 error: {0}")]
    Git2(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Git commit/push/pull failures, classified per the distilled spec.
#[derive(Debug, thiserror::Error)]
pub enum GitOpError {
    #[error("authentication failed: {message}")]
    Auth { message: String },

    #[error("merge conflict: {message}")]
    Conflict { message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("git operation failed: {message}")]
    Other { message: String },
}

impl GitOpError {
    /// Classify a raw git/subprocess error message into one of the four
    /// buckets the distilled spec requires, scrubbing secrets first.
    pub fn classify(raw_message: &str, masker: &dyn Fn(&str) -> String) -> Self {
        let scrubbed = masker(raw_message);
        let lower = scrubbed.to_lowercase();
        if lower.contains("authentication") || lower.contains("permission denied") {
            GitOpError::Auth { message: scrubbed }
        } else if lower.contains("conflict") || lower.contains("non-fast-forward") {
            GitOpError::Conflict { message: scrubbed }
        } else if lower.contains("could not resolve host")
            || lower.contains("connection")
            || lower.contains("timed out")
        {
            GitOpError::Network { message: scrubbed }
        } else {
            GitOpError::Other { message: scrubbed }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_mask(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn classifies_auth_failure() {
        let err = GitOpError::classify(
            "fatal: Authentication failed for 'https://x'",
            &noop_mask,
        );
        assert!(matches!(err, GitOpError::Auth { .. }));
    }

    #[test]
    fn classifies_network_failure() {
        let err = GitOpError::classify("fatal: could not resolve host: github.com", &noop_mask);
        assert!(matches!(err, GitOpError::Network { .. }));
    }

    #[test]
    fn classifies_conflict() {
        let err = GitOpError::classify("! [rejected] (non-fast-forward)", &noop_mask);
        assert!(matches!(err, GitOpError::Conflict { .. }));
    }

    #[test]
    fn falls_back_to_other() {
        let err = GitOpError::classify("fatal: something weird happened", &noop_mask);
        assert!(matches!(err, GitOpError::Other { .. }));
    }
}
