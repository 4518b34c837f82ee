//! Note creation service (C9): turns a dispatched message group into one
//! or more Markdown notes under the user's KB, via the agent, then commits
//! and pushes the result.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::agent::{Agent, AgentMode, AgentRequest, AgentResult};
use crate::credentials::mask_secrets;
use crate::git_ops::GitOperations;
use crate::rate_limiter::{RateDecision, RateLimiter};
use crate::services::{extract_answer, fenced_blocks};
use crate::types::{GitPlatform, MessageGroup, UserKbConfig};

/// Outcome reported back to the chat after a note-creation attempt.
pub struct NoteOutcome {
    pub reply_text: String,
    pub files_created: Vec<PathBuf>,
}

/// Remote push target resolved ahead of a note-creation call, so the
/// service itself never needs to know about credential storage.
pub struct RemoteTarget {
    pub url: String,
    pub branch: String,
    pub platform: GitPlatform,
    pub credentials: Option<(String, String)>,
}

pub struct NoteService<A: Agent + ?Sized> {
    agent: Arc<A>,
    git_ops: Arc<GitOperations>,
    rate_limiter: Arc<RateLimiter>,
}

impl<A: Agent + ?Sized> NoteService<A> {
    pub fn new(agent: Arc<A>, git_ops: Arc<GitOperations>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            agent,
            git_ops,
            rate_limiter,
        }
    }

    pub async fn create(
        &self,
        group: MessageGroup,
        chat_id: i64,
        user_id: i64,
        kb_path: PathBuf,
        user_kb: &UserKbConfig,
        remote: Option<RemoteTarget>,
    ) -> NoteOutcome {
        let _ = chat_id;

        if let RateDecision::Denied { retry_after } = self.rate_limiter.allow(user_id) {
            return NoteOutcome {
                reply_text: format!(
                    "You're sending notes too quickly — try again in {}s.",
                    retry_after.as_secs()
                ),
                files_created: Vec::new(),
            };
        }

        let working_dir = kb_path.join("topics");
        if let Err(err) = std::fs::create_dir_all(&working_dir) {
            return NoteOutcome {
                reply_text: format!("Could not prepare the notes directory: {err}"),
                files_created: Vec::new(),
            };
        }

        let prompt = build_prompt(&group);
        let response = match self
            .agent
            .process(AgentRequest {
                mode: AgentMode::Note,
                prompt,
                working_dir: working_dir.clone(),
                user_id,
            })
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                warn!(user_id, "note agent invocation failed: {err}");
                return NoteOutcome {
                    reply_text: mask_secrets(&format!("Could not create your note: {err}")),
                    files_created: Vec::new(),
                };
            }
        };

        let result = parse_agent_result(&response.text);

        if user_kb.has_credentials || remote.is_some() {
            let remote = remote.as_ref();
            if let Err(err) = self
                .git_ops
                .auto_commit_and_push(
                    &kb_path,
                    &format!("note: {}", note_title(&result.summary)),
                    remote.map(|r| r.url.as_str()),
                    remote.map(|r| r.branch.as_str()).unwrap_or("main"),
                    remote
                        .and_then(|r| r.credentials.as_ref())
                        .map(|(u, t)| (u.as_str(), t.as_str())),
                    Some(user_id),
                )
                .await
            {
                warn!(user_id, "note commit/push failed: {err}");
                return NoteOutcome {
                    reply_text: mask_secrets(&format!(
                        "Note saved locally, but syncing to your remote failed: {err}"
                    )),
                    files_created: result.files_created,
                };
            }
        }

        NoteOutcome {
            reply_text: confirmation_text(&result),
            files_created: result.files_created,
        }
    }
}

fn build_prompt(group: &MessageGroup) -> String {
    let mut prompt = String::from(
        "Curate the following chat content into the knowledge base as one or more Markdown notes:\n\n",
    );
    for message in &group.messages {
        if message.is_forwarded() {
            let attribution = message
                .forward_sender_name
                .clone()
                .unwrap_or_else(|| "unknown source".to_string());
            prompt.push_str(&format!("[forwarded from {attribution}]\n"));
        }
        prompt.push_str(&message.text);
        prompt.push('\n');
    }
    prompt
}

/// Parse the agent's `agent-result` block into [`AgentResult`], falling
/// back to the C10-style `answer`/stripped-text extraction for an agent
/// that only ever returns prose.
fn parse_agent_result(raw_text: &str) -> AgentResult {
    for block in fenced_blocks(raw_text, "agent-result") {
        if let Ok(result) = serde_json::from_str::<AgentResult>(&block) {
            return result;
        }
    }
    AgentResult {
        summary: extract_answer(raw_text),
        ..Default::default()
    }
}

fn note_title(summary: &str) -> String {
    summary.lines().next().unwrap_or("update").chars().take(60).collect()
}

fn confirmation_text(result: &AgentResult) -> String {
    let mut parts = Vec::new();
    if !result.files_created.is_empty() {
        parts.push(format!("created {}", display_paths(&result.files_created)));
    }
    if !result.files_edited.is_empty() {
        parts.push(format!("edited {}", display_paths(&result.files_edited)));
    }
    if !result.folders_created.is_empty() {
        parts.push(format!("new folders {}", display_paths(&result.folders_created)));
    }

    if parts.is_empty() {
        format!("Noted: {}", result.summary)
    } else {
        format!("Noted: {} ({})", result.summary, parts.join("; "))
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::ScriptedAgent;
    use crate::agent::AgentResponse;
    use crate::event_bus::EventBus;
    use std::time::Duration;
    use tempfile::TempDir;

    fn base_group() -> MessageGroup {
        MessageGroup::new(crate::types::IncomingMessage {
            message_id: 1,
            chat_id: 1,
            user_id: 1,
            text: "interesting article about rust".into(),
            content_type: crate::types::ContentType::Text,
            timestamp: 0,
            caption: None,
            forward_date: None,
            forward_sender_name: None,
            forward_from_chat_id: None,
            forward_from_message_id: None,
            media_handles: Vec::new(),
        })
    }

    #[tokio::test]
    async fn creates_note_without_remote() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(AgentResponse {
            text: "Saved a note about rust.".into(),
            exit_code: 0,
        })]));
        let service = NoteService::new(
            agent,
            Arc::new(GitOperations::new(EventBus::new(1, 8))),
            Arc::new(RateLimiter::new(5, Duration::from_secs(60))),
        );
        let kb_config = UserKbConfig {
            user_id: 1,
            kb_name: "default".into(),
            kb_type: crate::types::KbType::Local,
            github_url: None,
            has_credentials: false,
            mode: crate::types::BotMode::Note,
        };
        let outcome = service
            .create(base_group(), 1, 1, dir.path().to_path_buf(), &kb_config, None)
            .await;
        assert!(outcome.reply_text.to_lowercase().contains("rust") || !outcome.reply_text.is_empty());
    }

    #[tokio::test]
    async fn creates_note_reports_files_from_agent_result_block() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(AgentResponse {
            text: "Saved it.\n```agent-result\n{\"summary\": \"Rust async runtimes\", \
                   \"filesCreated\": [\"topics/rust-async.md\"]}\n```\n"
                .into(),
            exit_code: 0,
        })]));
        let service = NoteService::new(
            agent,
            Arc::new(GitOperations::new(EventBus::new(1, 8))),
            Arc::new(RateLimiter::new(5, Duration::from_secs(60))),
        );
        let kb_config = UserKbConfig {
            user_id: 1,
            kb_name: "default".into(),
            kb_type: crate::types::KbType::Local,
            github_url: None,
            has_credentials: false,
            mode: crate::types::BotMode::Note,
        };
        let outcome = service
            .create(base_group(), 1, 1, dir.path().to_path_buf(), &kb_config, None)
            .await;
        assert_eq!(outcome.files_created, vec![PathBuf::from("topics/rust-async.md")]);
        assert!(outcome.reply_text.contains("rust-async.md"));
    }

    #[tokio::test]
    async fn rate_limited_user_gets_denial_message() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new(vec![]));
        let service = NoteService::new(
            agent,
            Arc::new(GitOperations::new(EventBus::new(1, 8))),
            Arc::new(RateLimiter::new(0, Duration::from_secs(60))),
        );
        let kb_config = UserKbConfig {
            user_id: 1,
            kb_name: "default".into(),
            kb_type: crate::types::KbType::Local,
            github_url: None,
            has_credentials: false,
            mode: crate::types::BotMode::Note,
        };
        let outcome = service
            .create(base_group(), 1, 1, dir.path().to_path_buf(), &kb_config, None)
            .await;
        assert!(outcome.reply_text.contains("too quickly"));
    }
}
