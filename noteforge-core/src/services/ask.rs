//! Question answering service (C10): mirrors the note service but runs the
//! agent read-only and never touches git.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::agent::{Agent, AgentMode, AgentRequest};
use crate::credentials::mask_secrets;
use crate::rate_limiter::{RateDecision, RateLimiter};
use crate::types::MessageGroup;

pub struct AskService<A: Agent + ?Sized> {
    agent: Arc<A>,
    rate_limiter: Arc<RateLimiter>,
}

impl<A: Agent + ?Sized> AskService<A> {
    pub fn new(agent: Arc<A>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { agent, rate_limiter }
    }

    /// Answer a question formed from `group`'s concatenated text, reading
    /// (never writing) `kb_path`.
    pub async fn answer(&self, group: MessageGroup, user_id: i64, kb_path: PathBuf) -> String {
        if let RateDecision::Denied { retry_after } = self.rate_limiter.allow(user_id) {
            return format!(
                "You're asking questions too quickly — try again in {}s.",
                retry_after.as_secs()
            );
        }

        let prompt = group
            .messages
            .iter()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        match self
            .agent
            .process(AgentRequest {
                mode: AgentMode::Ask,
                prompt,
                working_dir: kb_path,
                user_id,
            })
            .await
        {
            Ok(response) => crate::services::extract_answer(&response.text),
            Err(err) => {
                warn!(user_id, "ask agent invocation failed: {err}");
                mask_secrets(&format!("Could not answer your question: {err}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::ScriptedAgent;
    use crate::agent::AgentResponse;
    use crate::types::{ContentType, IncomingMessage};
    use std::time::Duration;

    fn group_with(text: &str) -> MessageGroup {
        MessageGroup::new(IncomingMessage {
            message_id: 1,
            chat_id: 1,
            user_id: 1,
            text: text.into(),
            content_type: ContentType::Text,
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
    async fn prefers_answer_field_in_reply() {
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(AgentResponse {
            text: "```agent-result\n{\"answer\": \"42\"}\n```".into(),
            exit_code: 0,
        })]));
        let service = AskService::new(agent, Arc::new(RateLimiter::new(5, Duration::from_secs(60))));
        let answer = service
            .answer(group_with("what is the answer?"), 1, PathBuf::from("/tmp/kb"))
            .await;
        assert_eq!(answer, "42");
    }

    #[tokio::test]
    async fn rate_limited_denial() {
        let agent = Arc::new(ScriptedAgent::new(vec![]));
        let service = AskService::new(agent, Arc::new(RateLimiter::new(0, Duration::from_secs(60))));
        let answer = service
            .answer(group_with("hi"), 1, PathBuf::from("/tmp/kb"))
            .await;
        assert!(answer.contains("too quickly"));
    }
}
