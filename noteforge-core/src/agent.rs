//! The `Agent` collaborator boundary: a natural-language task executor
//! invoked by the note/ask/agent-task services. No concrete LLM-backed
//! implementation ships here — callers inject one, mirroring how
//! `rustant-core`'s `LlmProvider` trait is mocked in its own test suites.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::AgentError;

/// The mode an agent invocation runs under; governs tool access and the
/// expected reply shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    /// Note creation: full file-editing access under `working_dir`.
    Note,
    /// Question answering: read-only access.
    Ask,
    /// Free-form task: streams stdout as it runs.
    Agent,
}

/// A request dispatched to the agent.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub mode: AgentMode,
    pub prompt: String,
    pub working_dir: PathBuf,
    pub user_id: i64,
}

/// Result of parsing an `agent-result` block out of an agent's raw text
/// reply, used by the note service (C9) to report what it created. Field
/// names on the wire are `camelCase` (`filesCreated`, `kbStructure`, ...),
/// matching the agent contract.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentResult {
    pub summary: String,
    pub files_created: Vec<PathBuf>,
    pub files_edited: Vec<PathBuf>,
    pub folders_created: Vec<PathBuf>,
    pub kb_structure: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
}

/// An agent's raw reply, before any `agent-result`/`answer` extraction.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub text: String,
    pub exit_code: i32,
}

/// A chunk of an agent's streaming stdout, used by the agent-task service
/// (C11) to periodically edit the "processing" message.
#[derive(Debug, Clone)]
pub struct AgentChunk {
    pub stdout_delta: String,
    pub stderr_delta: String,
    pub done: bool,
}

/// The collaborator boundary between the core pipeline and whatever LLM
/// or tool-using process actually does the work.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn process(&self, req: AgentRequest) -> Result<AgentResponse, AgentError>;

    /// Run `req` with progress streamed to `on_chunk` as it becomes
    /// available, for the agent-task service's periodic message edits.
    /// The default forwards to [`Agent::process`] and reports a single
    /// terminal chunk, which is sufficient for an agent with no
    /// incremental output to offer.
    async fn process_streaming(
        &self,
        req: AgentRequest,
        on_chunk: &(dyn Fn(AgentChunk) + Send + Sync),
    ) -> Result<AgentResponse, AgentError> {
        let response = self.process(req).await?;
        on_chunk(AgentChunk {
            stdout_delta: response.text.clone(),
            stderr_delta: String::new(),
            done: true,
        });
        Ok(response)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Scripted fake agent returning canned responses in call order.
    pub struct ScriptedAgent {
        responses: Mutex<Vec<Result<AgentResponse, AgentError>>>,
    }

    impl ScriptedAgent {
        pub fn new(responses: Vec<Result<AgentResponse, AgentError>>) -> Self {
            let mut responses = responses;
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        async fn process(&self, _req: AgentRequest) -> Result<AgentResponse, AgentError> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(AgentError::MalformedOutput {
                    message: "scripted agent exhausted".to_string(),
                }))
        }
    }
}
