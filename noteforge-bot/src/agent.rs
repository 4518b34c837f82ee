//! Concrete `Agent`: runs a configured external command once per request,
//! feeding the prompt on stdin and reading its reply from stdout. Subprocess
//! idiom grounded on `rustant-tools::git::GitStatusTool::run_git` — a
//! resolved command is only ever invoked as a child process argument list,
//! never through a shell. No LLM provider is implemented or assumed here;
//! `command` can point at anything that speaks this stdin/stdout contract.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use noteforge_core::agent::{Agent, AgentChunk, AgentMode, AgentRequest, AgentResponse};
use noteforge_core::error::AgentError;

pub struct ExternalAgent {
    program: String,
    args: Vec<String>,
}

impl ExternalAgent {
    /// `command_line` is split on whitespace into a program and its fixed
    /// argument list; the prompt itself is never part of this line, it is
    /// written to the child's stdin per-call.
    pub fn new(command_line: &str) -> Self {
        let mut parts = command_line.split_whitespace();
        let program = parts.next().unwrap_or("true").to_string();
        let args = parts.map(str::to_string).collect();
        Self { program, args }
    }

    fn command_for(&self, req: &AgentRequest) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&req.working_dir)
            .env("NOTEFORGE_AGENT_MODE", mode_env(req.mode))
            .env("NOTEFORGE_USER_ID", req.user_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

fn mode_env(mode: AgentMode) -> &'static str {
    match mode {
        AgentMode::Note => "note",
        AgentMode::Ask => "ask",
        AgentMode::Agent => "agent",
    }
}

#[async_trait]
impl Agent for ExternalAgent {
    async fn process(&self, req: AgentRequest) -> Result<AgentResponse, AgentError> {
        let mut child = self
            .command_for(&req)
            .spawn()
            .map_err(|e| AgentError::MalformedOutput {
                message: format!("failed to spawn agent '{}': {e}", self.program),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(req.prompt.as_bytes()).await;
        }

        let output = child.wait_with_output().await.map_err(|e| AgentError::MalformedOutput {
            message: format!("agent process '{}' failed: {e}", self.program),
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            return Err(AgentError::NonZeroExit {
                code: exit_code,
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(AgentResponse {
            text: String::from_utf8_lossy(&output.stdout).to_string(),
            exit_code,
        })
    }

    async fn process_streaming(
        &self,
        req: AgentRequest,
        on_chunk: &(dyn Fn(AgentChunk) + Send + Sync),
    ) -> Result<AgentResponse, AgentError> {
        let mut child = self
            .command_for(&req)
            .spawn()
            .map_err(|e| AgentError::MalformedOutput {
                message: format!("failed to spawn agent '{}': {e}", self.program),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(req.prompt.as_bytes()).await;
        }

        let mut stdout_lines = BufReader::new(child.stdout.take().expect("piped stdout")).lines();
        let mut stderr_lines = BufReader::new(child.stderr.take().expect("piped stderr")).lines();
        let mut full_stdout = String::new();

        loop {
            tokio::select! {
                line = stdout_lines.next_line() => match line {
                    Ok(Some(line)) => {
                        full_stdout.push_str(&line);
                        full_stdout.push('\n');
                        on_chunk(AgentChunk { stdout_delta: format!("{line}\n"), stderr_delta: String::new(), done: false });
                    }
                    Ok(None) => break,
                    Err(_) => break,
                },
                line = stderr_lines.next_line() => match line {
                    Ok(Some(line)) => {
                        on_chunk(AgentChunk { stdout_delta: String::new(), stderr_delta: format!("{line}\n"), done: false });
                    }
                    Ok(None) => {}
                    Err(_) => {}
                },
            }
        }

        let status = child.wait().await.map_err(|e| AgentError::MalformedOutput {
            message: format!("agent process '{}' failed: {e}", self.program),
        })?;
        let exit_code = status.code().unwrap_or(-1);

        on_chunk(AgentChunk {
            stdout_delta: String::new(),
            stderr_delta: String::new(),
            done: true,
        });

        if !status.success() {
            return Err(AgentError::NonZeroExit {
                code: exit_code,
                stderr: String::new(),
            });
        }

        Ok(AgentResponse {
            text: full_stdout,
            exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn process_captures_stdout_of_successful_command() {
        let agent = ExternalAgent::new("cat");
        let response = agent
            .process(AgentRequest {
                mode: AgentMode::Note,
                prompt: "hello from the prompt".into(),
                working_dir: PathBuf::from("."),
                user_id: 1,
            })
            .await
            .unwrap();
        assert_eq!(response.text, "hello from the prompt");
        assert_eq!(response.exit_code, 0);
    }

    #[tokio::test]
    async fn process_reports_nonzero_exit() {
        let agent = ExternalAgent::new("false");
        let err = agent
            .process(AgentRequest {
                mode: AgentMode::Note,
                prompt: String::new(),
                working_dir: PathBuf::from("."),
                user_id: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NonZeroExit { .. }));
    }

    #[tokio::test]
    async fn process_streaming_forwards_lines_and_marks_done() {
        let agent = ExternalAgent::new("cat");
        let chunks = Mutex::new(Vec::new());
        let on_chunk = |chunk: AgentChunk| chunks.lock().unwrap().push(chunk);
        let response = agent
            .process_streaming(
                AgentRequest {
                    mode: AgentMode::Agent,
                    prompt: "line one\nline two\n".into(),
                    working_dir: PathBuf::from("."),
                    user_id: 1,
                },
                &on_chunk,
            )
            .await
            .unwrap();
        assert!(response.text.contains("line one"));
        assert!(response.text.contains("line two"));
        assert!(chunks.lock().unwrap().iter().any(|c| c.done));
    }
}
