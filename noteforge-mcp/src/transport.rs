//! Transport layer for JSON-RPC message exchange:
//! - [`StdioTransport`]: newline-delimited JSON over stdin/stdout
//! - [`ProcessTransport`]: same framing over a spawned child process's pipes
//! - [`ChannelTransport`]: in-process tokio mpsc channels, for tests
//! - [`SseTransport`]: SSE-over-HTTP, for a hub reachable by `MCP_HUB_URL`

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::mpsc;

use crate::error::McpError;

/// Reads and writes JSON-RPC messages over a specific transport mechanism.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `Ok(Some(message))` when a message is available, `Ok(None)` on EOF.
    async fn read_message(&mut self) -> Result<Option<String>, McpError>;

    async fn write_message(&mut self, message: &str) -> Result<(), McpError>;

    async fn close(&mut self) -> Result<(), McpError>;
}

/// Newline-delimited JSON over the process's own stdin/stdout. The
/// standard transport when the Hub is launched as a child process.
pub struct StdioTransport {
    reader: BufReader<Stdin>,
    writer: Stdout,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            writer: tokio::io::stdout(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn read_message(&mut self) -> Result<Option<String>, McpError> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end().to_string()))
    }

    async fn write_message(&mut self, message: &str) -> Result<(), McpError> {
        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Same NDJSON framing as [`StdioTransport`], operating on a spawned child
/// process's stdin/stdout. Used by `noteforge-core::mcp_manager` when it
/// supervises a `noteforge-hub` subprocess directly rather than connecting
/// to one reachable over HTTP.
pub struct ProcessTransport {
    child_stdin: tokio::process::ChildStdin,
    reader: BufReader<tokio::process::ChildStdout>,
}

impl std::fmt::Debug for ProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTransport").finish()
    }
}

impl ProcessTransport {
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &std::collections::HashMap<String, String>,
    ) -> Result<(Self, tokio::process::Child), McpError> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| McpError::TransportError {
            message: format!("failed to spawn {command}: {e}"),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::TransportError {
            message: "failed to capture child stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::TransportError {
            message: "failed to capture child stdout".into(),
        })?;

        Ok((
            Self {
                child_stdin: stdin,
                reader: BufReader::new(stdout),
            },
            child,
        ))
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn read_message(&mut self) -> Result<Option<String>, McpError> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end().to_string()))
    }

    async fn write_message(&mut self, message: &str) -> Result<(), McpError> {
        self.child_stdin.write_all(message.as_bytes()).await?;
        self.child_stdin.write_all(b"\n").await?;
        self.child_stdin.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.child_stdin.flush().await?;
        Ok(())
    }
}

/// In-process transport backed by tokio mpsc channels, for exercising the
/// full client/server message pipeline without real I/O.
pub struct ChannelTransport {
    receiver: mpsc::Receiver<String>,
    sender: mpsc::Sender<String>,
}

impl ChannelTransport {
    pub fn new(receiver: mpsc::Receiver<String>, sender: mpsc::Sender<String>) -> Self {
        Self { receiver, sender }
    }

    pub fn pair(buffer: usize) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(buffer);
        let (tx_b, rx_b) = mpsc::channel(buffer);
        (ChannelTransport::new(rx_a, tx_b), ChannelTransport::new(rx_b, tx_a))
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn read_message(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.receiver.recv().await)
    }

    async fn write_message(&mut self, message: &str) -> Result<(), McpError> {
        self.sender
            .send(message.to_string())
            .await
            .map_err(|e| McpError::TransportError {
                message: format!("channel send failed: {e}"),
            })
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.receiver.close();
        Ok(())
    }
}

/// JSON-RPC over SSE: outbound requests are POSTed to `{base_url}`, replies
/// (and any server-pushed notifications) arrive as `data:` lines on a
/// `GET {base_url}` `text/event-stream` connection opened at construction.
pub struct SseTransport {
    client: reqwest::Client,
    post_url: String,
    incoming: mpsc::Receiver<String>,
    _stream_task: tokio::task::JoinHandle<()>,
}

impl SseTransport {
    pub async fn connect(base_url: &str) -> Result<Self, McpError> {
        let client = reqwest::Client::new();
        let response = client
            .get(base_url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| McpError::TransportError {
                message: format!("sse connect failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(McpError::TransportError {
                message: format!("sse connect returned status {}", response.status()),
            });
        }

        let (tx, rx) = mpsc::channel(64);
        let mut byte_stream = response.bytes_stream();
        let task = tokio::spawn(async move {
            let mut buffer = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let Ok(bytes) = chunk else { break };
                buffer.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);
                    if let Some(data) = line.strip_prefix("data:") {
                        if tx.send(data.trim().to_string()).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(Self {
            client,
            post_url: base_url.to_string(),
            incoming: rx,
            _stream_task: task,
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn read_message(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.incoming.recv().await)
    }

    async fn write_message(&mut self, message: &str) -> Result<(), McpError> {
        let response = self
            .client
            .post(&self.post_url)
            .header("Content-Type", "application/json")
            .body(message.to_string())
            .send()
            .await
            .map_err(|e| McpError::TransportError {
                message: format!("sse post failed: {e}"),
            })?;
        if !response.status().is_success() {
            return Err(McpError::TransportError {
                message: format!("sse post returned status {}", response.status()),
            });
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.incoming.close();
        Ok(())
    }
}
