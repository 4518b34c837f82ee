//! Supervises the MCP Hub or connects directly to a remote one (C14).
//!
//! `MCP_HUB_URL` presence selects pure client mode: no subprocess is
//! spawned and no client config files are written, this module only holds
//! an `McpClient` dialed over SSE to that URL. Otherwise it spawns
//! `noteforge-hub` as a child process (subprocess idiom grounded on the
//! teacher's `GitStatusTool::run_git`), restarts it with capped exponential
//! backoff on crash, and gives up after five consecutive failures.

use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use noteforge_mcp::McpClient;

use crate::error::ConfigError;

const MAX_CONSECUTIVE_FAILURES: u32 = 5;
const BASE_BACKOFF_SECS: u64 = 5;
const MAX_BACKOFF_SECS: u64 = 300;
const HUB_LOOPBACK_URL: &str = "http://127.0.0.1:8765/sse";

/// Restart delay for the `attempt`'th consecutive crash (1-indexed), with
/// ±20% jitter. Doubles per attempt starting at `BASE_BACKOFF_SECS`,
/// capped at `MAX_BACKOFF_SECS` (5s, 10s, 20s, 40s, 80s, ... capped 300s) —
/// the same doubling-with-jitter shape as the `codex` example's `backoff()`
/// helper, resolved to the distilled spec's health-check schedule rather
/// than that example's 200ms base.
fn backoff(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(10);
    let base_ms = BASE_BACKOFF_SECS.saturating_mul(1000) << shift;
    let capped_ms = base_ms.min(MAX_BACKOFF_SECS * 1000);
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_millis((capped_ms as f64 * jitter) as u64)
}

/// Either a direct connection to a remote Hub, or a supervised local one.
enum Mode {
    Remote,
    Supervised {
        child: Mutex<Option<Child>>,
        shutdown: watch::Sender<bool>,
    },
}

/// Owns the `McpClient` used to reach the Hub and, when running the Hub
/// locally, the supervision loop that keeps it alive.
pub struct McpServerManager {
    client: Mutex<McpClient>,
    mode: Mode,
    consecutive_failures: AtomicU32,
}

impl McpServerManager {
    /// Reads `MCP_HUB_URL` to decide client vs. supervised mode. Must be
    /// called before the rest of configuration is assembled, since its
    /// outcome changes which config layers apply.
    pub async fn start(hub_binary: &str) -> Result<std::sync::Arc<Self>, ConfigError> {
        match std::env::var("MCP_HUB_URL") {
            Ok(url) => {
                info!(url = %url, "MCP_HUB_URL set, connecting to remote hub");
                let client = connect_with_retry(&url, MAX_CONSECUTIVE_FAILURES).await?;
                Ok(std::sync::Arc::new(Self {
                    client: Mutex::new(client),
                    mode: Mode::Remote,
                    consecutive_failures: AtomicU32::new(0),
                }))
            }
            Err(_) => {
                info!(hub_binary, "no MCP_HUB_URL, spawning local hub");
                let child = spawn_hub(hub_binary)?;
                let client = connect_with_retry(HUB_LOOPBACK_URL, MAX_CONSECUTIVE_FAILURES).await?;
                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                let manager = std::sync::Arc::new(Self {
                    client: Mutex::new(client),
                    mode: Mode::Supervised {
                        child: Mutex::new(Some(child)),
                        shutdown: shutdown_tx,
                    },
                    consecutive_failures: AtomicU32::new(0),
                });
                manager.clone().spawn_supervisor(hub_binary.to_string(), shutdown_rx);
                Ok(manager)
            }
        }
    }

    /// Runs the client-side half of a supervised call: access the current
    /// connection to call tools, list them, etc.
    pub async fn client(&self) -> tokio::sync::MutexGuard<'_, McpClient> {
        self.client.lock().await
    }

    fn spawn_supervisor(self: std::sync::Arc<Self>, hub_binary: String, mut shutdown: watch::Receiver<bool>) {
        tokio::spawn(async move {
            loop {
                let exit_status = {
                    let mut guard = match &self.mode {
                        Mode::Supervised { child, .. } => child.lock().await,
                        Mode::Remote => return,
                    };
                    let Some(child) = guard.as_mut() else {
                        return;
                    };
                    tokio::select! {
                        status = child.wait() => status,
                        _ = shutdown.changed() => {
                            info!("hub supervisor shutting down");
                            return;
                        }
                    }
                };

                match exit_status {
                    Ok(status) if status.success() => {
                        info!("hub process exited cleanly, stopping supervision");
                        return;
                    }
                    Ok(status) => {
                        warn!(code = ?status.code(), "hub process crashed");
                    }
                    Err(err) => {
                        error!("failed to wait on hub process: {err}");
                    }
                }

                let attempt = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt > MAX_CONSECUTIVE_FAILURES {
                    error!(
                        attempt,
                        "hub crashed {MAX_CONSECUTIVE_FAILURES} times in a row, giving up"
                    );
                    return;
                }

                let delay = backoff(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "restarting hub after backoff");
                tokio::time::sleep(delay).await;

                match spawn_hub(&hub_binary) {
                    Ok(new_child) => {
                        if let Mode::Supervised { child, .. } = &self.mode {
                            *child.lock().await = Some(new_child);
                        }
                        match connect_with_retry(HUB_LOOPBACK_URL, 1).await {
                            Ok(new_client) => {
                                *self.client.lock().await = new_client;
                                self.consecutive_failures.store(0, Ordering::SeqCst);
                            }
                            Err(err) => {
                                error!("reconnect to restarted hub failed: {err}");
                            }
                        }
                    }
                    Err(err) => {
                        error!("failed to respawn hub: {err}");
                    }
                }
            }
        });
    }
}

fn spawn_hub(hub_binary: &str) -> Result<Child, ConfigError> {
    Command::new(hub_binary)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ConfigError::Invalid {
            message: format!("failed to spawn hub process '{hub_binary}': {e}"),
        })
}

/// Retries `McpClient::connect_sse` with the same capped-backoff schedule
/// as process supervision, giving up (and surfacing a fatal `ConfigError`)
/// after `max_attempts` failures.
async fn connect_with_retry(url: &str, max_attempts: u32) -> Result<McpClient, ConfigError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match McpClient::connect_sse(url).await {
            Ok(client) => return Ok(client),
            Err(err) if attempt >= max_attempts => {
                return Err(ConfigError::Invalid {
                    message: format!("could not connect to hub at '{url}' after {attempt} attempts: {err}"),
                });
            }
            Err(err) => {
                warn!(attempt, "hub connection attempt failed: {err}, retrying");
                tokio::time::sleep(backoff(attempt)).await;
            }
        }
    }
}
