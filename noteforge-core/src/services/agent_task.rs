//! Free-form agent task service (C11): streams an agent's stdout into a
//! periodically-edited chat message and edits a separate message for
//! stderr only when it changes.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use crate::agent::{Agent, AgentChunk, AgentMode, AgentRequest};
use crate::chat_adapter::{ChatAdapter, SentMessageId};
use crate::credentials::mask_secrets;
use crate::rate_limiter::{RateDecision, RateLimiter};

const EDIT_INTERVAL: Duration = Duration::from_secs(30);
const TAIL_CHARS: usize = 1000;

pub struct AgentTaskService<A: Agent + ?Sized, C: ChatAdapter> {
    agent: Arc<A>,
    chat_adapter: Arc<C>,
    rate_limiter: Arc<RateLimiter>,
}

impl<A: Agent + ?Sized + 'static, C: ChatAdapter + 'static> AgentTaskService<A, C> {
    pub fn new(agent: Arc<A>, chat_adapter: Arc<C>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            agent,
            chat_adapter,
            rate_limiter,
        }
    }

    pub async fn run(
        &self,
        prompt: String,
        user_id: i64,
        chat_id: i64,
        working_dir: PathBuf,
        processing_message_id: SentMessageId,
    ) {
        if let RateDecision::Denied { retry_after } = self.rate_limiter.allow(user_id) {
            let _ = self
                .chat_adapter
                .edit_message(
                    chat_id,
                    processing_message_id,
                    &format!(
                        "You're sending tasks too quickly — try again in {}s.",
                        retry_after.as_secs()
                    ),
                )
                .await;
            return;
        }

        let state = Arc::new(StreamState::new());
        let state_for_edits = state.clone();
        let chat_adapter = self.chat_adapter.clone();
        let stderr_message_id = Arc::new(Mutex::new(None::<SentMessageId>));
        let stderr_for_edits = stderr_message_id.clone();

        let ticker = {
            let state = state_for_edits.clone();
            let chat_adapter = chat_adapter.clone();
            let stderr_message_id = stderr_for_edits.clone();
            let processing_message_id = processing_message_id.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(EDIT_INTERVAL);
                loop {
                    interval.tick().await;
                    if state.is_done() {
                        break;
                    }
                    flush_progress(&state, &chat_adapter, chat_id, &processing_message_id, &stderr_message_id).await;
                }
            })
        };

        let on_chunk = {
            let state = state.clone();
            move |chunk: AgentChunk| {
                state.apply(chunk);
            }
        };

        let result = self
            .agent
            .process_streaming(
                AgentRequest {
                    mode: AgentMode::Agent,
                    prompt,
                    working_dir,
                    user_id,
                },
                &on_chunk,
            )
            .await;

        state.mark_done();
        ticker.abort();
        flush_progress(&state, &chat_adapter, chat_id, &processing_message_id, &stderr_message_id).await;

        match result {
            Ok(response) => {
                let _ = chat_adapter
                    .edit_message(chat_id, processing_message_id, &format!("Done: {}", response.text))
                    .await;
            }
            Err(err) => {
                warn!(user_id, "agent task failed: {err}");
                let _ = chat_adapter
                    .edit_message(
                        chat_id,
                        processing_message_id,
                        &mask_secrets(&format!("Task failed: {err}")),
                    )
                    .await;
            }
        }
    }
}

struct StreamState {
    stdout: Mutex<String>,
    stderr: Mutex<String>,
    last_flushed_stderr: Mutex<String>,
    done: std::sync::atomic::AtomicBool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            stdout: Mutex::new(String::new()),
            stderr: Mutex::new(String::new()),
            last_flushed_stderr: Mutex::new(String::new()),
            done: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn apply(&self, chunk: AgentChunk) {
        self.stdout.lock().unwrap().push_str(&chunk.stdout_delta);
        self.stderr.lock().unwrap().push_str(&chunk.stderr_delta);
    }

    fn mark_done(&self) {
        self.done.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn is_done(&self) -> bool {
        self.done.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn stdout_tail(&self) -> String {
        tail(&self.stdout.lock().unwrap(), TAIL_CHARS)
    }

    fn stderr_changed_since_last_flush(&self) -> Option<String> {
        let current = self.stderr.lock().unwrap().clone();
        if current.is_empty() {
            return None;
        }
        let mut last = self.last_flushed_stderr.lock().unwrap();
        if *last == current {
            return None;
        }
        *last = current.clone();
        Some(tail(&current, TAIL_CHARS))
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        text.to_string()
    } else {
        chars[chars.len() - max_chars..].iter().collect()
    }
}

async fn flush_progress<C: ChatAdapter>(
    state: &StreamState,
    chat_adapter: &Arc<C>,
    chat_id: i64,
    processing_message_id: &SentMessageId,
    stderr_message_id: &Arc<Mutex<Option<SentMessageId>>>,
) {
    let tail = state.stdout_tail();
    if !tail.is_empty() {
        let _ = chat_adapter
            .edit_message(chat_id, processing_message_id.clone(), &tail)
            .await;
    }

    if let Some(stderr_tail) = state.stderr_changed_since_last_flush() {
        let existing = stderr_message_id.lock().unwrap().clone();
        match existing {
            Some(id) => {
                let _ = chat_adapter.edit_message(chat_id, id, &stderr_tail).await;
            }
            None => {
                if let Ok(id) = chat_adapter.send_message(chat_id, &stderr_tail).await {
                    *stderr_message_id.lock().unwrap() = Some(id);
                }
            }
        }
    }
}
