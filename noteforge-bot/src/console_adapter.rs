//! Console dev transport: the `ChatAdapter` this binary actually ships,
//! since the distilled spec deliberately leaves the real chat platform out
//! of scope. Grounded on `rustant-cli::repl::run_interactive`'s stdin/stdout
//! loop — reads one line per inbound message, prints outbound text with a
//! `[chat_id#message_id]` prefix so replies and edits are distinguishable
//! in a single shared terminal.

use std::io::Write as _;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use noteforge_core::chat_adapter::{ChatAdapter, SentMessageId};
use noteforge_core::error::TransientTransportError;
use noteforge_core::types::{ContentType, IncomingMessage};

/// Reads stdin lines and turns them into [`IncomingMessage`]s, all
/// attributed to a single fixed chat/user pair — there's no concept of
/// multiple simultaneous chats over one terminal.
pub struct ConsoleInbound {
    pub chat_id: i64,
    pub user_id: i64,
}

impl ConsoleInbound {
    /// Spawns the stdin-reading task, returning a receiver of
    /// [`IncomingMessage`]s for the caller to forward into the router.
    pub fn spawn(self) -> mpsc::Receiver<IncomingMessage> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let mut lines = BufReader::new(stdin).lines();
            let mut next_message_id = 0i64;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        next_message_id += 1;
                        let message = IncomingMessage {
                            message_id: next_message_id,
                            chat_id: self.chat_id,
                            user_id: self.user_id,
                            text: line,
                            content_type: ContentType::Text,
                            timestamp: chrono::Utc::now().timestamp(),
                            caption: None,
                            forward_date: None,
                            forward_sender_name: None,
                            forward_from_chat_id: None,
                            forward_from_message_id: None,
                            media_handles: Vec::new(),
                        };
                        if tx.send(message).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(err) => {
                        tracing::warn!("console stdin read failed: {err}");
                        return;
                    }
                }
            }
        });
        rx
    }
}

/// Outbound half of the console transport: prints to stdout, tracking sent
/// message ids purely so [`ChatAdapter::edit_message`] has something to
/// reference (edits reprint rather than mutating terminal history).
pub struct ConsoleChatAdapter {
    next_id: AtomicI64,
}

impl ConsoleChatAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(0),
        })
    }

    fn print(&self, chat_id: i64, message_id: i64, text: &str) {
        let mut stdout = std::io::stdout();
        let _ = writeln!(stdout, "[chat {chat_id}#{message_id}] {text}");
        let _ = stdout.flush();
    }
}

#[async_trait]
impl ChatAdapter for ConsoleChatAdapter {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<SentMessageId, TransientTransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.print(chat_id, id, text);
        Ok(SentMessageId(id))
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: SentMessageId,
        text: &str,
    ) -> Result<(), TransientTransportError> {
        self.print(chat_id, message_id.0, &format!("(edit) {text}"));
        Ok(())
    }

    async fn reply_to(&self, msg: &IncomingMessage, text: &str) -> Result<SentMessageId, TransientTransportError> {
        self.send_message(msg.chat_id, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_edit_allocates_increasing_ids() {
        let adapter = ConsoleChatAdapter::new();
        let first = adapter.send_message(1, "hello").await.unwrap();
        let second = adapter.send_message(1, "world").await.unwrap();
        assert_ne!(first, second);
        adapter.edit_message(1, first, "hello again").await.unwrap();
    }
}
