//! The `ChatAdapter` collaborator boundary: inbound message delivery and
//! outbound reply/edit operations. No concrete chat-platform
//! implementation ships here — `noteforge-bot` is injected one at startup.

use async_trait::async_trait;

use crate::error::TransientTransportError;
use crate::types::IncomingMessage;

/// Handle to an outbound message, usable for later edits (agent-task
/// progress updates) or as a reply target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessageId(pub i64);

/// Inbound/outbound boundary between the core pipeline and a concrete chat
/// platform (Telegram, Slack, ...). Implementations are expected to
/// translate platform-specific payloads into [`IncomingMessage`] and call
/// back into a [`crate::router::MessageRouter`].
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Send a new message to `chat_id`, returning its id for later edits.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
    ) -> Result<SentMessageId, TransientTransportError>;

    /// Edit a previously sent message in place.
    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: SentMessageId,
        text: &str,
    ) -> Result<(), TransientTransportError>;

    /// Reply directly to an inbound message.
    async fn reply_to(
        &self,
        msg: &IncomingMessage,
        text: &str,
    ) -> Result<SentMessageId, TransientTransportError>;
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// In-memory fake recording every send/edit/reply for assertions.
    #[derive(Default)]
    pub struct FakeChatAdapter {
        pub sent: Mutex<Vec<(i64, String)>>,
        pub edits: Mutex<Vec<(i64, i64, String)>>,
        next_id: Mutex<i64>,
    }

    impl FakeChatAdapter {
        pub fn new() -> Self {
            Self::default()
        }

        fn allocate(&self) -> i64 {
            let mut id = self.next_id.lock().unwrap();
            *id += 1;
            *id
        }
    }

    #[async_trait]
    impl ChatAdapter for FakeChatAdapter {
        async fn send_message(
            &self,
            chat_id: i64,
            text: &str,
        ) -> Result<SentMessageId, TransientTransportError> {
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(SentMessageId(self.allocate()))
        }

        async fn edit_message(
            &self,
            chat_id: i64,
            message_id: SentMessageId,
            text: &str,
        ) -> Result<(), TransientTransportError> {
            self.edits
                .lock()
                .unwrap()
                .push((chat_id, message_id.0, text.to_string()));
            Ok(())
        }

        async fn reply_to(
            &self,
            msg: &IncomingMessage,
            text: &str,
        ) -> Result<SentMessageId, TransientTransportError> {
            self.send_message(msg.chat_id, text).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeChatAdapter;
    use super::*;

    #[tokio::test]
    async fn send_then_edit_records_both() {
        let adapter = FakeChatAdapter::new();
        let id = adapter.send_message(1, "hello").await.unwrap();
        adapter.edit_message(1, id, "hello again").await.unwrap();
        assert_eq!(adapter.sent.lock().unwrap().len(), 1);
        assert_eq!(adapter.edits.lock().unwrap().len(), 1);
    }
}
