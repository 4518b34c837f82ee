//! Message aggregation (C5): buffers a burst of messages in the same chat
//! into a single [`MessageGroup`] and dispatches it once the chat has gone
//! quiet for `group_timeout`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::{IncomingMessage, MessageGroup};

type DispatchFn = Arc<dyn Fn(MessageGroup) + Send + Sync>;

struct TrackedGroup {
    group: MessageGroup,
    last_seen: TokioInstant,
}

/// Buffers per-chat message bursts and dispatches each completed group
/// exactly once.
pub struct MessageAggregator {
    groups: Arc<Mutex<HashMap<i64, TrackedGroup>>>,
    dispatch: DispatchFn,
    cancel: CancellationToken,
}

impl MessageAggregator {
    /// `group_timeout` is the quiet period after which a chat's buffered
    /// group is dispatched; `tick` is how often the aggregator scans for
    /// timed-out groups (the distilled spec bounds this at 1s).
    pub fn spawn<F>(group_timeout: Duration, tick: Duration, dispatch: F) -> Self
    where
        F: Fn(MessageGroup) + Send + Sync + 'static,
    {
        let groups: Arc<Mutex<HashMap<i64, TrackedGroup>>> = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let dispatch: DispatchFn = Arc::new(dispatch);

        let groups_for_ticker = groups.clone();
        let dispatch_for_ticker = dispatch.clone();
        let cancel_for_ticker = cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = cancel_for_ticker.cancelled() => break,
                    _ = interval.tick() => {
                        let due: Vec<MessageGroup> = {
                            let now = TokioInstant::now();
                            let mut guard = groups_for_ticker.lock().expect("aggregator lock poisoned");
                            let due_chat_ids: Vec<i64> = guard
                                .iter()
                                .filter(|(_, tracked)| now.duration_since(tracked.last_seen) >= group_timeout)
                                .map(|(chat_id, _)| *chat_id)
                                .collect();
                            due_chat_ids
                                .into_iter()
                                .filter_map(|chat_id| guard.remove(&chat_id).map(|t| t.group))
                                .collect()
                        };
                        for group in due {
                            let dispatch = dispatch_for_ticker.clone();
                            tokio::spawn(async move {
                                dispatch(group);
                            });
                        }
                    }
                }
            }
            debug!("aggregator ticker stopped");
        });

        Self {
            groups,
            dispatch,
            cancel,
        }
    }

    /// Append `message` to its chat's open group, creating one if absent.
    pub fn add(&self, message: IncomingMessage) {
        let chat_id = message.chat_id;
        let mut guard = self.groups.lock().expect("aggregator lock poisoned");
        match guard.get_mut(&chat_id) {
            Some(tracked) => {
                tracked.group.push(message);
                tracked.last_seen = TokioInstant::now();
            }
            None => {
                guard.insert(
                    chat_id,
                    TrackedGroup {
                        group: MessageGroup::new(message),
                        last_seen: TokioInstant::now(),
                    },
                );
            }
        }
    }

    /// Stop the ticker task. In-flight dispatch tasks are not aborted.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for MessageAggregator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_message(chat_id: i64, message_id: i64) -> IncomingMessage {
        IncomingMessage {
            message_id,
            chat_id,
            user_id: 1,
            text: format!("msg {message_id}"),
            content_type: crate::types::ContentType::Text,
            timestamp: 0,
            caption: None,
            forward_date: None,
            forward_sender_name: None,
            forward_from_chat_id: None,
            forward_from_message_id: None,
            media_handles: Vec::new(),
        }
    }

    #[tokio::test]
    async fn dispatches_single_group_once_after_timeout() {
        let dispatch_count = Arc::new(AtomicUsize::new(0));
        let last_group_size = Arc::new(Mutex::new(0usize));
        let dc = dispatch_count.clone();
        let lg = last_group_size.clone();
        let aggregator = MessageAggregator::spawn(
            Duration::from_millis(30),
            Duration::from_millis(5),
            move |group| {
                dc.fetch_add(1, Ordering::SeqCst);
                *lg.lock().unwrap() = group.messages.len();
            },
        );

        aggregator.add(make_message(1, 1));
        aggregator.add(make_message(1, 2));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(dispatch_count.load(Ordering::SeqCst), 1);
        assert_eq!(*last_group_size.lock().unwrap(), 2);
        aggregator.stop();
    }

    #[tokio::test]
    async fn separate_chats_get_separate_groups() {
        let dispatch_count = Arc::new(AtomicUsize::new(0));
        let dc = dispatch_count.clone();
        let aggregator = MessageAggregator::spawn(
            Duration::from_millis(20),
            Duration::from_millis(5),
            move |_group| {
                dc.fetch_add(1, Ordering::SeqCst);
            },
        );

        aggregator.add(make_message(1, 1));
        aggregator.add(make_message(2, 1));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(dispatch_count.load(Ordering::SeqCst), 2);
        aggregator.stop();
    }

    #[tokio::test]
    async fn add_after_dispatch_starts_fresh_group() {
        let dispatch_count = Arc::new(AtomicUsize::new(0));
        let dc = dispatch_count.clone();
        let aggregator = MessageAggregator::spawn(
            Duration::from_millis(20),
            Duration::from_millis(5),
            move |_group| {
                dc.fetch_add(1, Ordering::SeqCst);
            },
        );

        aggregator.add(make_message(1, 1));
        tokio::time::sleep(Duration::from_millis(60)).await;
        aggregator.add(make_message(1, 2));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(dispatch_count.load(Ordering::SeqCst), 2);
        aggregator.stop();
    }
}
