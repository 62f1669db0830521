use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::conversation::LotProgress;
use crate::transport::ChatId;

/// Per-chat conversation state. One operator drives at most one multi-step
/// flow at a time because the chat platform delivers their messages in order
/// to a single handler.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// A reject button was pressed; the next free-text message is the reason.
    AwaitingRejectReason { announcement_id: i64 },
    /// Participation conversation: choosing which unfilled lot to enter next.
    SelectingLot {
        announcement_id: i64,
        progress: LotProgress,
    },
    /// Participation conversation: the next free-text message is this lot's
    /// entry, verbatim.
    AwaitingLotDetails {
        announcement_id: i64,
        lot_index: usize,
        progress: LotProgress,
    },
}

/// Injectable session storage. The in-memory map is sufficient for the
/// single-process deployment; the interface makes no assumption about the
/// backing store so a shared one could be swapped in later.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, chat: ChatId) -> Option<SessionState>;
    async fn set(&self, chat: ChatId, state: SessionState);
    async fn clear(&self, chat: ChatId);
}

#[derive(Default)]
pub struct InMemorySessions {
    states: Mutex<HashMap<ChatId, SessionState>>,
}

impl InMemorySessions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessions {
    async fn get(&self, chat: ChatId) -> Option<SessionState> {
        self.states.lock().await.get(&chat).cloned()
    }

    async fn set(&self, chat: ChatId, state: SessionState) {
        self.states.lock().await.insert(chat, state);
    }

    async fn clear(&self, chat: ChatId) {
        self.states.lock().await.remove(&chat);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_clear_round_trip() {
        let sessions = InMemorySessions::new();
        assert_eq!(sessions.get(5).await, None);

        sessions
            .set(5, SessionState::AwaitingRejectReason { announcement_id: 9 })
            .await;
        assert_eq!(
            sessions.get(5).await,
            Some(SessionState::AwaitingRejectReason { announcement_id: 9 })
        );

        sessions.clear(5).await;
        assert_eq!(sessions.get(5).await, None);
    }
}
