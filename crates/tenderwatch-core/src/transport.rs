use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::actions::CallbackAction;

pub type ChatId = i64;
pub type MessageId = i64;

#[derive(Error, Debug)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub action: CallbackAction,
}

impl Button {
    pub fn new(text: impl Into<String>, action: CallbackAction) -> Self {
        Self {
            text: text.into(),
            action,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn single_row(buttons: Vec<Button>) -> Self {
        Self {
            rows: vec![buttons],
        }
    }

    pub fn column(buttons: Vec<Button>) -> Self {
        Self {
            rows: buttons.into_iter().map(|b| vec![b]).collect(),
        }
    }
}

/// Inbound chat events as the dispatcher sees them. The transport layer is
/// responsible for turning platform updates into these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Command {
        chat: ChatId,
        name: String,
    },
    Text {
        chat: ChatId,
        message_id: MessageId,
        text: String,
    },
    Callback {
        chat: ChatId,
        message_id: MessageId,
        callback_id: String,
        token: String,
    },
}

/// Capability interface over the chat platform. Delivery is at-least-once
/// from the system's point of view; every call site treats failures as
/// loggable, not fatal.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageId, TransportError>;

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError>;

    async fn delete_message(&self, chat: ChatId, message: MessageId)
        -> Result<(), TransportError>;

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: &str,
        alert: bool,
    ) -> Result<(), TransportError>;
}

/// Transport that only logs outbound traffic. Used by `serve` until a real
/// platform adapter is wired in, and handy in local smoke runs.
pub struct TracingTransport;

#[async_trait]
impl ChatTransport for TracingTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageId, TransportError> {
        tracing::info!(chat, buttons = keyboard.map(|k| k.rows.len()).unwrap_or(0), %text, "outbound message");
        Ok(0)
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        _keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        tracing::info!(chat, message, %text, "outbound edit");
        Ok(())
    }

    async fn delete_message(
        &self,
        chat: ChatId,
        message: MessageId,
    ) -> Result<(), TransportError> {
        tracing::info!(chat, message, "outbound delete");
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: &str,
        alert: bool,
    ) -> Result<(), TransportError> {
        tracing::info!(callback_id, %text, alert, "callback answered");
        Ok(())
    }
}

/// Everything a [`RecordingTransport`] has been asked to send.
#[derive(Debug, Clone, PartialEq)]
pub enum SentItem {
    Message {
        chat: ChatId,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Edit {
        chat: ChatId,
        message: MessageId,
        text: String,
    },
    Delete {
        chat: ChatId,
        message: MessageId,
    },
    CallbackAnswer {
        callback_id: String,
        text: String,
        alert: bool,
    },
}

/// In-memory transport double for tests: records every outbound operation
/// and can be told to fail sends to particular chats.
#[derive(Default)]
pub struct RecordingTransport {
    state: Mutex<RecordingState>,
}

#[derive(Default)]
struct RecordingState {
    sent: Vec<SentItem>,
    unreachable: Vec<ChatId>,
    next_message_id: MessageId,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// All sends to this chat will fail from now on, like a recipient who
    /// never opened a conversation with the bot.
    pub async fn mark_unreachable(&self, chat: ChatId) {
        self.state.lock().await.unreachable.push(chat);
    }

    pub async fn sent(&self) -> Vec<SentItem> {
        self.state.lock().await.sent.clone()
    }

    pub async fn messages_to(&self, chat: ChatId) -> Vec<String> {
        self.state
            .lock()
            .await
            .sent
            .iter()
            .filter_map(|item| match item {
                SentItem::Message {
                    chat: c, text: t, ..
                } if *c == chat => Some(t.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageId, TransportError> {
        let mut state = self.state.lock().await;
        if state.unreachable.contains(&chat) {
            return Err(TransportError::new(format!("chat {chat} unreachable")));
        }
        state.next_message_id += 1;
        let id = state.next_message_id;
        state.sent.push(SentItem::Message {
            chat,
            text: text.to_string(),
            keyboard,
        });
        Ok(id)
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        _keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        self.state.lock().await.sent.push(SentItem::Edit {
            chat,
            message,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(
        &self,
        chat: ChatId,
        message: MessageId,
    ) -> Result<(), TransportError> {
        self.state
            .lock()
            .await
            .sent
            .push(SentItem::Delete { chat, message });
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: &str,
        alert: bool,
    ) -> Result<(), TransportError> {
        self.state.lock().await.sent.push(SentItem::CallbackAnswer {
            callback_id: callback_id.to_string(),
            text: text.to_string(),
            alert,
        });
        Ok(())
    }
}
