use std::sync::Arc;

use tracing::warn;

use crate::config::Operator;
use crate::render;
use crate::transport::{ChatId, ChatTransport, Keyboard};
use crate::types::Announcement;

/// Best-effort fan-out over the chat transport. Every send failure is logged
/// and swallowed here; callers only learn whether at least someone got the
/// message, never an error that could abort their own transaction.
pub struct Notifier {
    transport: Arc<dyn ChatTransport>,
    admin_chat_id: Option<ChatId>,
    coordinator_chat_id: Option<ChatId>,
}

impl Notifier {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        admin_chat_id: Option<ChatId>,
        coordinator_chat_id: Option<ChatId>,
    ) -> Self {
        Self {
            transport,
            admin_chat_id,
            coordinator_chat_id,
        }
    }

    async fn try_send(&self, chat: ChatId, text: &str, keyboard: Option<Keyboard>) -> bool {
        match self.transport.send_message(chat, text, keyboard).await {
            Ok(_) => true,
            Err(err) => {
                // A recipient who never opened a conversation looks like this.
                warn!(chat, error = %err, "notification send failed");
                false
            }
        }
    }

    /// Assignment notification for a single-operator lead.
    pub async fn send_lead_to_manager(
        &self,
        operator: &Operator,
        announcement: &Announcement,
    ) -> bool {
        let text = render::format_announcement(announcement, true);
        self.try_send(
            operator.chat_id,
            &text,
            Some(render::announcement_keyboard(announcement.id)),
        )
        .await
    }

    /// Claim notification for a shared lead, fanned out to every matched
    /// operator. Returns how many recipients accepted delivery.
    pub async fn send_claim_to_managers(
        &self,
        operators: &[&Operator],
        announcement: &Announcement,
    ) -> usize {
        let text = render::format_announcement(announcement, true);
        let mut delivered = 0;
        for operator in operators {
            if self
                .try_send(
                    operator.chat_id,
                    &text,
                    Some(render::claim_keyboard(announcement.id)),
                )
                .await
            {
                delivered += 1;
            }
        }
        delivered
    }

    pub async fn send_admin(&self, text: &str) -> bool {
        match self.admin_chat_id {
            Some(chat) => self.try_send(chat, text, None).await,
            None => false,
        }
    }

    pub async fn send_coordinator(&self, text: &str) -> bool {
        match self.coordinator_chat_id {
            Some(chat) => self.try_send(chat, text, None).await,
            None => false,
        }
    }

    pub async fn send_reminder(
        &self,
        operator_chat: ChatId,
        announcement: &Announcement,
        hours_left: i64,
    ) -> bool {
        let text = render::format_deadline_reminder(announcement, hours_left);
        self.try_send(operator_chat, &text, None).await
    }
}
