use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::actions::CallbackAction;
use crate::config::{AppConfig, Operator, Role, RoleTable};
use crate::conversation::LotProgress;
use crate::db::DbPool;
use crate::error::Result;
use crate::lifecycle::{ClaimOutcome, Lifecycle, TransitionOutcome};
use crate::render;
use crate::sessions::{SessionState, SessionStore};
use crate::store::announcements;
use crate::transport::{ChatId, ChatTransport, InboundEvent, MessageId};
use crate::types::{Announcement, AnnouncementStatus};

/// Routes inbound chat events to the lifecycle machine, the participation
/// conversation, and the read-only command views. Authorization against the
/// static role table happens here, identically for every entry point.
pub struct Dispatcher {
    pool: DbPool,
    config: Arc<AppConfig>,
    roles: Arc<RoleTable>,
    transport: Arc<dyn ChatTransport>,
    sessions: Arc<dyn SessionStore>,
    lifecycle: Arc<Lifecycle>,
}

impl Dispatcher {
    pub fn new(
        pool: DbPool,
        config: Arc<AppConfig>,
        roles: Arc<RoleTable>,
        transport: Arc<dyn ChatTransport>,
        sessions: Arc<dyn SessionStore>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            pool,
            config,
            roles,
            transport,
            sessions,
            lifecycle,
        }
    }

    pub async fn handle(&self, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::Command { chat, name } => self.handle_command(chat, &name).await,
            InboundEvent::Text {
                chat,
                message_id,
                text,
            } => self.handle_text(chat, message_id, &text).await,
            InboundEvent::Callback {
                chat,
                message_id,
                callback_id,
                token,
            } => {
                self.handle_callback(chat, message_id, &callback_id, &token)
                    .await
            }
        }
    }

    async fn reply(&self, chat: ChatId, text: &str) {
        if let Err(err) = self.transport.send_message(chat, text, None).await {
            warn!(chat, error = %err, "reply send failed");
        }
    }

    async fn answer(&self, callback_id: &str, text: &str, alert: bool) {
        if let Err(err) = self.transport.answer_callback(callback_id, text, alert).await {
            warn!(callback_id, error = %err, "callback answer failed");
        }
    }

    async fn handle_command(&self, chat: ChatId, name: &str) -> Result<()> {
        let Some(role) = self.roles.resolve(chat) else {
            debug!(chat, command = name, "command from unknown chat identity");
            self.reply(chat, render::NOT_AUTHORIZED_MESSAGE).await;
            return Ok(());
        };

        match (name, role) {
            ("/start", Role::Operator(_)) => self.reply(chat, render::START_MESSAGE).await,
            ("/start", _) => {
                self.reply(chat, "👋 Добро пожаловать! Команда: /inwork — объявления в работе.")
                    .await
            }
            ("/help", _) => self.reply(chat, render::HELP_MESSAGE).await,
            ("/stats", Role::Operator(operator)) => {
                let counts = announcements::stats_for_manager(&self.pool, operator.id).await?;
                self.reply(chat, &render::format_stats(&operator.name, &counts))
                    .await;
            }
            ("/stats", Role::Admin) => {
                let counts = announcements::overall_stats(&self.pool).await?;
                self.reply(chat, &render::format_stats("все менеджеры", &counts))
                    .await;
            }
            ("/pending", Role::Operator(operator)) => {
                let pending = announcements::pending_for_manager(&self.pool, operator.id).await?;
                self.reply(chat, &render::format_pending_list(&pending)).await;
            }
            ("/inwork", Role::Admin | Role::Coordinator) => {
                let now_local = Utc::now()
                    .with_timezone(&self.config.timezone)
                    .naive_local();
                let in_work = announcements::in_work(&self.pool, now_local).await?;
                self.reply(chat, &render::format_in_work_list(&in_work)).await;
            }
            _ => {
                self.reply(chat, "Неизвестная команда. /help — справка.")
                    .await
            }
        }
        Ok(())
    }

    async fn handle_text(&self, chat: ChatId, message_id: MessageId, text: &str) -> Result<()> {
        let role = self.roles.resolve(chat);
        let Some(Role::Operator(operator)) = role else {
            match role {
                Some(_) => {
                    self.reply(chat, "Используйте команды: /inwork, /stats, /help.")
                        .await
                }
                None => self.reply(chat, render::NOT_AUTHORIZED_MESSAGE).await,
            }
            return Ok(());
        };
        let operator = operator.clone();

        match self.sessions.get(chat).await {
            Some(SessionState::AwaitingRejectReason { announcement_id }) => {
                self.sessions.clear(chat).await;
                // The next message is the reason, whatever it says.
                match self
                    .lifecycle
                    .reject(&operator, announcement_id, text)
                    .await?
                {
                    TransitionOutcome::Done(_) => {
                        self.reply(
                            chat,
                            &format!("❌ Объявление отклонено.\n\n📝 Причина: {text}"),
                        )
                        .await;
                    }
                    TransitionOutcome::NotFound => {
                        self.reply(chat, render::NOT_FOUND_MESSAGE).await;
                    }
                }
            }
            Some(SessionState::AwaitingLotDetails {
                announcement_id,
                lot_index,
                mut progress,
            }) => {
                progress.record_entry(lot_index, text);
                // Draft first: an interruption after this point loses nothing.
                announcements::save_draft(&self.pool, announcement_id, &progress.to_draft())
                    .await?;
                // UX cleanliness: the raw entry disappears from the chat.
                if let Err(err) = self.transport.delete_message(chat, message_id).await {
                    debug!(chat, message_id, error = %err, "could not delete entry message");
                }

                if progress.is_complete() {
                    self.finish_participation(chat, &operator, announcement_id, &progress)
                        .await?;
                } else {
                    self.prompt_lot_selection(chat, announcement_id, &progress)
                        .await;
                }
            }
            Some(SessionState::SelectingLot { .. }) | None => {
                self.reply(chat, "Выберите действие кнопками под объявлением. /help — справка.")
                    .await;
            }
        }
        Ok(())
    }

    async fn handle_callback(
        &self,
        chat: ChatId,
        message_id: MessageId,
        callback_id: &str,
        token: &str,
    ) -> Result<()> {
        let Some(action) = CallbackAction::decode(token) else {
            warn!(chat, token, "undecodable callback token");
            self.answer(callback_id, "Устаревшая кнопка", true).await;
            return Ok(());
        };

        let Some(Role::Operator(operator)) = self.roles.resolve(chat) else {
            self.answer(callback_id, render::NOT_AUTHORIZED_MESSAGE, true)
                .await;
            return Ok(());
        };
        let operator = operator.clone();

        match action {
            CallbackAction::Accept(id) => {
                match self.lifecycle.accept(&operator, id).await? {
                    TransitionOutcome::Done(announcement) => {
                        let text = format!(
                            "{}\n\n✅ <b>Статус: ПРИНЯТО</b>",
                            render::format_announcement(&announcement, true)
                        );
                        if let Err(err) = self
                            .transport
                            .edit_message(
                                chat,
                                message_id,
                                &text,
                                Some(render::accepted_keyboard(id)),
                            )
                            .await
                        {
                            debug!(chat, message_id, error = %err, "edit after accept failed");
                        }
                        self.answer(callback_id, "✅ Объявление принято в работу!", true)
                            .await;
                    }
                    TransitionOutcome::NotFound => {
                        self.answer(callback_id, render::NOT_FOUND_MESSAGE, true).await;
                    }
                }
            }
            CallbackAction::Reject(id) => {
                match self.owned_announcement(&operator, id).await? {
                    Some(announcement) if announcement.status == AnnouncementStatus::Pending => {
                        self.sessions
                            .set(
                                chat,
                                SessionState::AwaitingRejectReason { announcement_id: id },
                            )
                            .await;
                        self.reply(chat, "📝 Пожалуйста, укажите причину отказа:").await;
                        self.answer(callback_id, "", false).await;
                    }
                    _ => {
                        self.answer(callback_id, render::NOT_FOUND_MESSAGE, true).await;
                    }
                }
            }
            CallbackAction::Claim(id) => match self.lifecycle.claim(&operator, id).await? {
                ClaimOutcome::Claimed(announcement) => {
                    let text = format!(
                        "{}\n\n🙋 <b>Закреплено за вами</b>",
                        render::format_announcement(&announcement, true)
                    );
                    if let Err(err) = self
                        .transport
                        .edit_message(
                            chat,
                            message_id,
                            &text,
                            Some(render::announcement_keyboard(id)),
                        )
                        .await
                    {
                        debug!(chat, message_id, error = %err, "edit after claim failed");
                    }
                    self.answer(callback_id, "🙋 Объявление закреплено за вами!", true)
                        .await;
                }
                ClaimOutcome::AlreadyClaimed => {
                    self.answer(callback_id, render::ALREADY_CLAIMED_MESSAGE, true)
                        .await;
                }
                ClaimOutcome::NotFound => {
                    self.answer(callback_id, render::NOT_FOUND_MESSAGE, true).await;
                }
            },
            CallbackAction::Postpone(id) => {
                match self
                    .lifecycle
                    .record_view(&operator, id, Some("postponed"))
                    .await?
                {
                    TransitionOutcome::Done(_) => {
                        self.answer(callback_id, "⏸ Объявление отложено", false).await;
                    }
                    TransitionOutcome::NotFound => {
                        self.answer(callback_id, render::NOT_FOUND_MESSAGE, true).await;
                    }
                }
            }
            CallbackAction::Process(id) => {
                self.start_participation(chat, callback_id, &operator, id)
                    .await?;
            }
            CallbackAction::View(id) => {
                match self.lifecycle.record_view(&operator, id, None).await? {
                    TransitionOutcome::Done(announcement) => {
                        self.reply(chat, &render::format_announcement(&announcement, true))
                            .await;
                        self.answer(callback_id, "", false).await;
                    }
                    TransitionOutcome::NotFound => {
                        self.answer(callback_id, render::NOT_FOUND_MESSAGE, true).await;
                    }
                }
            }
            CallbackAction::SelectLot(id, lot_index) => {
                match self.sessions.get(chat).await {
                    Some(SessionState::SelectingLot {
                        announcement_id,
                        progress,
                    }) if announcement_id == id => {
                        match progress.lot(lot_index) {
                            Some(lot) if progress.entry(lot_index).is_none() => {
                                let prompt = render::format_lot_prompt(lot, lot_index);
                                self.sessions
                                    .set(
                                        chat,
                                        SessionState::AwaitingLotDetails {
                                            announcement_id: id,
                                            lot_index,
                                            progress,
                                        },
                                    )
                                    .await;
                                self.reply(chat, &prompt).await;
                                self.answer(callback_id, "", false).await;
                            }
                            _ => {
                                self.answer(callback_id, "Лот уже заполнен", false).await;
                            }
                        }
                    }
                    _ => {
                        self.answer(callback_id, "Сессия ввода не активна", true).await;
                    }
                }
            }
            CallbackAction::CancelParticipation(_) => {
                // Entered lots are already in the draft; nothing is lost.
                self.sessions.clear(chat).await;
                self.reply(chat, "↩️ Ввод приостановлен, заполненные лоты сохранены.")
                    .await;
                self.answer(callback_id, "", false).await;
            }
        }
        Ok(())
    }

    /// Enter (or resume) the participation conversation for an accepted,
    /// unprocessed lead owned by this operator. Progress is re-derived from
    /// the persisted draft, so a restart mid-flow asks only for lots that
    /// have no entry yet.
    async fn start_participation(
        &self,
        chat: ChatId,
        callback_id: &str,
        operator: &Operator,
        announcement_id: i64,
    ) -> Result<()> {
        let announcement = match self.owned_announcement(operator, announcement_id).await? {
            Some(a) if a.status == AnnouncementStatus::Accepted && !a.is_processed => a,
            _ => {
                self.answer(callback_id, render::NOT_FOUND_MESSAGE, true).await;
                return Ok(());
            }
        };

        let lots = announcement.effective_lots();
        let progress = match &announcement.participation_details_draft {
            Some(draft) => LotProgress::from_draft(lots, draft),
            None => LotProgress::new(lots),
        };

        if progress.is_complete() {
            // Every lot was already drafted before the interruption.
            self.finish_participation(chat, operator, announcement_id, &progress)
                .await?;
        } else {
            self.prompt_lot_selection(chat, announcement_id, &progress).await;
        }
        self.answer(callback_id, "", false).await;
        Ok(())
    }

    async fn prompt_lot_selection(
        &self,
        chat: ChatId,
        announcement_id: i64,
        progress: &LotProgress,
    ) {
        let remaining = progress.remaining();
        let text = render::format_remaining_prompt(remaining.len());
        let keyboard = render::lot_selection_keyboard(announcement_id, &remaining);
        if let Err(err) = self
            .transport
            .send_message(chat, &text, Some(keyboard))
            .await
        {
            warn!(chat, error = %err, "lot selection prompt failed");
        }
        self.sessions
            .set(
                chat,
                SessionState::SelectingLot {
                    announcement_id,
                    progress: progress.clone(),
                },
            )
            .await;
    }

    async fn finish_participation(
        &self,
        chat: ChatId,
        operator: &Operator,
        announcement_id: i64,
        progress: &LotProgress,
    ) -> Result<()> {
        self.sessions.clear(chat).await;
        match self
            .lifecycle
            .finalize_participation(operator, announcement_id, progress)
            .await?
        {
            TransitionOutcome::Done(announcement) => {
                self.reply(
                    chat,
                    &format!(
                        "🔄 <b>Данные по объявлению {} сохранены.</b>\n\nЗаполнено лотов: {}",
                        announcement.announcement_number,
                        progress.lots().len()
                    ),
                )
                .await;
            }
            TransitionOutcome::NotFound => {
                self.reply(chat, render::NOT_FOUND_MESSAGE).await;
            }
        }
        Ok(())
    }

    /// Fetch the announcement only if it is assigned to this operator.
    async fn owned_announcement(
        &self,
        operator: &Operator,
        announcement_id: i64,
    ) -> Result<Option<Announcement>> {
        let announcement = announcements::get(&self.pool, announcement_id).await?;
        Ok(announcement.filter(|a| a.assigned_manager_id == Some(operator.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::mirror::NullMirror;
    use crate::notifier::Notifier;
    use crate::sessions::InMemorySessions;
    use crate::transport::{RecordingTransport, SentItem};

    fn dispatcher_with(transport: Arc<RecordingTransport>) -> Dispatcher {
        let config = Arc::new(test_config());
        let roles = Arc::new(config.role_table());
        // Lazy pool: these tests never touch the database.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://unused@localhost/unused")
            .expect("lazy pool");
        let notifier = Arc::new(Notifier::new(
            transport.clone(),
            config.admin_chat_id,
            config.coordinator_chat_id,
        ));
        let lifecycle = Arc::new(Lifecycle::new(
            pool.clone(),
            notifier,
            Arc::new(NullMirror),
            config.timezone,
        ));
        Dispatcher::new(
            pool,
            config,
            roles,
            transport,
            Arc::new(InMemorySessions::new()),
            lifecycle,
        )
    }

    #[tokio::test]
    async fn unknown_identity_is_turned_away() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = dispatcher_with(transport.clone());

        dispatcher
            .handle(InboundEvent::Command {
                chat: 555,
                name: "/stats".into(),
            })
            .await
            .expect("handled");

        let messages = transport.messages_to(555).await;
        assert_eq!(messages, vec![render::NOT_AUTHORIZED_MESSAGE.to_string()]);
    }

    #[tokio::test]
    async fn unknown_callback_identity_gets_alert_and_no_state_change() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = dispatcher_with(transport.clone());

        dispatcher
            .handle(InboundEvent::Callback {
                chat: 555,
                message_id: 1,
                callback_id: "cb1".into(),
                token: "accept_1".into(),
            })
            .await
            .expect("handled");

        let sent = transport.sent().await;
        assert_eq!(
            sent,
            vec![SentItem::CallbackAnswer {
                callback_id: "cb1".into(),
                text: render::NOT_AUTHORIZED_MESSAGE.into(),
                alert: true,
            }]
        );
    }

    #[tokio::test]
    async fn undecodable_token_is_answered_politely() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = dispatcher_with(transport.clone());

        dispatcher
            .handle(InboundEvent::Callback {
                chat: 1001,
                message_id: 1,
                callback_id: "cb2".into(),
                token: "bogus_token_zz".into(),
            })
            .await
            .expect("handled");

        let sent = transport.sent().await;
        assert!(matches!(
            &sent[0],
            SentItem::CallbackAnswer { alert: true, .. }
        ));
    }

    #[tokio::test]
    async fn operator_start_gets_welcome() {
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = dispatcher_with(transport.clone());

        dispatcher
            .handle(InboundEvent::Command {
                chat: 1001,
                name: "/start".into(),
            })
            .await
            .expect("handled");

        let messages = transport.messages_to(1001).await;
        assert_eq!(messages, vec![render::START_MESSAGE.to_string()]);
    }
}
