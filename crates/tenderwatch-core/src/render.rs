//! Operator-facing message templates and keyboards.
//!
//! Deadlines are rendered exactly as stored: they arrive from the source
//! already in the operating region's local time.

use crate::actions::CallbackAction;
use crate::transport::{Button, Keyboard};
use crate::types::{Announcement, Lot, StatusCounts};

const DEADLINE_FORMAT: &str = "%d.%m.%Y %H:%M";

pub const START_MESSAGE: &str = "👋 Добро пожаловать в систему мониторинга госзакупок!\n\n\
Вам будут приходить объявления по вашим регионам и ключевым словам.\n\
Команды: /stats — ваша статистика, /pending — ожидающие объявления, /help — справка.";

pub const HELP_MESSAGE: &str = "ℹ️ Как работать с объявлениями:\n\n\
✅ Принять — объявление переходит к вам в работу\n\
❌ Отклонить — следующим сообщением укажите причину\n\
⏸ Отложить — объявление останется в ожидании\n\
📝 Заполнил данные — после принятия внесите данные по каждому лоту";

pub const NOT_AUTHORIZED_MESSAGE: &str = "❌ Вы не зарегистрированы в системе.";
pub const NOT_FOUND_MESSAGE: &str = "❌ Объявление не найдено или уже обработано.";
pub const ALREADY_CLAIMED_MESSAGE: &str = "⚠️ Объявление уже забрал другой менеджер.";

fn deadline_str(announcement: &Announcement) -> String {
    announcement
        .application_deadline
        .map(|d| d.format(DEADLINE_FORMAT).to_string())
        .unwrap_or_else(|| "Не указан".to_string())
}

fn lots_section(lots: &[Lot]) -> String {
    if lots.len() == 1 {
        let lot = &lots[0];
        let mut section = format!("💼 <b>Лот:</b> {}\n", lot.name);
        if !lot.description.is_empty() {
            section.push_str(&format!("📄 {}\n", lot.description));
        }
        return section;
    }

    let mut section = format!("📦 <b>Подходящих лотов в объявлении:</b> {}\n", lots.len());
    for (idx, lot) in lots.iter().enumerate() {
        section.push_str(&format!("  {}. {}\n", lot.label(idx), lot.name));
    }
    section
}

/// The announcement card sent to a manager (with action buttons) or to the
/// admin (plain copy).
pub fn format_announcement(announcement: &Announcement, for_manager: bool) -> String {
    let lots = announcement.effective_lots();
    let header = if for_manager {
        "📢 <b>Новое объявление по вашему профилю</b>"
    } else {
        "📢 <b>Новое объявление в системе</b>"
    };

    let mut message = format!(
        "{header}\n\n\
📋 <b>Номер:</b> {number}\n\
🏢 <b>Организация:</b> {org}\n\
🆔 <b>БИН:</b> {bin}\n\
📍 <b>Регион:</b> {region}\n\n\
{lots}\n\
🔑 <b>Ключевое слово:</b> {keyword}\n\
📦 <b>Способ закупки:</b> {method}\n\
⏰ <b>Срок окончания приема заявок:</b> {deadline}\n",
        header = header,
        number = announcement.announcement_number,
        org = announcement.organization_name.as_deref().unwrap_or("N/A"),
        bin = announcement.organization_bin.as_deref().unwrap_or("N/A"),
        region = announcement.region.as_deref().unwrap_or("N/A"),
        lots = lots_section(&lots),
        keyword = announcement.keyword_matched.as_deref().unwrap_or("N/A"),
        method = announcement.procurement_method.as_deref().unwrap_or("Не указан"),
        deadline = deadline_str(announcement),
    );

    if let Some(url) = &announcement.announcement_url {
        message.push_str(&format!("\n🔗 <a href='{url}'>Открыть объявление</a>"));
    }
    if !for_manager {
        if let Some(name) = &announcement.assigned_manager_name {
            message.push_str(&format!("\n\n👤 <b>Менеджер:</b> {name}"));
        } else {
            message.push_str("\n\n👥 <b>Общий регион, ожидает выбора менеджера</b>");
        }
    }
    message
}

/// Accept / reject / postpone keyboard for a single-operator lead.
pub fn announcement_keyboard(announcement_id: i64) -> Keyboard {
    Keyboard {
        rows: vec![
            vec![
                Button::new("✅ Принять", CallbackAction::Accept(announcement_id)),
                Button::new("❌ Отклонить", CallbackAction::Reject(announcement_id)),
            ],
            vec![Button::new(
                "⏸ Отложить",
                CallbackAction::Postpone(announcement_id),
            )],
        ],
    }
}

/// Claim keyboard for a shared/contested lead.
pub fn claim_keyboard(announcement_id: i64) -> Keyboard {
    Keyboard::single_row(vec![Button::new(
        "🙋 Забрать себе",
        CallbackAction::Claim(announcement_id),
    )])
}

/// Keyboard shown on an accepted, unprocessed lead.
pub fn accepted_keyboard(announcement_id: i64) -> Keyboard {
    Keyboard::single_row(vec![Button::new(
        "📝 Заполнил данные",
        CallbackAction::Process(announcement_id),
    )])
}

/// Remaining-lot chooser for the participation conversation.
pub fn lot_selection_keyboard(announcement_id: i64, remaining: &[(usize, Lot)]) -> Keyboard {
    let mut buttons: Vec<Button> = remaining
        .iter()
        .map(|(index, lot)| {
            let mut name = lot.name.clone();
            if name.chars().count() > 40 {
                name = name.chars().take(40).collect::<String>() + "…";
            }
            Button::new(
                format!("Лот {}: {}", lot.label(*index), name),
                CallbackAction::SelectLot(announcement_id, *index),
            )
        })
        .collect();
    buttons.push(Button::new(
        "↩️ Отмена",
        CallbackAction::CancelParticipation(announcement_id),
    ));
    Keyboard::column(buttons)
}

pub fn format_accepted_notice(announcement_number: &str, manager_name: &str) -> String {
    format!(
        "✅ <b>Объявление принято</b>\n\n\
📋 Номер: {announcement_number}\n\
👤 Менеджер: {manager_name}"
    )
}

pub fn format_rejected_notice(
    announcement_number: &str,
    manager_name: &str,
    reason: &str,
) -> String {
    format!(
        "❌ <b>Объявление отклонено</b>\n\n\
📋 Номер: {announcement_number}\n\
👤 Менеджер: {manager_name}\n\
📝 Причина: {reason}"
    )
}

pub fn format_coordinator_notice(announcement: &Announcement, manager_name: &str) -> String {
    format!(
        "📥 <b>Объявление взято в работу</b>\n\n\
📋 Номер: {number}\n\
👤 Менеджер: {manager_name}\n\
⏰ Срок окончания приема заявок: {deadline}",
        number = announcement.announcement_number,
        deadline = deadline_str(announcement),
    )
}

pub fn format_deadline_reminder(announcement: &Announcement, hours_left: i64) -> String {
    let (urgency_emoji, urgency_text) = if hours_left <= 2 {
        ("🚨", "СРОЧНО!")
    } else if hours_left <= 24 {
        ("⚠️", "ВНИМАНИЕ!")
    } else {
        ("⏰", "Напоминание")
    };

    let mut message = format!(
        "{urgency_emoji} <b>{urgency_text}</b>\n\n\
До окончания срока подачи заявок осталось <b>{hours_left} ч</b>\n\n\
📋 <b>Объявление:</b>\n{number}\n\n",
        number = announcement.announcement_number,
    );
    if let Some(org) = &announcement.organization_name {
        message.push_str(&format!("🏢 <b>Заказчик:</b>\n{org}\n\n"));
    }
    if let Some(region) = &announcement.region {
        message.push_str(&format!("📍 <b>Регион:</b> {region}\n\n"));
    }
    message.push_str(&format!("⏱ <b>Дедлайн:</b> {}", deadline_str(announcement)));
    if let Some(url) = &announcement.announcement_url {
        message.push_str(&format!("\n\n🔗 <a href='{url}'>Открыть объявление</a>"));
    }
    message
}

pub fn format_stats(manager_name: &str, counts: &StatusCounts) -> String {
    format!(
        "📊 <b>Статистика — {manager_name}</b>\n\n\
Всего объявлений: <b>{total}</b>\n\
⏳ Ожидают: {pending}\n\
✅ Принято: {accepted}\n\
❌ Отклонено: {rejected}\n\
⌛️ Истекло: {expired}\n\
🔄 Обработано: {processed}",
        total = counts.total,
        pending = counts.pending,
        accepted = counts.accepted,
        rejected = counts.rejected,
        expired = counts.expired,
        processed = counts.processed,
    )
}

pub fn format_pending_list(announcements: &[Announcement]) -> String {
    if announcements.is_empty() {
        return "📭 Нет ожидающих объявлений.".to_string();
    }
    let mut message = format!(
        "⏳ <b>Ожидающие объявления</b> ({})\n\n",
        announcements.len()
    );
    for announcement in announcements {
        message.push_str(&format!(
            "📋 {} — {}\n   ⏰ {}\n",
            announcement.announcement_number,
            announcement.region.as_deref().unwrap_or("N/A"),
            deadline_str(announcement),
        ));
    }
    message
}

pub fn format_in_work_list(announcements: &[Announcement]) -> String {
    if announcements.is_empty() {
        return "📋 <b>Объявления в работе</b>\n\nНет объявлений в работе с действующим сроком."
            .to_string();
    }
    let mut message = format!(
        "📋 <b>Объявления в работе</b> ({})\n\n",
        announcements.len()
    );
    for announcement in announcements {
        message.push_str(&format!(
            "📋 {} — 👤 {}\n   ⏰ {}\n",
            announcement.announcement_number,
            announcement.assigned_manager_name.as_deref().unwrap_or("N/A"),
            deadline_str(announcement),
        ));
    }
    message
}

pub fn format_lot_prompt(lot: &Lot, index: usize) -> String {
    let mut message = format!(
        "📝 <b>Лот {}</b>\n{}\n\n",
        lot.label(index),
        lot.name
    );
    if !lot.description.is_empty() {
        message.push_str(&format!("📄 {}\n\n", lot.description));
    }
    message.push_str("Отправьте информацию об участии по этому лоту одним сообщением.");
    message
}

pub fn format_remaining_prompt(remaining: usize) -> String {
    format!("Осталось заполнить лотов: <b>{remaining}</b>. Выберите следующий:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use sqlx::types::Json;
    use crate::types::AnnouncementStatus;

    fn sample() -> Announcement {
        Announcement {
            id: 7,
            announcement_number: "ANN-001".into(),
            announcement_url: Some("https://portal/announce/7".into()),
            organization_name: Some("ТОО Пример".into()),
            organization_bin: Some("123456789012".into()),
            legal_address: Some("г. Алматы, ул. Абая 1".into()),
            region: Some("г. Алматы".into()),
            lots: Json(vec![
                Lot {
                    number: Some("1".into()),
                    name: "Аренда помещения".into(),
                    description: "Аренда офиса".into(),
                    keyword: "аренда".into(),
                },
                Lot {
                    number: Some("2".into()),
                    name: "Аренда склада".into(),
                    description: String::new(),
                    keyword: "аренда".into(),
                },
            ]),
            procurement_method: Some("Запрос ценовых предложений".into()),
            keyword_matched: Some("аренда".into()),
            assigned_manager_id: Some(1),
            assigned_manager_name: Some("Айгерим".into()),
            status: AnnouncementStatus::Pending,
            is_processed: false,
            rejection_reason: None,
            participation_details: None,
            participation_details_draft: None,
            notification_sent: false,
            reminder_48h_sent: false,
            reminder_24h_sent: false,
            reminder_2h_sent: false,
            application_deadline: NaiveDate::from_ymd_opt(2026, 3, 15)
                .and_then(|d| d.and_hms_opt(18, 30, 0)),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            response_at: None,
            expired_at: None,
        }
    }

    #[test]
    fn card_renders_deadline_as_stored_local_time() {
        let message = format_announcement(&sample(), true);
        assert!(message.contains("15.03.2026 18:30"));
        assert!(message.contains("ANN-001"));
        assert!(message.contains("Подходящих лотов в объявлении:</b> 2"));
    }

    #[test]
    fn reminder_urgency_tiers() {
        let announcement = sample();
        assert!(format_deadline_reminder(&announcement, 2).contains("СРОЧНО"));
        assert!(format_deadline_reminder(&announcement, 24).contains("ВНИМАНИЕ"));
        assert!(format_deadline_reminder(&announcement, 48).contains("Напоминание"));
    }

    #[test]
    fn lot_selection_keyboard_has_cancel_row() {
        let lots = sample().effective_lots();
        let remaining: Vec<(usize, Lot)> = lots.into_iter().enumerate().collect();
        let keyboard = lot_selection_keyboard(7, &remaining);
        assert_eq!(keyboard.rows.len(), 3);
        assert_eq!(
            keyboard.rows.last().unwrap()[0].action,
            CallbackAction::CancelParticipation(7)
        );
    }
}
