use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
    decode::Decode,
    encode::{Encode, IsNull},
    postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef},
    types::{Json, Type},
    FromRow, Postgres,
};
use std::error::Error as StdError;
use std::fmt;

/// One sub-item of an announcement. Announcements with no lots from the
/// source collapse to a single implicit lot (see [`Announcement::effective_lots`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    /// External lot number when the source provides one.
    pub number: Option<String>,
    pub name: String,
    pub description: String,
    /// The keyword this lot matched during the search.
    pub keyword: String,
}

impl Lot {
    /// Display label: the external lot number, or the 1-based ordinal.
    pub fn label(&self, index: usize) -> String {
        match &self.number {
            Some(number) if !number.trim().is_empty() => number.trim().to_string(),
            _ => (index + 1).to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnouncementStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl AnnouncementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnouncementStatus::Pending => "pending",
            AnnouncementStatus::Accepted => "accepted",
            AnnouncementStatus::Rejected => "rejected",
            AnnouncementStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        match s {
            "pending" => Ok(AnnouncementStatus::Pending),
            "accepted" => Ok(AnnouncementStatus::Accepted),
            "rejected" => Ok(AnnouncementStatus::Rejected),
            "expired" => Ok(AnnouncementStatus::Expired),
            _ => Err(format!("invalid announcement status: {}", s).into()),
        }
    }

    /// Human-readable label used in the mirror sheet and chat views.
    pub fn label_ru(&self) -> &'static str {
        match self {
            AnnouncementStatus::Pending => "Ожидает",
            AnnouncementStatus::Accepted => "Принято",
            AnnouncementStatus::Rejected => "Отклонено",
            AnnouncementStatus::Expired => "Истекло",
        }
    }
}

impl fmt::Display for AnnouncementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Type<Postgres> for AnnouncementStatus {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

impl Encode<'_, Postgres> for AnnouncementStatus {
    fn encode_by_ref(
        &self,
        buf: &mut PgArgumentBuffer,
    ) -> Result<IsNull, Box<dyn StdError + Send + Sync + 'static>> {
        <String as Encode<Postgres>>::encode(self.as_str().to_string(), buf)
    }
}

impl Decode<'_, Postgres> for AnnouncementStatus {
    fn decode(value: PgValueRef<'_>) -> Result<Self, Box<dyn StdError + Send + Sync + 'static>> {
        let s = <&str as Decode<Postgres>>::decode(value)?;
        AnnouncementStatus::parse(s)
    }
}

/// A procurement lead, from discovery through its terminal status.
///
/// Timestamp families are deliberately asymmetric: `application_deadline`
/// arrives from the source already in the operating region's local time and
/// is stored naive, never converted; every other timestamp is UTC.
#[derive(Debug, Clone, FromRow)]
pub struct Announcement {
    pub id: i64,
    pub announcement_number: String,
    pub announcement_url: Option<String>,
    pub organization_name: Option<String>,
    pub organization_bin: Option<String>,
    pub legal_address: Option<String>,
    pub region: Option<String>,
    pub lots: Json<Vec<Lot>>,
    pub procurement_method: Option<String>,
    pub keyword_matched: Option<String>,
    /// NULL means the lead is shared and still unclaimed.
    pub assigned_manager_id: Option<i64>,
    pub assigned_manager_name: Option<String>,
    pub status: AnnouncementStatus,
    pub is_processed: bool,
    pub rejection_reason: Option<String>,
    pub participation_details: Option<String>,
    pub participation_details_draft: Option<String>,
    pub notification_sent: bool,
    pub reminder_48h_sent: bool,
    pub reminder_24h_sent: bool,
    pub reminder_2h_sent: bool,
    pub application_deadline: Option<NaiveDateTime>,
    pub created_at: DateTime<Utc>,
    pub response_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl Announcement {
    /// The lot list used everywhere downstream: the stored lots, or a single
    /// synthetic lot when the source provided none.
    pub fn effective_lots(&self) -> Vec<Lot> {
        if !self.lots.0.is_empty() {
            return self.lots.0.clone();
        }
        vec![Lot {
            number: None,
            name: self
                .organization_name
                .clone()
                .unwrap_or_else(|| self.announcement_number.clone()),
            description: String::new(),
            keyword: self.keyword_matched.clone().unwrap_or_default(),
        }]
    }
}

/// Fields needed to persist a newly discovered announcement.
#[derive(Debug, Clone)]
pub struct NewAnnouncement {
    pub announcement_number: String,
    pub announcement_url: Option<String>,
    pub organization_name: Option<String>,
    pub organization_bin: Option<String>,
    pub legal_address: Option<String>,
    pub region: Option<String>,
    pub lots: Vec<Lot>,
    pub procurement_method: Option<String>,
    pub keyword_matched: Option<String>,
    /// `Some` for a single-operator lead; `None` for a shared/contested one.
    pub assignment: Option<(i64, String)>,
    pub application_deadline: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Accepted,
    Rejected,
    Processed,
    Viewed,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Accepted => "accepted",
            ActionKind::Rejected => "rejected",
            ActionKind::Processed => "processed",
            ActionKind::Viewed => "viewed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        match s {
            "accepted" => Ok(ActionKind::Accepted),
            "rejected" => Ok(ActionKind::Rejected),
            "processed" => Ok(ActionKind::Processed),
            "viewed" => Ok(ActionKind::Viewed),
            _ => Err(format!("invalid manager action: {}", s).into()),
        }
    }
}

impl Type<Postgres> for ActionKind {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

impl Encode<'_, Postgres> for ActionKind {
    fn encode_by_ref(
        &self,
        buf: &mut PgArgumentBuffer,
    ) -> Result<IsNull, Box<dyn StdError + Send + Sync + 'static>> {
        <String as Encode<Postgres>>::encode(self.as_str().to_string(), buf)
    }
}

impl Decode<'_, Postgres> for ActionKind {
    fn decode(value: PgValueRef<'_>) -> Result<Self, Box<dyn StdError + Send + Sync + 'static>> {
        let s = <&str as Decode<Postgres>>::decode(value)?;
        ActionKind::parse(s)
    }
}

/// Append-only audit entry for one operator action on one announcement.
#[derive(Debug, Clone, FromRow)]
pub struct ManagerAction {
    pub id: i64,
    pub announcement_id: i64,
    pub manager_id: i64,
    pub manager_name: Option<String>,
    pub chat_id: Option<i64>,
    pub action: ActionKind,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("invalid run status: {}", s).into()),
        }
    }
}

impl Type<Postgres> for RunStatus {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

impl Encode<'_, Postgres> for RunStatus {
    fn encode_by_ref(
        &self,
        buf: &mut PgArgumentBuffer,
    ) -> Result<IsNull, Box<dyn StdError + Send + Sync + 'static>> {
        <String as Encode<Postgres>>::encode(self.as_str().to_string(), buf)
    }
}

impl Decode<'_, Postgres> for RunStatus {
    fn decode(value: PgValueRef<'_>) -> Result<Self, Box<dyn StdError + Send + Sync + 'static>> {
        let s = <&str as Decode<Postgres>>::decode(value)?;
        RunStatus::parse(s)
    }
}

/// Observational record of one assignment-pipeline run.
#[derive(Debug, Clone, FromRow)]
pub struct ParsingLog {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_found: i32,
    pub new_added: i32,
    pub duplicates: i32,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

/// The three fixed reminder thresholds before an application deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderThreshold {
    H48,
    H24,
    H2,
}

impl ReminderThreshold {
    pub const ALL: [ReminderThreshold; 3] = [
        ReminderThreshold::H48,
        ReminderThreshold::H24,
        ReminderThreshold::H2,
    ];

    pub fn hours(&self) -> i64 {
        match self {
            ReminderThreshold::H48 => 48,
            ReminderThreshold::H24 => 24,
            ReminderThreshold::H2 => 2,
        }
    }

    pub fn already_sent(&self, announcement: &Announcement) -> bool {
        match self {
            ReminderThreshold::H48 => announcement.reminder_48h_sent,
            ReminderThreshold::H24 => announcement.reminder_24h_sent,
            ReminderThreshold::H2 => announcement.reminder_2h_sent,
        }
    }
}

/// Per-manager status counts shown by `/stats` and the admin views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: i64,
    pub pending: i64,
    pub accepted: i64,
    pub rejected: i64,
    pub expired: i64,
    pub processed: i64,
}
