use std::collections::HashMap;
use std::path::Path;

use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::{CoreError, Result};

/// One configured manager: who they are on the chat transport and which
/// regions/keywords they cover. Loaded once at startup, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Operator {
    pub id: i64,
    pub name: String,
    pub chat_id: i64,
    pub regions: Vec<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QuietHours {
    /// Hour of local day (0-23) at which the overnight quiet window opens.
    pub start_hour: u32,
    /// Hour of local day at which it closes the next morning.
    pub end_hour: u32,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            start_hour: 22,
            end_hour: 7,
        }
    }
}

/// Hours-remaining band in which a reminder for one threshold may fire.
/// At-most-once is guaranteed by the sticky sent flag, not by this width.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ToleranceWindow {
    pub min_hours: f64,
    pub max_hours: f64,
}

impl ToleranceWindow {
    pub fn contains(&self, hours_remaining: f64) -> bool {
        hours_remaining > self.min_hours && hours_remaining <= self.max_hours
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReminderPolicy {
    #[serde(default = "default_window_48h")]
    pub window_48h: ToleranceWindow,
    #[serde(default = "default_window_24h")]
    pub window_24h: ToleranceWindow,
    #[serde(default = "default_window_2h")]
    pub window_2h: ToleranceWindow,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            window_48h: default_window_48h(),
            window_24h: default_window_24h(),
            window_2h: default_window_2h(),
        }
    }
}

fn default_window_48h() -> ToleranceWindow {
    ToleranceWindow {
        min_hours: 42.0,
        max_hours: 48.0,
    }
}

fn default_window_24h() -> ToleranceWindow {
    ToleranceWindow {
        min_hours: 20.0,
        max_hours: 24.0,
    }
}

fn default_window_2h() -> ToleranceWindow {
    ToleranceWindow {
        min_hours: 0.0,
        max_hours: 2.0,
    }
}

/// Connection settings for the procurement portal client.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSettings {
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_page_size() -> u32 {
    200
}

fn default_http_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Keyword set handed to the source on every pipeline run.
    pub keywords: Vec<String>,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    #[serde(default = "default_parse_interval_minutes")]
    pub parse_interval_minutes: u64,
    #[serde(default = "default_reminder_interval_minutes")]
    pub reminder_interval_minutes: u64,
    #[serde(default = "default_retry_interval_minutes")]
    pub retry_interval_minutes: u64,

    /// Throttling pause between successive outbound sends.
    #[serde(default = "default_notify_delay_ms")]
    pub notify_delay_ms: u64,
    /// A pending lead must be at least this old before the unsent-notification
    /// sweep retries its delivery.
    #[serde(default = "default_retry_grace_minutes")]
    pub retry_grace_minutes: i64,
    #[serde(default = "default_retry_batch_size")]
    pub retry_batch_size: i64,

    /// IANA name of the operating region's timezone. Deadlines are already
    /// local to this zone; quiet hours are computed in it.
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    #[serde(default)]
    pub quiet_hours: QuietHours,
    #[serde(default)]
    pub reminders: ReminderPolicy,

    pub source: SourceSettings,

    pub operators: Vec<Operator>,
    #[serde(default)]
    pub admin_chat_id: Option<i64>,
    #[serde(default)]
    pub coordinator_chat_id: Option<i64>,
}

fn default_lookback_days() -> u32 {
    7
}

fn default_parse_interval_minutes() -> u64 {
    30
}

fn default_reminder_interval_minutes() -> u64 {
    15
}

fn default_retry_interval_minutes() -> u64 {
    60
}

fn default_notify_delay_ms() -> u64 {
    1000
}

fn default_retry_grace_minutes() -> i64 {
    30
}

fn default_retry_batch_size() -> i64 {
    20
}

fn default_timezone() -> Tz {
    chrono_tz::Asia::Almaty
}

impl AppConfig {
    /// Load configuration from `TENDERWATCH_CONFIG` (default
    /// `tenderwatch.toml` in the working directory).
    pub fn load() -> Result<Self> {
        let path = std::env::var("TENDERWATCH_CONFIG")
            .unwrap_or_else(|_| "tenderwatch.toml".to_string());
        Self::from_path(Path::new(&path))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.keywords.is_empty() {
            return Err(CoreError::Config("keyword set must not be empty".into()));
        }
        if self.operators.is_empty() {
            return Err(CoreError::Config("operator table must not be empty".into()));
        }
        let mut seen_ids = std::collections::HashSet::new();
        let mut seen_chats = std::collections::HashSet::new();
        for operator in &self.operators {
            if !seen_ids.insert(operator.id) {
                return Err(CoreError::Config(format!(
                    "duplicate operator id {}",
                    operator.id
                )));
            }
            if !seen_chats.insert(operator.chat_id) {
                return Err(CoreError::Config(format!(
                    "duplicate operator chat id {}",
                    operator.chat_id
                )));
            }
        }
        if self.quiet_hours.start_hour > 23 || self.quiet_hours.end_hour > 23 {
            return Err(CoreError::Config("quiet hour out of range".into()));
        }
        Ok(())
    }

    pub fn role_table(&self) -> RoleTable {
        RoleTable::new(
            self.operators.clone(),
            self.admin_chat_id,
            self.coordinator_chat_id,
        )
    }
}

/// Who an inbound chat identity is, as far as the system cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role<'a> {
    Operator(&'a Operator),
    Admin,
    Coordinator,
}

/// Immutable lookup over the static role configuration. Insertion order of
/// the operator table is preserved because the matcher's output ordering
/// depends on it.
#[derive(Debug)]
pub struct RoleTable {
    operators: Vec<Operator>,
    by_chat: HashMap<i64, usize>,
    by_id: HashMap<i64, usize>,
    admin_chat_id: Option<i64>,
    coordinator_chat_id: Option<i64>,
}

impl RoleTable {
    pub fn new(
        operators: Vec<Operator>,
        admin_chat_id: Option<i64>,
        coordinator_chat_id: Option<i64>,
    ) -> Self {
        let by_chat = operators
            .iter()
            .enumerate()
            .map(|(idx, op)| (op.chat_id, idx))
            .collect();
        let by_id = operators
            .iter()
            .enumerate()
            .map(|(idx, op)| (op.id, idx))
            .collect();
        Self {
            operators,
            by_chat,
            by_id,
            admin_chat_id,
            coordinator_chat_id,
        }
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub fn operator_by_chat(&self, chat_id: i64) -> Option<&Operator> {
        self.by_chat.get(&chat_id).map(|&idx| &self.operators[idx])
    }

    pub fn operator_by_id(&self, id: i64) -> Option<&Operator> {
        self.by_id.get(&id).map(|&idx| &self.operators[idx])
    }

    pub fn admin_chat_id(&self) -> Option<i64> {
        self.admin_chat_id
    }

    pub fn coordinator_chat_id(&self) -> Option<i64> {
        self.coordinator_chat_id
    }

    /// Resolve a chat identity to its role. Operators win over the singleton
    /// roles when one chat id is configured for both.
    pub fn resolve(&self, chat_id: i64) -> Option<Role<'_>> {
        if let Some(operator) = self.operator_by_chat(chat_id) {
            return Some(Role::Operator(operator));
        }
        if self.admin_chat_id == Some(chat_id) {
            return Some(Role::Admin);
        }
        if self.coordinator_chat_id == Some(chat_id) {
            return Some(Role::Coordinator);
        }
        None
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig::from_toml(
        r#"
        keywords = ["аренда", "медицинские изделия"]
        admin_chat_id = 9001
        coordinator_chat_id = 9002

        [source]
        base_url = "https://example.invalid/v3"

        [[operators]]
        id = 1
        name = "Айгерим"
        chat_id = 1001
        regions = ["г. Алматы", "Алматинская область"]
        keywords = ["аренда", "медицинские изделия"]

        [[operators]]
        id = 2
        name = "Данияр"
        chat_id = 1002
        regions = ["г. Алматы"]
        keywords = ["аренда"]
        "#,
    )
    .expect("test config parses")
}
