use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::types::Announcement;

#[derive(Error, Debug)]
#[error("{0}")]
pub struct MirrorError(pub String);

impl MirrorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Flattened announcement row for the external spreadsheet-like sink,
/// keyed by the announcement number. Timestamps are rendered in the
/// operating region's local time; the deadline is already local and is
/// formatted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRow {
    pub id: i64,
    pub created_at: String,
    pub announcement_number: String,
    pub announcement_url: String,
    pub organization_name: String,
    pub organization_bin: String,
    pub legal_address: String,
    pub region: String,
    pub lots_summary: String,
    pub keyword_matched: String,
    pub manager_id: String,
    pub manager_name: String,
    pub status: String,
    pub rejection_reason: String,
    pub application_deadline: String,
    pub response_at: String,
    pub participation_details: String,
}

const TS_FORMAT: &str = "%d.%m.%Y %H:%M";

fn format_utc(ts: DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format(TS_FORMAT).to_string()
}

impl MirrorRow {
    pub fn from_announcement(announcement: &Announcement, tz: Tz) -> Self {
        let lots = announcement.effective_lots();
        let lots_summary = lots
            .iter()
            .enumerate()
            .map(|(idx, lot)| format!("Лот {}: {}", lot.label(idx), lot.name))
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            id: announcement.id,
            created_at: format_utc(announcement.created_at, tz),
            announcement_number: announcement.announcement_number.clone(),
            announcement_url: announcement.announcement_url.clone().unwrap_or_default(),
            organization_name: announcement.organization_name.clone().unwrap_or_default(),
            organization_bin: announcement.organization_bin.clone().unwrap_or_default(),
            legal_address: announcement.legal_address.clone().unwrap_or_default(),
            region: announcement.region.clone().unwrap_or_default(),
            lots_summary,
            keyword_matched: announcement.keyword_matched.clone().unwrap_or_default(),
            manager_id: announcement
                .assigned_manager_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            manager_name: announcement.assigned_manager_name.clone().unwrap_or_default(),
            status: announcement.status.label_ru().to_string(),
            rejection_reason: announcement.rejection_reason.clone().unwrap_or_default(),
            application_deadline: announcement
                .application_deadline
                .map(|d| d.format(TS_FORMAT).to_string())
                .unwrap_or_default(),
            response_at: announcement
                .response_at
                .map(|ts| format_utc(ts, tz))
                .unwrap_or_default(),
            participation_details: announcement
                .participation_details
                .clone()
                .unwrap_or_default(),
        }
    }
}

/// Capability interface over the external mirror. Always invoked
/// fire-log-continue; a failed upsert never affects the authoritative store.
#[async_trait]
pub trait MirrorSink: Send + Sync {
    async fn upsert(&self, row: &MirrorRow) -> Result<(), MirrorError>;
}

/// No-op sink for deployments without a configured spreadsheet.
pub struct NullMirror;

#[async_trait]
impl MirrorSink for NullMirror {
    async fn upsert(&self, _row: &MirrorRow) -> Result<(), MirrorError> {
        Ok(())
    }
}

/// Test double recording every upserted row.
#[derive(Default)]
pub struct RecordingMirror {
    rows: Mutex<Vec<MirrorRow>>,
}

impl RecordingMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rows(&self) -> Vec<MirrorRow> {
        self.rows.lock().await.clone()
    }
}

#[async_trait]
impl MirrorSink for RecordingMirror {
    async fn upsert(&self, row: &MirrorRow) -> Result<(), MirrorError> {
        self.rows.lock().await.push(row.clone());
        Ok(())
    }
}
