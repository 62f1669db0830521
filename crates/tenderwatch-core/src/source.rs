use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::types::Lot;

#[derive(Error, Debug)]
#[error("{0}")]
pub struct SourceError(pub String);

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// One announcement as returned by the upstream portal. May be duplicated or
/// partial; the pipeline tolerates both.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedAnnouncement {
    pub announcement_number: String,
    pub announcement_url: Option<String>,
    pub organization_name: Option<String>,
    pub organization_bin: Option<String>,
    pub legal_address: Option<String>,
    pub region: String,
    pub lots: Vec<Lot>,
    pub procurement_method: Option<String>,
    /// Already in the operating region's local time; stored naive, never
    /// reinterpreted as UTC.
    pub application_deadline: Option<NaiveDateTime>,
}

impl SourcedAnnouncement {
    /// The keyword the pipeline matches operators against: the first lot's.
    pub fn matched_keyword(&self) -> Option<&str> {
        self.lots.first().map(|lot| lot.keyword.as_str())
    }
}

/// Capability interface over the announcement source. The lookback window is
/// re-scanned fully on every run; completeness is not guaranteed.
#[async_trait]
pub trait AnnouncementSource: Send + Sync {
    async fn search(
        &self,
        keywords: &[String],
        days_back: u32,
    ) -> Result<Vec<SourcedAnnouncement>, SourceError>;
}

/// Scripted source double for tests: returns the queued batches in order and
/// repeats the last one once the script runs out.
#[derive(Default)]
pub struct ScriptedSource {
    batches: Mutex<Vec<Result<Vec<SourcedAnnouncement>, String>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_batch(&self, batch: Vec<SourcedAnnouncement>) {
        self.batches.lock().await.push(Ok(batch));
    }

    pub async fn push_failure(&self, message: &str) {
        self.batches.lock().await.push(Err(message.to_string()));
    }
}

#[async_trait]
impl AnnouncementSource for ScriptedSource {
    async fn search(
        &self,
        _keywords: &[String],
        _days_back: u32,
    ) -> Result<Vec<SourcedAnnouncement>, SourceError> {
        let mut batches = self.batches.lock().await;
        let next = if batches.len() > 1 {
            batches.remove(0)
        } else {
            batches
                .first()
                .cloned()
                .unwrap_or_else(|| Ok(Vec::new()))
        };
        next.map_err(SourceError::new)
    }
}
