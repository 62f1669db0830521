use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::{AppConfig, RoleTable};
use crate::db::DbPool;
use crate::error::Result;
use crate::matcher::Matcher;
use crate::mirror::{MirrorRow, MirrorSink};
use crate::notifier::Notifier;
use crate::render;
use crate::source::{AnnouncementSource, SourcedAnnouncement};
use crate::store::{announcements, parsing_logs};
use crate::types::{Announcement, NewAnnouncement};

#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub log_id: i64,
    pub total_found: usize,
    pub new_added: usize,
    pub duplicates: usize,
    pub unmatched: usize,
}

/// The periodic assignment pipeline: fetch, dedupe, match, persist, notify.
/// A full lookback window is reprocessed on every run; the dedup check in
/// front of any side effect is what makes re-runs idempotent.
pub struct ParsePipeline {
    pool: DbPool,
    config: Arc<AppConfig>,
    roles: Arc<RoleTable>,
    source: Arc<dyn AnnouncementSource>,
    notifier: Arc<Notifier>,
    mirror: Arc<dyn MirrorSink>,
}

impl ParsePipeline {
    pub fn new(
        pool: DbPool,
        config: Arc<AppConfig>,
        roles: Arc<RoleTable>,
        source: Arc<dyn AnnouncementSource>,
        notifier: Arc<Notifier>,
        mirror: Arc<dyn MirrorSink>,
    ) -> Self {
        Self {
            pool,
            config,
            roles,
            source,
            notifier,
            mirror,
        }
    }

    /// One pipeline run. Any failure is recorded on the run's parsing_logs
    /// row and returned; the caller's scheduler just logs it and the next
    /// tick starts over from scratch.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let log = parsing_logs::open_run(&self.pool).await?;
        info!(run = log.id, "parse run started");

        match self.run_inner(log.id).await {
            Ok(summary) => {
                parsing_logs::complete_run(
                    &self.pool,
                    log.id,
                    summary.total_found as i32,
                    summary.new_added as i32,
                    summary.duplicates as i32,
                )
                .await?;
                info!(
                    run = log.id,
                    total = summary.total_found,
                    new = summary.new_added,
                    duplicates = summary.duplicates,
                    unmatched = summary.unmatched,
                    "parse run completed"
                );
                Ok(summary)
            }
            Err(err) => {
                error!(run = log.id, error = %err, "parse run failed");
                if let Err(log_err) =
                    parsing_logs::fail_run(&self.pool, log.id, &err.to_string()).await
                {
                    error!(run = log.id, error = %log_err, "failed to record run failure");
                }
                Err(err)
            }
        }
    }

    async fn run_inner(&self, log_id: i64) -> Result<RunSummary> {
        let found = self
            .source
            .search(&self.config.keywords, self.config.lookback_days)
            .await?;

        let mut summary = RunSummary {
            log_id,
            total_found: found.len(),
            new_added: 0,
            duplicates: 0,
            unmatched: 0,
        };

        for sourced in found {
            // Dedup before any side effect so re-running the window is safe.
            if announcements::exists(&self.pool, &sourced.announcement_number).await? {
                summary.duplicates += 1;
                continue;
            }

            let keyword = sourced.matched_keyword().unwrap_or_default().to_string();
            let matcher = Matcher::new(&self.roles);
            let matched = matcher.matches(&sourced.region, &keyword);
            if matched.is_empty() {
                warn!(
                    announcement = %sourced.announcement_number,
                    region = %sourced.region,
                    keyword = %keyword,
                    "no operator covers this announcement, skipping"
                );
                summary.unmatched += 1;
                continue;
            }

            let assignment = if matched.len() == 1 {
                Some((matched[0].id, matched[0].name.clone()))
            } else {
                None
            };
            let new = to_new_announcement(&sourced, &keyword, assignment);
            let announcement = announcements::create(&self.pool, &new).await?;
            summary.new_added += 1;
            info!(
                announcement = %announcement.announcement_number,
                shared = matched.len() > 1,
                "new announcement persisted"
            );

            self.mirror_best_effort(&announcement).await;

            let delivered = if matched.len() == 1 {
                self.notifier
                    .send_lead_to_manager(matched[0], &announcement)
                    .await
            } else {
                self.notifier
                    .send_claim_to_managers(&matched, &announcement)
                    .await
                    > 0
            };
            if delivered {
                announcements::mark_notification_sent(&self.pool, announcement.id).await?;
            }

            self.notifier
                .send_admin(&render::format_announcement(&announcement, false))
                .await;

            // Throttle between successive outbound notifications.
            tokio::time::sleep(Duration::from_millis(self.config.notify_delay_ms)).await;
        }

        Ok(summary)
    }

    /// Re-attempt delivery for pending leads whose assignment notification
    /// never went out, bounded per sweep to avoid floods.
    pub async fn resend_unnotified(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::minutes(self.config.retry_grace_minutes);
        let stale = announcements::unsent_older_than(
            &self.pool,
            cutoff,
            self.config.retry_batch_size,
        )
        .await?;

        let mut resent = 0;
        for announcement in stale {
            let delivered = match announcement.assigned_manager_id {
                Some(manager_id) => match self.roles.operator_by_id(manager_id) {
                    Some(operator) => {
                        self.notifier
                            .send_lead_to_manager(operator, &announcement)
                            .await
                    }
                    None => {
                        warn!(
                            announcement = %announcement.announcement_number,
                            manager_id,
                            "assigned operator no longer configured, cannot redeliver"
                        );
                        false
                    }
                },
                None => {
                    // Shared lead: re-derive the fan-out set from the matcher.
                    let keyword = announcement.keyword_matched.clone().unwrap_or_default();
                    let region = announcement.region.clone().unwrap_or_default();
                    let matcher = Matcher::new(&self.roles);
                    let matched = matcher.matches(&region, &keyword);
                    !matched.is_empty()
                        && self
                            .notifier
                            .send_claim_to_managers(&matched, &announcement)
                            .await
                            > 0
                }
            };

            if delivered {
                announcements::mark_notification_sent(&self.pool, announcement.id).await?;
                resent += 1;
            }

            tokio::time::sleep(Duration::from_millis(self.config.notify_delay_ms)).await;
        }

        if resent > 0 {
            info!(resent, "unsent notifications redelivered");
        }
        Ok(resent)
    }

    async fn mirror_best_effort(&self, announcement: &Announcement) {
        let row = MirrorRow::from_announcement(announcement, self.config.timezone);
        if let Err(err) = self.mirror.upsert(&row).await {
            warn!(
                announcement = %announcement.announcement_number,
                error = %err,
                "mirror sync failed"
            );
        }
    }
}

fn to_new_announcement(
    sourced: &SourcedAnnouncement,
    keyword: &str,
    assignment: Option<(i64, String)>,
) -> NewAnnouncement {
    NewAnnouncement {
        announcement_number: sourced.announcement_number.clone(),
        announcement_url: sourced.announcement_url.clone(),
        organization_name: sourced.organization_name.clone(),
        organization_bin: sourced.organization_bin.clone(),
        legal_address: sourced.legal_address.clone(),
        region: Some(sourced.region.clone()),
        lots: sourced.lots.clone(),
        procurement_method: sourced.procurement_method.clone(),
        keyword_matched: Some(keyword.to_string()),
        assignment,
        application_deadline: sourced.application_deadline,
    }
}
