use std::sync::Arc;

use chrono_tz::Tz;
use tracing::{info, warn};

use crate::conversation::LotProgress;
use crate::config::Operator;
use crate::db::DbPool;
use crate::error::Result;
use crate::mirror::{MirrorRow, MirrorSink};
use crate::notifier::Notifier;
use crate::render;
use crate::store::{actions, announcements};
use crate::types::{ActionKind, Announcement};

/// Result of an operator-triggered transition. Races (already answered,
/// expired underneath the operator, not theirs) all surface as `NotFound`:
/// the expected outcome of a race, not a system error.
#[derive(Debug)]
pub enum TransitionOutcome {
    Done(Announcement),
    NotFound,
}

#[derive(Debug)]
pub enum ClaimOutcome {
    Claimed(Announcement),
    /// Another operator won the first-writer-wins race.
    AlreadyClaimed,
    NotFound,
}

const PROCESSED_PREVIEW_CHARS: usize = 200;

/// The announcement lifecycle state machine. Every transition is a guarded
/// compare-and-set in the store; side effects (audit row, notifications,
/// mirror) happen after the authoritative update commits, and only the audit
/// row is on the critical path.
pub struct Lifecycle {
    pool: DbPool,
    notifier: Arc<Notifier>,
    mirror: Arc<dyn MirrorSink>,
    tz: Tz,
}

impl Lifecycle {
    pub fn new(pool: DbPool, notifier: Arc<Notifier>, mirror: Arc<dyn MirrorSink>, tz: Tz) -> Self {
        Self {
            pool,
            notifier,
            mirror,
            tz,
        }
    }

    /// pending → accepted.
    pub async fn accept(
        &self,
        operator: &Operator,
        announcement_id: i64,
    ) -> Result<TransitionOutcome> {
        let Some(announcement) =
            announcements::accept(&self.pool, announcement_id, operator.id).await?
        else {
            return Ok(TransitionOutcome::NotFound);
        };

        actions::record(
            &self.pool,
            announcement.id,
            operator.id,
            &operator.name,
            operator.chat_id,
            ActionKind::Accepted,
            None,
        )
        .await?;

        info!(
            announcement = %announcement.announcement_number,
            manager = %operator.name,
            "announcement accepted"
        );

        self.notifier
            .send_admin(&render::format_accepted_notice(
                &announcement.announcement_number,
                &operator.name,
            ))
            .await;
        self.notifier
            .send_coordinator(&render::format_coordinator_notice(
                &announcement,
                &operator.name,
            ))
            .await;
        self.sync_mirror(&announcement).await;

        Ok(TransitionOutcome::Done(announcement))
    }

    /// pending → rejected. `reason` is the operator's next message, captured
    /// verbatim by the dispatcher; no validation of its content happens here.
    pub async fn reject(
        &self,
        operator: &Operator,
        announcement_id: i64,
        reason: &str,
    ) -> Result<TransitionOutcome> {
        let Some(announcement) =
            announcements::reject(&self.pool, announcement_id, operator.id, reason).await?
        else {
            return Ok(TransitionOutcome::NotFound);
        };

        actions::record(
            &self.pool,
            announcement.id,
            operator.id,
            &operator.name,
            operator.chat_id,
            ActionKind::Rejected,
            Some(reason),
        )
        .await?;

        info!(
            announcement = %announcement.announcement_number,
            manager = %operator.name,
            "announcement rejected"
        );

        self.notifier
            .send_admin(&render::format_rejected_notice(
                &announcement.announcement_number,
                &operator.name,
                reason,
            ))
            .await;
        self.sync_mirror(&announcement).await;

        Ok(TransitionOutcome::Done(announcement))
    }

    /// Claim a shared lead. Exactly one concurrent claimer can win because
    /// the NULL-assignee check and the assignment land in one statement.
    pub async fn claim(&self, operator: &Operator, announcement_id: i64) -> Result<ClaimOutcome> {
        if let Some(announcement) =
            announcements::claim(&self.pool, announcement_id, operator.id, &operator.name).await?
        {
            info!(
                announcement = %announcement.announcement_number,
                manager = %operator.name,
                "shared announcement claimed"
            );
            self.sync_mirror(&announcement).await;
            return Ok(ClaimOutcome::Claimed(announcement));
        }

        // Distinguish "someone else got it" from "gone" for the loser's
        // user-visible message.
        match announcements::get(&self.pool, announcement_id).await? {
            Some(existing)
                if existing.assigned_manager_id.is_some()
                    && existing.assigned_manager_id != Some(operator.id) =>
            {
                Ok(ClaimOutcome::AlreadyClaimed)
            }
            _ => Ok(ClaimOutcome::NotFound),
        }
    }

    /// accepted → processed, entered only through the completed
    /// participation conversation.
    pub async fn finalize_participation(
        &self,
        operator: &Operator,
        announcement_id: i64,
        progress: &LotProgress,
    ) -> Result<TransitionOutcome> {
        let details = progress.render_final();
        let Some(announcement) =
            announcements::finalize_processing(&self.pool, announcement_id, operator.id, &details)
                .await?
        else {
            return Ok(TransitionOutcome::NotFound);
        };

        actions::record(
            &self.pool,
            announcement.id,
            operator.id,
            &operator.name,
            operator.chat_id,
            ActionKind::Processed,
            Some(&progress.preview(PROCESSED_PREVIEW_CHARS)),
        )
        .await?;

        info!(
            announcement = %announcement.announcement_number,
            manager = %operator.name,
            lots = progress.lots().len(),
            "participation details finalized"
        );

        self.sync_mirror(&announcement).await;
        Ok(TransitionOutcome::Done(announcement))
    }

    /// Audit-only entry for views and postpones; no state change.
    pub async fn record_view(
        &self,
        operator: &Operator,
        announcement_id: i64,
        comment: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let Some(announcement) = announcements::get(&self.pool, announcement_id).await? else {
            return Ok(TransitionOutcome::NotFound);
        };

        actions::record(
            &self.pool,
            announcement.id,
            operator.id,
            &operator.name,
            operator.chat_id,
            ActionKind::Viewed,
            comment,
        )
        .await?;

        Ok(TransitionOutcome::Done(announcement))
    }

    /// Push the current row to the external mirror; failures are logged and
    /// never propagate into the caller's operation.
    pub async fn sync_mirror(&self, announcement: &Announcement) {
        let row = MirrorRow::from_announcement(announcement, self.tz);
        if let Err(err) = self.mirror.upsert(&row).await {
            warn!(
                announcement = %announcement.announcement_number,
                error = %err,
                "mirror sync failed"
            );
        }
    }
}
