use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::error::Result;
use crate::types::{Announcement, NewAnnouncement, ReminderThreshold, StatusCounts};

const SELECT_COLUMNS: &str = r#"
    id, announcement_number, announcement_url,
    organization_name, organization_bin, legal_address, region,
    lots, procurement_method, keyword_matched,
    assigned_manager_id, assigned_manager_name,
    status, is_processed, rejection_reason,
    participation_details, participation_details_draft,
    notification_sent, reminder_48h_sent, reminder_24h_sent, reminder_2h_sent,
    application_deadline, created_at, response_at, expired_at
"#;

/// Persist a newly discovered announcement as pending. The unique constraint
/// on the announcement number is the final dedup guard; callers check
/// [`exists`] first so a violation here is a genuine race.
pub async fn create(pool: &PgPool, new: &NewAnnouncement) -> Result<Announcement> {
    let (manager_id, manager_name) = match &new.assignment {
        Some((id, name)) => (Some(*id), Some(name.clone())),
        None => (None, None),
    };

    let announcement = sqlx::query_as::<_, Announcement>(&format!(
        r#"
        INSERT INTO announcements (
            announcement_number, announcement_url,
            organization_name, organization_bin, legal_address, region,
            lots, procurement_method, keyword_matched,
            assigned_manager_id, assigned_manager_name,
            application_deadline
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {SELECT_COLUMNS}
        "#
    ))
    .bind(&new.announcement_number)
    .bind(&new.announcement_url)
    .bind(&new.organization_name)
    .bind(&new.organization_bin)
    .bind(&new.legal_address)
    .bind(&new.region)
    .bind(Json(&new.lots))
    .bind(&new.procurement_method)
    .bind(&new.keyword_matched)
    .bind(manager_id)
    .bind(manager_name)
    .bind(new.application_deadline)
    .fetch_one(pool)
    .await?;

    Ok(announcement)
}

pub async fn exists(pool: &PgPool, announcement_number: &str) -> Result<bool> {
    let found: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM announcements WHERE announcement_number = $1)",
    )
    .bind(announcement_number)
    .fetch_one(pool)
    .await?;
    Ok(found)
}

pub async fn get(pool: &PgPool, id: i64) -> Result<Option<Announcement>> {
    let announcement = sqlx::query_as::<_, Announcement>(&format!(
        "SELECT {SELECT_COLUMNS} FROM announcements WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(announcement)
}

pub async fn get_by_number(pool: &PgPool, announcement_number: &str) -> Result<Option<Announcement>> {
    let announcement = sqlx::query_as::<_, Announcement>(&format!(
        "SELECT {SELECT_COLUMNS} FROM announcements WHERE announcement_number = $1"
    ))
    .bind(announcement_number)
    .fetch_optional(pool)
    .await?;
    Ok(announcement)
}

pub async fn pending_for_manager(pool: &PgPool, manager_id: i64) -> Result<Vec<Announcement>> {
    let announcements = sqlx::query_as::<_, Announcement>(&format!(
        r#"
        SELECT {SELECT_COLUMNS} FROM announcements
        WHERE assigned_manager_id = $1 AND status = 'pending'
        ORDER BY created_at DESC
        "#
    ))
    .bind(manager_id)
    .fetch_all(pool)
    .await?;
    Ok(announcements)
}

/// Accepted, still-unprocessed leads with a live (or unknown) deadline, for
/// the coordinator's in-work view.
pub async fn in_work(pool: &PgPool, now_local: NaiveDateTime) -> Result<Vec<Announcement>> {
    let announcements = sqlx::query_as::<_, Announcement>(&format!(
        r#"
        SELECT {SELECT_COLUMNS} FROM announcements
        WHERE status = 'accepted'
          AND is_processed = FALSE
          AND (application_deadline IS NULL OR application_deadline >= $1)
        ORDER BY application_deadline ASC NULLS LAST
        "#
    ))
    .bind(now_local)
    .fetch_all(pool)
    .await?;
    Ok(announcements)
}

pub async fn by_status(
    pool: &PgPool,
    status: crate::types::AnnouncementStatus,
    limit: i64,
) -> Result<Vec<Announcement>> {
    let announcements = sqlx::query_as::<_, Announcement>(&format!(
        r#"
        SELECT {SELECT_COLUMNS} FROM announcements
        WHERE status = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#
    ))
    .bind(status)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(announcements)
}

async fn counts_where(pool: &PgPool, manager_id: Option<i64>) -> Result<StatusCounts> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COUNT(*) FILTER (WHERE status = 'pending') AS pending,
            COUNT(*) FILTER (WHERE status = 'accepted') AS accepted,
            COUNT(*) FILTER (WHERE status = 'rejected') AS rejected,
            COUNT(*) FILTER (WHERE status = 'expired') AS expired,
            COUNT(*) FILTER (WHERE status = 'accepted' AND is_processed) AS processed
        FROM announcements
        WHERE $1::BIGINT IS NULL OR assigned_manager_id = $1
        "#,
    )
    .bind(manager_id)
    .fetch_one(pool)
    .await?;

    Ok(StatusCounts {
        total: row.try_get("total")?,
        pending: row.try_get("pending")?,
        accepted: row.try_get("accepted")?,
        rejected: row.try_get("rejected")?,
        expired: row.try_get("expired")?,
        processed: row.try_get("processed")?,
    })
}

pub async fn stats_for_manager(pool: &PgPool, manager_id: i64) -> Result<StatusCounts> {
    counts_where(pool, Some(manager_id)).await
}

pub async fn overall_stats(pool: &PgPool) -> Result<StatusCounts> {
    counts_where(pool, None).await
}

/// pending → accepted, guarded on current status and ownership inside the
/// UPDATE predicate. `None` means the lead was not in an acceptable state
/// for this operator (missing, expired, already answered, not theirs).
pub async fn accept(pool: &PgPool, id: i64, manager_id: i64) -> Result<Option<Announcement>> {
    let announcement = sqlx::query_as::<_, Announcement>(&format!(
        r#"
        UPDATE announcements
        SET status = 'accepted', response_at = now()
        WHERE id = $1 AND status = 'pending' AND assigned_manager_id = $2
        RETURNING {SELECT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(manager_id)
    .fetch_optional(pool)
    .await?;
    Ok(announcement)
}

/// pending → rejected with the operator's stated reason.
pub async fn reject(
    pool: &PgPool,
    id: i64,
    manager_id: i64,
    reason: &str,
) -> Result<Option<Announcement>> {
    let announcement = sqlx::query_as::<_, Announcement>(&format!(
        r#"
        UPDATE announcements
        SET status = 'rejected', response_at = now(), rejection_reason = $3
        WHERE id = $1 AND status = 'pending' AND assigned_manager_id = $2
        RETURNING {SELECT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(manager_id)
    .bind(reason)
    .fetch_optional(pool)
    .await?;
    Ok(announcement)
}

/// First-writer-wins claim of a shared lead. The NULL check inside the same
/// statement is what resolves concurrent claims: exactly one UPDATE matches.
pub async fn claim(
    pool: &PgPool,
    id: i64,
    manager_id: i64,
    manager_name: &str,
) -> Result<Option<Announcement>> {
    let announcement = sqlx::query_as::<_, Announcement>(&format!(
        r#"
        UPDATE announcements
        SET assigned_manager_id = $2, assigned_manager_name = $3
        WHERE id = $1 AND status = 'pending' AND assigned_manager_id IS NULL
        RETURNING {SELECT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(manager_id)
    .bind(manager_name)
    .fetch_optional(pool)
    .await?;
    Ok(announcement)
}

/// Finalize the participation conversation: store the rendered details,
/// clear the draft, flip is_processed.
pub async fn finalize_processing(
    pool: &PgPool,
    id: i64,
    manager_id: i64,
    details: &str,
) -> Result<Option<Announcement>> {
    let announcement = sqlx::query_as::<_, Announcement>(&format!(
        r#"
        UPDATE announcements
        SET is_processed = TRUE,
            participation_details = $3,
            participation_details_draft = NULL
        WHERE id = $1
          AND status = 'accepted'
          AND is_processed = FALSE
          AND assigned_manager_id = $2
        RETURNING {SELECT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(manager_id)
    .bind(details)
    .fetch_optional(pool)
    .await?;
    Ok(announcement)
}

/// Persist the in-progress participation draft. Called after every captured
/// lot entry so an interruption between lots loses nothing.
pub async fn save_draft(pool: &PgPool, id: i64, draft: &str) -> Result<()> {
    sqlx::query("UPDATE announcements SET participation_details_draft = $2 WHERE id = $1")
        .bind(id)
        .bind(draft)
        .execute(pool)
        .await?;
    Ok(())
}

/// Bulk-expire every non-expired announcement whose deadline has passed.
/// Idempotent: already-expired rows are excluded by the predicate.
pub async fn expire_overdue(
    tx: &mut Transaction<'_, Postgres>,
    now_local: NaiveDateTime,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE announcements
        SET status = 'expired', expired_at = now()
        WHERE application_deadline IS NOT NULL
          AND application_deadline < $1
          AND status != 'expired'
        "#,
    )
    .bind(now_local)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

/// Accepted, assigned leads with a still-future deadline: the reminder
/// sweep's working set.
pub async fn reminder_candidates(
    tx: &mut Transaction<'_, Postgres>,
    now_local: NaiveDateTime,
) -> Result<Vec<Announcement>> {
    let announcements = sqlx::query_as::<_, Announcement>(&format!(
        r#"
        SELECT {SELECT_COLUMNS} FROM announcements
        WHERE status = 'accepted'
          AND assigned_manager_id IS NOT NULL
          AND application_deadline IS NOT NULL
          AND application_deadline >= $1
        ORDER BY application_deadline ASC
        "#
    ))
    .bind(now_local)
    .fetch_all(&mut **tx)
    .await?;
    Ok(announcements)
}

/// Set one sticky reminder flag. Returns false when the flag was already
/// set, which keeps each threshold at-most-once under any sweep cadence.
pub async fn mark_reminder_sent(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    threshold: ReminderThreshold,
) -> Result<bool> {
    let sql = match threshold {
        ReminderThreshold::H48 => {
            "UPDATE announcements SET reminder_48h_sent = TRUE WHERE id = $1 AND reminder_48h_sent = FALSE"
        }
        ReminderThreshold::H24 => {
            "UPDATE announcements SET reminder_24h_sent = TRUE WHERE id = $1 AND reminder_24h_sent = FALSE"
        }
        ReminderThreshold::H2 => {
            "UPDATE announcements SET reminder_2h_sent = TRUE WHERE id = $1 AND reminder_2h_sent = FALSE"
        }
    };
    let result = sqlx::query(sql).bind(id).execute(&mut **tx).await?;
    Ok(result.rows_affected() == 1)
}

/// Pending leads whose assignment notification never went out, oldest first,
/// bounded to a small batch per sweep.
pub async fn unsent_older_than(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Announcement>> {
    let announcements = sqlx::query_as::<_, Announcement>(&format!(
        r#"
        SELECT {SELECT_COLUMNS} FROM announcements
        WHERE status = 'pending'
          AND notification_sent = FALSE
          AND created_at < $1
        ORDER BY created_at ASC
        LIMIT $2
        "#
    ))
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(announcements)
}

pub async fn mark_notification_sent(pool: &PgPool, id: i64) -> Result<()> {
    sqlx::query("UPDATE announcements SET notification_sent = TRUE WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
