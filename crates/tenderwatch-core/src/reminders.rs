use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Timelike, Utc};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, QuietHours, ReminderPolicy, RoleTable, ToleranceWindow};
use crate::db::DbPool;
use crate::error::Result;
use crate::notifier::Notifier;
use crate::store::announcements;
use crate::types::ReminderThreshold;

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepSummary {
    pub skipped_quiet: bool,
    pub expired: u64,
    pub reminders_sent: usize,
}

impl ReminderPolicy {
    pub fn window(&self, threshold: ReminderThreshold) -> ToleranceWindow {
        match threshold {
            ReminderThreshold::H48 => self.window_48h,
            ReminderThreshold::H24 => self.window_24h,
            ReminderThreshold::H2 => self.window_2h,
        }
    }
}

/// True when the local time of day falls inside the configured overnight
/// window. `start == end` disables the window entirely.
pub fn within_quiet_hours(local: NaiveTime, quiet: QuietHours) -> bool {
    let hour = local.hour();
    if quiet.start_hour == quiet.end_hour {
        return false;
    }
    if quiet.start_hour < quiet.end_hour {
        hour >= quiet.start_hour && hour < quiet.end_hour
    } else {
        hour >= quiet.start_hour || hour < quiet.end_hour
    }
}

/// The deadline sweep: expire overdue leads, then send at-most-once
/// reminders at the fixed offsets. All database changes of one run commit
/// or roll back together; flags committed by earlier successful runs are
/// untouched by a later failure.
pub struct DeadlineScheduler {
    pool: DbPool,
    config: Arc<AppConfig>,
    roles: Arc<RoleTable>,
    notifier: Arc<Notifier>,
}

impl DeadlineScheduler {
    pub fn new(
        pool: DbPool,
        config: Arc<AppConfig>,
        roles: Arc<RoleTable>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            pool,
            config,
            roles,
            notifier,
        }
    }

    pub async fn run_once(&self) -> Result<SweepSummary> {
        let local_now = Utc::now().with_timezone(&self.config.timezone);
        if within_quiet_hours(local_now.time(), self.config.quiet_hours) {
            debug!(local = %local_now, "quiet hours, skipping deadline sweep");
            return Ok(SweepSummary {
                skipped_quiet: true,
                ..SweepSummary::default()
            });
        }

        // Deadlines are stored in this same local clock; compare naively.
        let now_local = local_now.naive_local();
        let mut tx = self.pool.begin().await?;

        let expired = announcements::expire_overdue(&mut tx, now_local).await?;
        if expired > 0 {
            info!(expired, "overdue announcements expired");
        }

        let mut reminders_sent = 0;
        let candidates = announcements::reminder_candidates(&mut tx, now_local).await?;
        for announcement in &candidates {
            let Some(deadline) = announcement.application_deadline else {
                continue;
            };
            let Some(manager_id) = announcement.assigned_manager_id else {
                continue;
            };
            let Some(operator) = self.roles.operator_by_id(manager_id) else {
                warn!(
                    announcement = %announcement.announcement_number,
                    manager_id,
                    "assigned operator no longer configured, reminder skipped"
                );
                continue;
            };

            let hours_remaining = (deadline - now_local).num_minutes() as f64 / 60.0;
            for threshold in ReminderThreshold::ALL {
                if threshold.already_sent(announcement) {
                    continue;
                }
                if !self.config.reminders.window(threshold).contains(hours_remaining) {
                    continue;
                }
                // The sticky flag flips inside this run's transaction; a
                // second sweep inside the same window sees it set.
                if !announcements::mark_reminder_sent(&mut tx, announcement.id, threshold).await? {
                    continue;
                }

                self.notifier
                    .send_reminder(operator.chat_id, announcement, threshold.hours())
                    .await;
                reminders_sent += 1;
                tokio::time::sleep(Duration::from_millis(self.config.notify_delay_ms)).await;
            }
        }

        tx.commit().await?;

        Ok(SweepSummary {
            skipped_quiet: false,
            expired,
            reminders_sent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
    }

    #[test]
    fn overnight_quiet_window_wraps_midnight() {
        let quiet = QuietHours {
            start_hour: 22,
            end_hour: 7,
        };
        assert!(within_quiet_hours(time(22, 0), quiet));
        assert!(within_quiet_hours(time(23, 30), quiet));
        assert!(within_quiet_hours(time(3, 0), quiet));
        assert!(within_quiet_hours(time(6, 59), quiet));
        assert!(!within_quiet_hours(time(7, 0), quiet));
        assert!(!within_quiet_hours(time(12, 0), quiet));
        assert!(!within_quiet_hours(time(21, 59), quiet));
    }

    #[test]
    fn daytime_window_does_not_wrap() {
        let quiet = QuietHours {
            start_hour: 13,
            end_hour: 14,
        };
        assert!(within_quiet_hours(time(13, 30), quiet));
        assert!(!within_quiet_hours(time(14, 0), quiet));
        assert!(!within_quiet_hours(time(12, 59), quiet));
    }

    #[test]
    fn equal_bounds_disable_the_window() {
        let quiet = QuietHours {
            start_hour: 8,
            end_hour: 8,
        };
        assert!(!within_quiet_hours(time(8, 0), quiet));
        assert!(!within_quiet_hours(time(0, 0), quiet));
    }

    #[test]
    fn tolerance_windows_bracket_their_threshold() {
        let policy = ReminderPolicy::default();
        assert!(policy.window(ReminderThreshold::H48).contains(47.5));
        assert!(!policy.window(ReminderThreshold::H48).contains(48.5));
        assert!(!policy.window(ReminderThreshold::H48).contains(42.0));
        assert!(policy.window(ReminderThreshold::H24).contains(24.0));
        assert!(policy.window(ReminderThreshold::H2).contains(0.5));
        assert!(!policy.window(ReminderThreshold::H2).contains(0.0));
    }
}
