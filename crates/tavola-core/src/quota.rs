//! Sending quota enforcement
//!
//! The daily counter lives on the settings row and is reset lazily on the
//! first check of a new day. The hourly limit is derived from `sent` rows in
//! the delivery log. Both checks fail open: if the stores cannot be read the
//! send is allowed.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tavola_common::Result;
use tavola_storage::repository::{DeliveryLogRepository, EmailSettingsRepository};
use tracing::{debug, warn};

/// Result of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    DailyLimitReached { sent: i64, limit: i64 },
    HourlyLimitReached { sent: i64, limit: i64 },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed)
    }

    /// Operator-facing reason for a refusal
    pub fn reason(&self) -> Option<String> {
        match self {
            QuotaDecision::Allowed => None,
            QuotaDecision::DailyLimitReached { sent, limit } => Some(format!(
                "Daily email limit reached ({}/{})",
                sent, limit
            )),
            QuotaDecision::HourlyLimitReached { sent, limit } => Some(format!(
                "Hourly email limit reached ({}/{})",
                sent, limit
            )),
        }
    }
}

/// Quota guard over the settings counter and the delivery log
pub struct QuotaGuard {
    settings: Arc<dyn EmailSettingsRepository>,
    log: Arc<dyn DeliveryLogRepository>,
}

impl QuotaGuard {
    pub fn new(
        settings: Arc<dyn EmailSettingsRepository>,
        log: Arc<dyn DeliveryLogRepository>,
    ) -> Self {
        Self { settings, log }
    }

    /// Check whether one more send is allowed at `now`
    pub async fn check(&self, now: DateTime<Utc>) -> QuotaDecision {
        match self.evaluate(now).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "Quota check failed, allowing send");
                QuotaDecision::Allowed
            }
        }
    }

    async fn evaluate(&self, now: DateTime<Utc>) -> Result<QuotaDecision> {
        if self.settings.reset_daily_count_if_stale(now.date_naive()).await? {
            debug!("Daily email counter reset");
        }

        let Some(settings) = self.settings.get().await? else {
            return Ok(QuotaDecision::Allowed);
        };

        let sent_today = i64::from(settings.emails_sent_today);
        let daily_limit = i64::from(settings.max_daily_emails);
        if sent_today >= daily_limit {
            return Ok(QuotaDecision::DailyLimitReached {
                sent: sent_today,
                limit: daily_limit,
            });
        }

        let hourly_limit = i64::from(settings.max_hourly_emails);
        let sent_last_hour = self.log.count_sent_since(now - Duration::hours(1)).await?;
        if sent_last_hour >= hourly_limit {
            return Ok(QuotaDecision::HourlyLimitReached {
                sent: sent_last_hour,
                limit: hourly_limit,
            });
        }

        Ok(QuotaDecision::Allowed)
    }

    /// Count one provider-confirmed send
    ///
    /// Only the success path calls this, once per logical send. The increment
    /// is a single server-side statement, so concurrent senders cannot lose
    /// updates.
    pub async fn record_send(&self, now: DateTime<Utc>) {
        if let Err(e) = self.settings.reset_daily_count_if_stale(now.date_naive()).await {
            warn!(error = %e, "Failed to reset daily email counter");
        }

        match self.settings.increment_daily_count().await {
            Ok(Some(count)) => debug!(emails_sent_today = count, "Daily email counter updated"),
            Ok(None) => debug!("No email settings row, daily counter not tracked"),
            Err(e) => warn!(error = %e, "Failed to update daily email counter"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tavola_storage::memory::{MemoryDeliveryLog, MemoryEmailSettings};
    use tavola_storage::models::EmailSettings;

    fn guard(settings: EmailSettings) -> (QuotaGuard, Arc<MemoryEmailSettings>) {
        let store = Arc::new(MemoryEmailSettings::new(settings));
        let guard = QuotaGuard::new(store.clone(), Arc::new(MemoryDeliveryLog::new()));
        (guard, store)
    }

    #[tokio::test]
    async fn test_daily_limit() {
        let (guard, _) = guard(EmailSettings {
            emails_sent_today: 1000,
            max_daily_emails: 1000,
            ..Default::default()
        });

        assert_eq!(
            guard.check(Utc::now()).await,
            QuotaDecision::DailyLimitReached {
                sent: 1000,
                limit: 1000
            }
        );
    }

    #[tokio::test]
    async fn test_new_day_resets_before_comparing() {
        let yesterday = Utc::now().date_naive() - Duration::days(1);
        let (guard, store) = guard(EmailSettings {
            emails_sent_today: 1000,
            max_daily_emails: 1000,
            last_reset_date: yesterday,
            ..Default::default()
        });

        assert_eq!(guard.check(Utc::now()).await, QuotaDecision::Allowed);
        let settings = store.snapshot().await.unwrap();
        assert_eq!(settings.emails_sent_today, 0);
        assert_eq!(settings.last_reset_date, Utc::now().date_naive());
    }

    #[tokio::test]
    async fn test_fails_open() {
        let (guard, store) = guard(EmailSettings {
            emails_sent_today: 5000,
            max_daily_emails: 1,
            ..Default::default()
        });
        store.set_failing(true);

        assert!(guard.check(Utc::now()).await.is_allowed());
    }

    #[tokio::test]
    async fn test_record_send_increments_once() {
        let (guard, store) = guard(EmailSettings {
            emails_sent_today: 999,
            ..Default::default()
        });

        guard.record_send(Utc::now()).await;
        assert_eq!(store.snapshot().await.unwrap().emails_sent_today, 1000);
        assert!(!guard.check(Utc::now()).await.is_allowed());
    }

    #[test]
    fn test_reason() {
        assert_eq!(QuotaDecision::Allowed.reason(), None);
        assert_eq!(
            QuotaDecision::HourlyLimitReached { sent: 100, limit: 100 }
                .reason()
                .unwrap(),
            "Hourly email limit reached (100/100)"
        );
    }
}
