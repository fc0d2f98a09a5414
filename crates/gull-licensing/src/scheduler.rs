//! Daily reminder callback.

use std::time::Duration;

use chrono::{Days, Local, NaiveDateTime, NaiveTime};
use tracing::{info, warn};

use crate::config::ReminderConfig;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("reminder request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// First occurrence of `at` strictly after `now`.
pub fn next_run_after(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        return today;
    }
    match now.date().checked_add_days(Days::new(1)) {
        Some(tomorrow) => tomorrow.and_time(at),
        None => today,
    }
}

/// Time left until `next`, zero once it has passed.
pub fn wait_until(next: NaiveDateTime, now: NaiveDateTime) -> Duration {
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Fires one empty PATCH at a configured URL once a day.
#[derive(Debug, Clone)]
pub struct ReminderScheduler {
    http: reqwest::Client,
    url: String,
    at: NaiveTime,
}

impl ReminderScheduler {
    pub fn new(url: impl Into<String>, at: NaiveTime) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            at,
        }
    }

    /// `None` when no reminder URL is configured.
    pub fn from_config(config: &ReminderConfig) -> Option<Self> {
        match &config.url {
            Some(url) => Some(Self::new(url.clone(), config.at)),
            None => {
                info!("no reminder url configured; daily reminder disabled");
                None
            }
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue the reminder call once. The response status is logged and otherwise ignored.
    pub async fn trigger(&self) -> Result<u16, SchedulerError> {
        let response = self.http.patch(&self.url).send().await?;
        let status = response.status().as_u16();
        info!(url = %self.url, status, "reminder endpoint called");
        Ok(status)
    }

    /// Sleep until the configured time each day and trigger. Never returns.
    ///
    /// Each slot follows the one just fired, so a wall clock stepped backwards cannot
    /// schedule the same day twice.
    pub async fn run(self) {
        info!(url = %self.url, at = %self.at, "daily reminder scheduled");
        let mut next = next_run_after(Local::now().naive_local(), self.at);
        loop {
            tokio::time::sleep(wait_until(next, Local::now().naive_local())).await;

            if let Err(err) = self.trigger().await {
                warn!(url = %self.url, error = %err, "reminder call failed");
            }
            next = next_run_after(next, self.at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
    }

    fn on(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, day)
            .expect("valid date")
            .and_time(at(hour, minute))
    }

    #[test]
    fn runs_later_today_when_time_not_reached() {
        assert_eq!(next_run_after(on(14, 3, 30), at(5, 0)), on(14, 5, 0));
    }

    #[test]
    fn runs_tomorrow_once_time_has_passed() {
        assert_eq!(next_run_after(on(14, 5, 0), at(5, 0)), on(15, 5, 0));
        assert_eq!(next_run_after(on(14, 23, 59), at(5, 0)), on(15, 5, 0));
    }

    #[test]
    fn clock_stepped_back_after_firing_waits_for_tomorrow() {
        let fired = on(14, 5, 0);
        let next = next_run_after(fired, at(5, 0));
        assert_eq!(next, on(15, 5, 0));

        let stepped_back = on(14, 4, 30);
        assert_eq!(
            wait_until(next, stepped_back),
            Duration::from_secs(24 * 3600 + 30 * 60)
        );
    }

    #[test]
    fn overdue_slot_fires_immediately() {
        assert_eq!(wait_until(on(14, 5, 0), on(14, 5, 1)), Duration::ZERO);
    }

    #[test]
    fn missing_url_disables_scheduler() {
        let config = ReminderConfig {
            url: None,
            at: at(5, 0),
        };
        assert!(ReminderScheduler::from_config(&config).is_none());

        let config = ReminderConfig {
            url: Some("https://example.org/reminders".to_string()),
            at: at(5, 0),
        };
        let scheduler = ReminderScheduler::from_config(&config).expect("enabled");
        assert_eq!(scheduler.url(), "https://example.org/reminders");
    }
}
