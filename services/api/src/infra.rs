use async_trait::async_trait;
use chrono::NaiveDate;
use gull_licensing::config::DatabaseConfig;
use gull_licensing::notifications::{
    DispatchOutcome, Notification, NotificationDispatcher, NotificationError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Collects notifications instead of sending them; used by the CLI demo.
#[derive(Default, Clone)]
pub(crate) struct InMemoryNotifications {
    sent: Arc<Mutex<Vec<Notification>>>,
}

#[async_trait]
impl NotificationDispatcher for InMemoryNotifications {
    async fn send(&self, notification: Notification) -> Result<DispatchOutcome, NotificationError> {
        let mut guard = self.sent.lock().expect("notification mutex poisoned");
        guard.push(notification);
        Ok(DispatchOutcome::Sent { provider_id: None })
    }
}

impl InMemoryNotifications {
    pub(crate) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notification mutex poisoned").clone()
    }
}

pub(crate) async fn connect_pool(config: &DatabaseConfig, url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_accepts_iso_dates() {
        assert_eq!(
            parse_date(" 2026-05-14 "),
            Ok(NaiveDate::from_ymd_opt(2026, 5, 14).expect("valid"))
        );
        assert!(parse_date("14/05/2026").is_err());
    }
}
