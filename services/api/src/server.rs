use crate::cli::ServeArgs;
use crate::infra::{connect_pool, AppState};
use crate::routes::with_licensing_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use gull_licensing::config::AppConfig;
use gull_licensing::error::AppError;
use gull_licensing::licensing::{
    CatalogueCategories, LicenceStore, LicensingService, MemoryLicenceStore, PgLicenceStore,
};
use gull_licensing::notifications::{NotificationQueue, NotifyClient, RetryPolicy};
use gull_licensing::scheduler::ReminderScheduler;
use gull_licensing::telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const RETRY_DELAY: Duration = Duration::from_secs(5);

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    match config.database.url.clone() {
        Some(url) => {
            let pool = connect_pool(&config.database, &url).await?;
            info!(max_connections = config.database.max_connections, "connected to postgres");
            serve(config, Arc::new(PgLicenceStore::new(pool))).await
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory licence store");
            serve(config, Arc::new(MemoryLicenceStore::default())).await
        }
    }
}

async fn serve<S>(config: AppConfig, store: Arc<S>) -> Result<(), AppError>
where
    S: LicenceStore + 'static,
{
    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let notify = NotifyClient::from_config(&config.notify)?;
    if !notify.is_enabled() {
        warn!("NOTIFY_API_KEY not set; notification emails are disabled");
    }
    let (queue, worker) = NotificationQueue::channel(
        Arc::new(notify),
        RetryPolicy::new(config.notify.retry_attempts, RETRY_DELAY),
    );
    tokio::spawn(worker.run());

    if let Some(scheduler) = ReminderScheduler::from_config(&config.reminder) {
        tokio::spawn(scheduler.run());
    }

    let service = Arc::new(LicensingService::new(
        store,
        Arc::new(queue),
        CatalogueCategories::default(),
        config.notify.internal_mailbox.clone(),
    ));

    let app = with_licensing_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "gull licensing api ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// One-off reminder call for operators and cron jobs.
pub(crate) async fn remind() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let Some(scheduler) = ReminderScheduler::from_config(&config.reminder) else {
        println!("REMINDER_URL is not set; nothing to call");
        return Ok(());
    };

    let status = scheduler.trigger().await?;
    println!("Reminder endpoint {} responded with {}", scheduler.url(), status);
    Ok(())
}
