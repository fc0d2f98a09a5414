use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use chrono::NaiveTime;

pub const DEFAULT_NOTIFY_BASE_URL: &str = "https://api.notifications.service.gov.uk";
pub const DEFAULT_AMENDMENT_TEMPLATE_ID: &str = "8c3d2e8a-5d8f-4b1e-9a63-0f2f5e4b7a11";
pub const DEFAULT_RETURN_TEMPLATE_ID: &str = "2f6c1a4b-9e7d-4c3a-8b5f-6d1e0a9c3b22";
pub const DEFAULT_INTERNAL_MAILBOX: &str = "licensing@nature.scot";
const DEFAULT_REMINDER_TIME: &str = "05:00";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub database: DatabaseConfig,
    pub notify: NotifyConfig,
    pub reminder: ReminderConfig,
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn var_or(name: &str, default: &str) -> String {
    optional_var(name).unwrap_or_else(|| default.to_string())
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(&var_or("APP_ENV", "development"));

        let host = var_or("APP_HOST", "127.0.0.1");
        let port = var_or("APP_PORT", "3000")
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = var_or("APP_LOG_LEVEL", "info");

        let max_connections = var_or("DATABASE_MAX_CONNECTIONS", "5")
            .parse::<u32>()
            .ok()
            .filter(|value| *value > 0)
            .ok_or(ConfigError::InvalidMaxConnections)?;

        let retry_attempts = var_or("NOTIFY_RETRY_ATTEMPTS", "3")
            .parse::<u32>()
            .ok()
            .filter(|value| *value > 0)
            .ok_or(ConfigError::InvalidRetryAttempts)?;

        let reminder_time = var_or("REMINDER_TIME", DEFAULT_REMINDER_TIME);
        let at = NaiveTime::parse_from_str(&reminder_time, "%H:%M").map_err(|source| {
            ConfigError::InvalidReminderTime {
                value: reminder_time.clone(),
                source,
            }
        })?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            database: DatabaseConfig {
                url: optional_var("DATABASE_URL"),
                max_connections,
            },
            notify: NotifyConfig {
                api_key: optional_var("NOTIFY_API_KEY"),
                base_url: var_or("NOTIFY_BASE_URL", DEFAULT_NOTIFY_BASE_URL),
                amendment_template_id: var_or(
                    "NOTIFY_AMENDMENT_TEMPLATE_ID",
                    DEFAULT_AMENDMENT_TEMPLATE_ID,
                ),
                return_template_id: var_or("NOTIFY_RETURN_TEMPLATE_ID", DEFAULT_RETURN_TEMPLATE_ID),
                reply_to_id: optional_var("NOTIFY_REPLY_TO_ID"),
                internal_mailbox: var_or("NOTIFY_INTERNAL_MAILBOX", DEFAULT_INTERNAL_MAILBOX),
                retry_attempts,
            },
            reminder: ReminderConfig {
                url: optional_var("REMINDER_URL"),
                at,
            },
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Without a URL the service runs against the in-memory store.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

/// Transactional email settings. A missing API key disables outbound email.
#[derive(Clone)]
pub struct NotifyConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub amendment_template_id: String,
    pub return_template_id: String,
    pub reply_to_id: Option<String>,
    /// Receives a copy of every amendment email.
    pub internal_mailbox: String,
    pub retry_attempts: u32,
}

impl fmt::Debug for NotifyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("amendment_template_id", &self.amendment_template_id)
            .field("return_template_id", &self.return_template_id)
            .field("reply_to_id", &self.reply_to_id)
            .field("internal_mailbox", &self.internal_mailbox)
            .field("retry_attempts", &self.retry_attempts)
            .finish()
    }
}

/// Daily reminder callback. Disabled when no URL is set.
#[derive(Debug, Clone)]
pub struct ReminderConfig {
    pub url: Option<String>,
    /// Local wall-clock time the reminder fires at.
    pub at: NaiveTime,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost {
        source: std::net::AddrParseError,
    },
    InvalidMaxConnections,
    InvalidRetryAttempts,
    InvalidReminderTime {
        value: String,
        source: chrono::ParseError,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidMaxConnections => {
                write!(f, "DATABASE_MAX_CONNECTIONS must be a positive integer")
            }
            ConfigError::InvalidRetryAttempts => {
                write!(f, "NOTIFY_RETRY_ATTEMPTS must be a positive integer")
            }
            ConfigError::InvalidReminderTime { value, .. } => {
                write!(f, "REMINDER_TIME '{value}' must be formatted HH:MM")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort
            | ConfigError::InvalidMaxConnections
            | ConfigError::InvalidRetryAttempts => None,
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidReminderTime { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    const VARS: [&str; 15] = [
        "APP_ENV",
        "APP_HOST",
        "APP_PORT",
        "APP_LOG_LEVEL",
        "DATABASE_URL",
        "DATABASE_MAX_CONNECTIONS",
        "NOTIFY_API_KEY",
        "NOTIFY_BASE_URL",
        "NOTIFY_AMENDMENT_TEMPLATE_ID",
        "NOTIFY_RETURN_TEMPLATE_ID",
        "NOTIFY_REPLY_TO_ID",
        "NOTIFY_INTERNAL_MAILBOX",
        "NOTIFY_RETRY_ATTEMPTS",
        "REMINDER_URL",
        "REMINDER_TIME",
    ];

    fn reset_env() {
        for name in VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert!(config.database.url.is_none());
        assert!(config.notify.api_key.is_none());
        assert_eq!(config.notify.internal_mailbox, DEFAULT_INTERNAL_MAILBOX);
        assert_eq!(config.notify.retry_attempts, 3);
        assert!(config.reminder.url.is_none());
        assert_eq!(
            config.reminder.at,
            NaiveTime::from_hms_opt(5, 0, 0).expect("valid time")
        );
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn blank_api_key_disables_notifications() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("NOTIFY_API_KEY", "   ");
        let config = AppConfig::load().expect("config loads");
        assert!(config.notify.api_key.is_none());
        reset_env();
    }

    #[test]
    fn rejects_malformed_reminder_time() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("REMINDER_TIME", "5am");
        let err = AppConfig::load().expect_err("invalid time rejected");
        assert!(matches!(err, ConfigError::InvalidReminderTime { .. }));
        reset_env();
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("NOTIFY_API_KEY", "very-secret-key");
        let config = AppConfig::load().expect("config loads");
        let rendered = format!("{:?}", config.notify);
        assert!(!rendered.contains("very-secret-key"));
        reset_env();
    }
}
