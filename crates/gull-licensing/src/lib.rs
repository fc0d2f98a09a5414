pub mod config;
pub mod error;
pub mod licensing;
pub mod notifications;
pub mod scheduler;
pub mod telemetry;
