use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, fmt, fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::logger::{config::LoggerConfig, error::LoggerError};

/// Overrides `LoggerConfig::level` when set to something non-blank.
const LEVEL_ENV: &str = "RUST_LOG";

/// Syslog identifier for journald records.
#[cfg(all(target_os = "linux", feature = "journald"))]
const JOURNALD_IDENT: &str = "hive";

pub struct Logger;

impl Logger {
    pub fn text(cfg: &LoggerConfig) -> Result<(), LoggerError> {
        let lines = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(cfg.use_color)
            .with_target(cfg.with_targets)
            .with_timer(local_timer());
        install(tracing_subscriber::registry().with(level_filter(cfg)?).with(lines))
    }

    /// One JSON object per event, current span included.
    pub fn json(cfg: &LoggerConfig) -> Result<(), LoggerError> {
        let objects = fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(cfg.with_targets)
            .with_timer(local_timer());
        install(tracing_subscriber::registry().with(level_filter(cfg)?).with(objects))
    }

    #[cfg(all(target_os = "linux", feature = "journald"))]
    pub fn journald(cfg: &LoggerConfig) -> Result<(), LoggerError> {
        let filter = level_filter(cfg)?;
        let journal = tracing_journald::layer()
            .map_err(|e| LoggerError::Install(format!("journald socket: {e}")))?
            .with_syslog_identifier(JOURNALD_IDENT.to_string());
        install(tracing_subscriber::registry().with(filter).with(journal))
    }

    #[cfg(not(all(target_os = "linux", feature = "journald")))]
    pub fn journald(_cfg: &LoggerConfig) -> Result<(), LoggerError> {
        Err(LoggerError::JournaldUnavailable)
    }
}

fn level_filter(cfg: &LoggerConfig) -> Result<EnvFilter, LoggerError> {
    let directive = std::env::var(LEVEL_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| cfg.level.clone());
    match EnvFilter::try_new(&directive) {
        Ok(filter) => Ok(filter),
        Err(e) => Err(LoggerError::BadFilter { reason: e.to_string(), directive }),
    }
}

fn local_timer() -> OffsetTime<Rfc3339> {
    OffsetTime::new(UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC), Rfc3339)
}

fn install<S>(subscriber: S) -> Result<(), LoggerError>
where
    S: Subscriber + Send + Sync + 'static,
{
    if tracing::dispatcher::has_been_set() {
        return Err(LoggerError::AlreadyInstalled);
    }
    subscriber.try_init().map_err(|e| LoggerError::Install(e.to_string()))
}
