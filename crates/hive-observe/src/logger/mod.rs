//! `tracing` setup for hive processes. Output goes to stderr or journald; stdout is left to command answers.
mod config;
mod error;
mod format;
mod log;

pub use config::LoggerConfig;
pub use error::LoggerError;
pub use format::LoggerFormat;

use log::Logger;

type Install = fn(&LoggerConfig) -> Result<(), LoggerError>;

/// Install the process-wide subscriber described by `cfg`.
///
/// A second call fails with [`LoggerError::AlreadyInstalled`].
pub fn logger_init(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let install: Install = match cfg.format {
        LoggerFormat::Text => Logger::text,
        LoggerFormat::Json => Logger::json,
        LoggerFormat::Journald => Logger::journald,
    };
    install(cfg)
}
