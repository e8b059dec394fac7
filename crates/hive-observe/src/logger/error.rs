use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("unknown log format {0:?} (expected: text|json|journald)")]
    UnknownFormat(String),
    #[error("journald output needs linux and the `journald` feature")]
    JournaldUnavailable,
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
    #[error("cannot install log subscriber: {0}")]
    Install(String),
    #[error("bad log filter {directive:?}: {reason}")]
    BadFilter { directive: String, reason: String },
}
