use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid signal type: {0:?}")]
    InvalidSignalType(String),
    #[error("unknown command: {0:?} (expected: status|restart|reload)")]
    UnknownCommand(String),
    #[error("invalid worker params: {0}")]
    InvalidWorkerParams(String),
}
