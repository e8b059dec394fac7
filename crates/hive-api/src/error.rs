use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("cannot connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("no complete answer within {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("io error: {0}")]
    Io(String),

    #[error("core error: {0}")]
    Core(#[from] hive_core::CoreError),
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::Io(e.to_string())
    }
}
