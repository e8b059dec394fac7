use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("invalid watch pattern: {0:?}")]
    InvalidPattern(String),
    #[error("watch interval must be positive")]
    ZeroInterval,
}
