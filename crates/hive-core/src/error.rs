use thiserror::Error;

use hive_model::ModelError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("worker channel closed: {0}")]
    ChannelClosed(String),
    #[error("master event loop is gone")]
    MasterUnavailable,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
