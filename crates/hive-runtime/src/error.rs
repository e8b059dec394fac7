use thiserror::Error;

use hive_api::ApiError;
use hive_core::CoreError;
use hive_exec::ExecError;
use hive_observe::LoggerError;
use hive_watch::WatchError;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("invalid config: {0}")]
    Config(String),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error(transparent)]
    Logger(#[from] LoggerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
