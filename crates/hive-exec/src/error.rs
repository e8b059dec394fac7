use thiserror::Error;

use hive_core::CoreError;
use hive_model::ModelError;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("not started by a hive master: {0} is not set")]
    MissingEnv(&'static str),
    #[error("invalid channel descriptor: {0}")]
    InvalidChannelFd(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("application failed: {0}")]
    App(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

impl From<ExecError> for CoreError {
    fn from(e: ExecError) -> Self {
        CoreError::Spawn(e.to_string())
    }
}

pub type ExecResult<T> = Result<T, ExecError>;
