//! Worker processes: spawning them from the master and running them on the worker side.
mod error;
pub use error::{ExecError, ExecResult};

pub mod channel;

pub mod handler;
pub use handler::{Answer, WorkerSignalHandler};

pub mod spawner;
pub use spawner::{ProcConfig, ProcSpawner};

pub mod util;

pub mod worker;
pub use worker::{WorkerContext, is_worker, run_worker, worker_env};

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult};
    pub use crate::{ProcConfig, ProcSpawner, WorkerContext, run_worker};
}
