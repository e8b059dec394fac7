//! Entry point for applications run as a hive.
//!
//! One binary plays three roles, picked at startup:
//! - no argument (or `watch`): the master, which forks the workers and serves the control socket;
//! - `status`, `restart`, `reload`: a client that asks the running master and prints the answer;
//! - `HIVE_WORKER_PARAMS` in the environment: a worker running the application.
//!
//! ```ignore
//! Hive::bind("echo", RuntimeConfig::from_env_or(RuntimeConfig::default())?)
//!     .run(|ctx| async move { serve(ctx).await })
//!     .await?;
//! ```
mod error;
pub use error::RuntimeError;

mod config;
pub use config::{CONFIG_ENV, RuntimeConfig};

mod scope;
pub use scope::{RuntimeScope, WATCH_ARG};

mod shutdown;
pub use shutdown::install_shutdown_handler;

mod hive;
pub use hive::Hive;

pub mod prelude {
    pub use crate::{Hive, RuntimeConfig, RuntimeError, RuntimeScope};
    pub use hive_core::{ConnTemplate, ExitPolicy, HiveConfig, WatchConfig};
    pub use hive_exec::WorkerContext;
    pub use hive_model::{Command, WorkerEndpoint};
    pub use hive_observe::{LoggerConfig, LoggerFormat};
}
