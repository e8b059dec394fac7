//! Master-side orchestration: command jars, the command registry, the worker pool and the master event loop.
pub mod error;
pub use error::CoreError;

pub mod bus;
pub use bus::{Bus, Subscribe};

pub mod config;
pub use config::{ConnTemplate, ControlTarget, ExitPolicy, HiveConfig, WatchConfig};

pub mod handler;
pub use handler::CommandHandler;

pub mod jar;
pub use jar::{CommandJar, DestroyReason, Fleet, JarParams, JarReport, JarState};

pub mod master;
pub use master::{FleetSnapshot, Master, MasterEvent, MasterHandle, MasterResponder};

pub mod sink;
pub use sink::ResponseSink;

pub mod supervisor;
pub use supervisor::{Supervisor, WorkerChannel, WorkerSpawner};

pub mod system;
