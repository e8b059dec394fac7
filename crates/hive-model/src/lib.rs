//! Wire-level and identity types shared by the master, the workers and the control client.

mod error;
pub use error::ModelError;

mod signal;
pub use signal::{CorrelationId, Payload, Signal, SignalType, BROADCAST_ID};

mod command;
pub use command::Command;

mod worker;
pub use worker::{WORKER_CHANNEL_FD_KEY, WORKER_PARAMS_KEY, WorkerEndpoint, WorkerIdentity, WorkerKey, WorkerParams};

mod event;
pub use event::{Event, EventKind};

/// Timeout value in milliseconds.
///
/// Used in configuration where an explicit time limit is required.
pub type TimeoutMs = u64;
