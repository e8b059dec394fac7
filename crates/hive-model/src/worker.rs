use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Environment key carrying the serialized [`WorkerParams`] of a forked worker.
pub const WORKER_PARAMS_KEY: &str = "HIVE_WORKER_PARAMS";

/// Environment key carrying the file descriptor of the master channel inside a worker.
pub const WORKER_CHANNEL_FD_KEY: &str = "HIVE_CHANNEL_FD";

/// Where a worker's own listener should bind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerEndpoint {
    /// Unix domain socket.
    Socket { path: PathBuf },
    /// TCP port, optionally bound to a specific host.
    Tcp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        port: u16,
    },
}

/// Connection parameters handed to a worker at fork time.
///
/// The parameters are derived from the slot index only, so a respawned process gets exactly the same values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerParams {
    #[serde(flatten)]
    pub endpoint: WorkerEndpoint,
    pub index: usize,
}

impl WorkerParams {
    pub fn new(endpoint: WorkerEndpoint, index: usize) -> Self {
        Self { endpoint, index }
    }

    /// Value stored under [`WORKER_PARAMS_KEY`].
    pub fn to_env_value(&self) -> Result<String, ModelError> {
        serde_json::to_string(self).map_err(|e| ModelError::InvalidWorkerParams(e.to_string()))
    }

    pub fn from_env_value(value: &str) -> Result<Self, ModelError> {
        serde_json::from_str(value).map_err(|e| ModelError::InvalidWorkerParams(e.to_string()))
    }

    /// Stable slot identity.
    pub fn key(&self) -> Result<WorkerKey, ModelError> {
        self.to_env_value().map(WorkerKey)
    }
}

/// Opaque, respawn-stable identity of a worker slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerKey(String);

impl WorkerKey {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for WorkerKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkerKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity a worker attaches to every signal it sends.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub key: WorkerKey,
    pub index: usize,
}
