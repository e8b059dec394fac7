use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ModelError, WorkerIdentity};

/// Correlation id carried by signals that are not tied to any command invocation.
pub const BROADCAST_ID: &str = "__NO_UID__";

/// Opaque token scoping every signal that belongs to one command invocation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh, unique id for a new invocation.
    pub fn generate() -> Self {
        Self(format!("jar-{}", uuid::Uuid::new_v4()))
    }

    /// The broadcast sentinel.
    pub fn broadcast() -> Self {
        Self(BROADCAST_ID.to_string())
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST_ID
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::broadcast()
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed set of signal kinds.
///
/// `M_M_*` kinds are exchanged between the master and itself, `M_W_*` go from the master to a worker and `W_M_*` come back from a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    #[serde(rename = "M_M_STATUS_REQ")]
    MasterStatusReq,
    #[serde(rename = "M_M_STATUS_RES")]
    MasterStatusRes,
    #[serde(rename = "M_M_RESTART_REQ")]
    MasterRestartReq,
    #[serde(rename = "M_M_RESTART_RES")]
    MasterRestartRes,
    #[serde(rename = "M_M_RELOAD_REQ")]
    MasterReloadReq,
    #[serde(rename = "M_M_RELOAD_RES")]
    MasterReloadRes,

    #[serde(rename = "M_W_STATUS_REQ")]
    WorkerStatusReq,
    #[serde(rename = "W_M_STATUS_RES")]
    WorkerStatusRes,
    #[serde(rename = "M_W_RESTART_REQ")]
    WorkerRestartReq,
    #[serde(rename = "W_M_RESTART_RES")]
    WorkerRestartRes,
    #[serde(rename = "M_W_RELOAD_REQ")]
    WorkerReloadReq,
    #[serde(rename = "W_M_RELOAD_RES")]
    WorkerReloadRes,
    #[serde(rename = "W_M_READY")]
    WorkerReady,
}

impl SignalType {
    pub const ALL: [SignalType; 13] = [
        SignalType::MasterStatusReq,
        SignalType::MasterStatusRes,
        SignalType::MasterRestartReq,
        SignalType::MasterRestartRes,
        SignalType::MasterReloadReq,
        SignalType::MasterReloadRes,
        SignalType::WorkerStatusReq,
        SignalType::WorkerStatusRes,
        SignalType::WorkerRestartReq,
        SignalType::WorkerRestartRes,
        SignalType::WorkerReloadReq,
        SignalType::WorkerReloadRes,
        SignalType::WorkerReady,
    ];

    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::MasterStatusReq => "M_M_STATUS_REQ",
            SignalType::MasterStatusRes => "M_M_STATUS_RES",
            SignalType::MasterRestartReq => "M_M_RESTART_REQ",
            SignalType::MasterRestartRes => "M_M_RESTART_RES",
            SignalType::MasterReloadReq => "M_M_RELOAD_REQ",
            SignalType::MasterReloadRes => "M_M_RELOAD_RES",
            SignalType::WorkerStatusReq => "M_W_STATUS_REQ",
            SignalType::WorkerStatusRes => "W_M_STATUS_RES",
            SignalType::WorkerRestartReq => "M_W_RESTART_REQ",
            SignalType::WorkerRestartRes => "W_M_RESTART_RES",
            SignalType::WorkerReloadReq => "M_W_RELOAD_REQ",
            SignalType::WorkerReloadRes => "W_M_RELOAD_RES",
            SignalType::WorkerReady => "W_M_READY",
        }
    }

    /// Returns `true` for the kinds the master sends to and answers for itself.
    pub fn is_master_directed(&self) -> bool {
        matches!(
            self,
            SignalType::MasterStatusReq
                | SignalType::MasterStatusRes
                | SignalType::MasterRestartReq
                | SignalType::MasterRestartRes
                | SignalType::MasterReloadReq
                | SignalType::MasterReloadRes
        )
    }
}

impl FromStr for SignalType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignalType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| ModelError::InvalidSignalType(s.to_string()))
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific data attached to a signal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    /// Local wall-clock time of the sender.
    pub timestamp: String,
    /// Human-readable lines shown to the operator.
    #[serde(default)]
    pub messages: Vec<String>,
    /// Identity of the sending worker; absent for master-originated signals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerIdentity>,
}

impl Payload {
    pub fn new<I, S>(timestamp: impl Into<String>, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            timestamp: timestamp.into(),
            messages: messages.into_iter().map(Into::into).collect(),
            worker: None,
        }
    }

    pub fn with_worker(mut self, worker: WorkerIdentity) -> Self {
        self.worker = Some(worker);
        self
    }
}

/// A typed, correlation-tagged control message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    #[serde(rename = "type")]
    kind: SignalType,
    correlation_id: CorrelationId,
    payload: Option<Payload>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSignal {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    correlation_id: Value,
    #[serde(default)]
    payload: Value,
}

impl Signal {
    /// Create a signal of the given kind; `None` means broadcast.
    pub fn new(kind: SignalType, id: Option<CorrelationId>) -> Self {
        Self {
            kind,
            correlation_id: id.unwrap_or_default(),
            payload: None,
        }
    }

    /// Create a signal from a wire name, failing for names outside the known set.
    pub fn from_type_name(name: &str, id: Option<CorrelationId>) -> Result<Self, ModelError> {
        Ok(Self::new(name.parse()?, id))
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    #[inline]
    pub fn kind(&self) -> SignalType {
        self.kind
    }

    #[inline]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    #[inline]
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Identity of the worker that sent this signal, if any.
    pub fn worker(&self) -> Option<&WorkerIdentity> {
        self.payload.as_ref().and_then(|p| p.worker.as_ref())
    }

    /// Canonical single-line JSON encoding.
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).expect("signal fields always serialize to JSON")
    }

    /// Strict inverse of [`Signal::serialize`].
    ///
    /// Returns `None` for anything that is not a JSON object with a known `type` and a well-formed payload.
    /// A missing or non-string `correlationId` is read as the broadcast sentinel.
    pub fn parse(bytes: &[u8]) -> Option<Signal> {
        let value: Value = serde_json::from_slice(bytes).ok()?;
        if !value.is_object() {
            return None;
        }
        let raw: RawSignal = serde_json::from_value(value).ok()?;
        let kind = raw.kind.parse::<SignalType>().ok()?;

        let correlation_id = match raw.correlation_id {
            Value::String(id) => CorrelationId::from(id),
            _ => CorrelationId::broadcast(),
        };
        let payload = match raw.payload {
            Value::Null => None,
            other => Some(serde_json::from_value::<Payload>(other).ok()?),
        };

        Some(Signal {
            kind,
            correlation_id,
            payload,
        })
    }
}
