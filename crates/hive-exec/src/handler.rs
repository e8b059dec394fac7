use std::{process, time::Instant};

use tracing::{debug, warn};

use hive_core::system;
use hive_model::{Payload, Signal, SignalType, WorkerIdentity};

/// Response to a master request, and whether the worker must go down after sending it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Answer {
    pub response: Signal,
    pub exit: bool,
}

/// Answers master requests inside a worker process.
#[derive(Clone, Debug)]
pub struct WorkerSignalHandler {
    identity: WorkerIdentity,
    started: Instant,
}

impl WorkerSignalHandler {
    pub fn new(identity: WorkerIdentity) -> Self {
        Self {
            identity,
            started: Instant::now(),
        }
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn answer(&self, request: &Signal) -> Option<Answer> {
        let (kind, exit, lines) = match request.kind() {
            SignalType::WorkerStatusReq => (
                SignalType::WorkerStatusRes,
                false,
                vec![
                    system::memory_line(),
                    format!("Uptime: {}s (pid {})", self.started.elapsed().as_secs(), process::id()),
                ],
            ),
            SignalType::WorkerRestartReq => (
                SignalType::WorkerRestartRes,
                true,
                vec![format!("Restarting worker (pid {})", process::id())],
            ),
            SignalType::WorkerReloadReq => (
                SignalType::WorkerReloadRes,
                true,
                vec![format!("Reloading worker (pid {})", process::id())],
            ),
            other => {
                warn!(kind = %other, "worker cannot answer this signal");
                return None;
            }
        };
        debug!(request = %request.kind(), id = %request.correlation_id(), "answering master");

        Some(Answer {
            response: self.signal(kind, Some(request), lines),
            exit,
        })
    }

    /// Broadcast announcement that the worker serves again.
    pub fn ready(&self) -> Signal {
        self.signal(
            SignalType::WorkerReady,
            None,
            vec![format!("Worker ready (pid {})", process::id())],
        )
    }

    fn signal(&self, kind: SignalType, request: Option<&Signal>, lines: Vec<String>) -> Signal {
        Signal::new(kind, request.map(|r| r.correlation_id().clone()))
            .with_payload(Payload::new(system::timestamp(), lines).with_worker(self.identity.clone()))
    }
}

#[cfg(test)]
mod tests {
    use hive_model::{CorrelationId, WorkerKey};

    use super::*;

    fn handler() -> WorkerSignalHandler {
        WorkerSignalHandler::new(WorkerIdentity {
            key: WorkerKey::from("w1"),
            index: 1,
        })
    }

    #[test]
    fn status_keeps_the_worker_running() {
        let req = Signal::new(SignalType::WorkerStatusReq, Some("jar-a".into()));
        let answer = handler().answer(&req).unwrap();

        assert!(!answer.exit);
        assert_eq!(answer.response.kind(), SignalType::WorkerStatusRes);
        assert_eq!(answer.response.correlation_id().as_str(), "jar-a");
        assert_eq!(answer.response.worker().unwrap().index, 1);
        assert!(answer.response.payload().unwrap().messages[0].starts_with("Memory usage"));
    }

    #[test]
    fn restart_and_reload_request_exit() {
        for (req, res) in [
            (SignalType::WorkerRestartReq, SignalType::WorkerRestartRes),
            (SignalType::WorkerReloadReq, SignalType::WorkerReloadRes),
        ] {
            let answer = handler().answer(&Signal::new(req, Some("jar-b".into()))).unwrap();
            assert!(answer.exit);
            assert_eq!(answer.response.kind(), res);
        }
    }

    #[test]
    fn master_kinds_are_not_answered() {
        assert!(handler().answer(&Signal::new(SignalType::MasterStatusReq, None)).is_none());
    }

    #[test]
    fn ready_is_broadcast() {
        let ready = handler().ready();
        assert_eq!(ready.kind(), SignalType::WorkerReady);
        assert_eq!(ready.correlation_id(), &CorrelationId::broadcast());
        assert_eq!(ready.worker().unwrap().key, WorkerKey::from("w1"));
    }
}
