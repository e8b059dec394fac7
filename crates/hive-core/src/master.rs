use std::{
    process,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hive_model::{Payload, Signal, SignalType, WorkerKey};

use crate::{
    bus::Bus,
    config::HiveConfig,
    error::CoreError,
    handler::CommandHandler,
    jar::{Fleet, StartFn},
    sink::ResponseSink,
    supervisor::{Supervisor, WorkerChannel, WorkerSpawner},
    system,
};

/// Input of the master event loop.
#[derive(Debug)]
pub enum MasterEvent {
    /// Operator command with the sink its output is streamed to.
    Command { token: String, sink: ResponseSink },
    /// Signal from a worker or from the master's own responder.
    Signal(Signal),
    WorkerExited {
        key: WorkerKey,
        generation: u64,
        reason: String,
    },
    Respawn { key: WorkerKey },
    Shutdown,
}

/// Cloneable sender into the master event loop.
#[derive(Clone, Debug)]
pub struct MasterHandle {
    tx: mpsc::UnboundedSender<MasterEvent>,
}

impl MasterHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MasterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Submit an operator command; the receiver yields the output and ends when the command is done.
    pub fn command(&self, token: &str) -> Result<mpsc::UnboundedReceiver<String>, CoreError> {
        let (sink, rx) = ResponseSink::channel();
        self.send(MasterEvent::Command {
            token: token.trim().to_string(),
            sink,
        })?;
        Ok(rx)
    }

    pub fn signal(&self, signal: Signal) {
        if self.send(MasterEvent::Signal(signal)).is_err() {
            debug!("signal dropped, master loop is gone");
        }
    }

    pub fn worker_exited(&self, key: WorkerKey, generation: u64, reason: impl Into<String>) {
        let _ = self.send(MasterEvent::WorkerExited {
            key,
            generation,
            reason: reason.into(),
        });
    }

    pub fn respawn(&self, key: WorkerKey) {
        let _ = self.send(MasterEvent::Respawn { key });
    }

    pub fn shutdown(&self) {
        let _ = self.send(MasterEvent::Shutdown);
    }

    fn send(&self, event: MasterEvent) -> Result<(), CoreError> {
        self.tx.send(event).map_err(|_| CoreError::MasterUnavailable)
    }
}

/// Worker counts taken when a master starter is built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FleetSnapshot {
    pub live: usize,
    pub total: usize,
}

/// The master's answers to requests addressed to itself.
#[derive(Clone)]
pub struct MasterResponder {
    handle: MasterHandle,
    in_flight: Arc<AtomicUsize>,
    watching: Option<String>,
}

impl MasterResponder {
    pub fn new(handle: MasterHandle, in_flight: Arc<AtomicUsize>) -> Self {
        Self {
            handle,
            in_flight,
            watching: None,
        }
    }

    /// Report the file watcher's patterns in status answers.
    pub fn with_watcher(mut self, patterns: &[String]) -> Self {
        self.watching = (!patterns.is_empty()).then(|| patterns.join(", "));
        self
    }

    /// Compute the response to `request`; `None` for kinds the master does not answer.
    pub fn answer(&self, request: &Signal, fleet: FleetSnapshot) -> Option<Signal> {
        let (kind, lines) = match request.kind() {
            SignalType::MasterStatusReq => (
                SignalType::MasterStatusRes,
                vec![
                    system::memory_line(),
                    format!("Commands running: {}", self.in_flight.load(Ordering::Relaxed)),
                    format!("Workers: {}/{} live", fleet.live, fleet.total),
                    format!("Watcher: {}", self.watching.as_deref().unwrap_or("disabled")),
                    format!("Host: {} (pid {})", system::host_name(), process::id()),
                ],
            ),
            SignalType::MasterRestartReq => (
                SignalType::MasterRestartRes,
                vec!["You should not restart master application.".to_string()],
            ),
            SignalType::MasterReloadReq => (
                SignalType::MasterReloadRes,
                vec!["You should not reload master application.".to_string()],
            ),
            other => {
                warn!(kind = %other, "master cannot answer this signal");
                return None;
            }
        };

        Some(
            Signal::new(kind, Some(request.correlation_id().clone()))
                .with_payload(Payload::new(system::timestamp(), lines)),
        )
    }

    /// Answer `request` through the master inbox.
    pub fn respond(&self, request: &Signal, fleet: FleetSnapshot) {
        if let Some(response) = self.answer(request, fleet) {
            self.handle.signal(response);
        }
    }
}

struct FleetView<'a> {
    supervisor: &'a Supervisor,
    responder: &'a MasterResponder,
}

impl Fleet for FleetView<'_> {
    fn master_starter(&self, request: Signal) -> StartFn {
        let responder = self.responder.clone();
        let snapshot = FleetSnapshot {
            live: self.supervisor.live(),
            total: self.supervisor.total(),
        };
        Box::new(move || responder.respond(&request, snapshot))
    }

    fn each_worker(&self, f: &mut dyn FnMut(&WorkerKey, &WorkerChannel)) {
        self.supervisor.each_worker(f);
    }
}

/// The master event loop: owns the command registry and the worker pool.
pub struct Master {
    handler: CommandHandler,
    supervisor: Supervisor,
    responder: MasterResponder,
    handle: MasterHandle,
    inbox: mpsc::UnboundedReceiver<MasterEvent>,
    shutdown: CancellationToken,
}

impl Master {
    pub fn new(
        hive_name: &str,
        config: Arc<HiveConfig>,
        spawner: Arc<dyn WorkerSpawner>,
        bus: Bus,
        shutdown: CancellationToken,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let (handle, inbox) = MasterHandle::channel();

        let params = (0..config.num_workers)
            .map(|index| config.worker_params(hive_name, index))
            .collect();
        let supervisor = Supervisor::new(
            params,
            spawner,
            handle.clone(),
            config.respawn_delay(),
            bus.clone(),
        )?;
        let handler = CommandHandler::new(config, bus);
        let responder = MasterResponder::new(handle.clone(), handler.in_flight_gauge());

        Ok(Self {
            handler,
            supervisor,
            responder,
            handle,
            inbox,
            shutdown,
        })
    }

    pub fn handle(&self) -> MasterHandle {
        self.handle.clone()
    }

    /// Mark the master as watched by a file watcher over `patterns`.
    pub fn watching(mut self, patterns: &[String]) -> Self {
        self.responder = self.responder.with_watcher(patterns);
        self
    }

    /// Fork the workers and process events until shutdown.
    pub async fn run(mut self) {
        self.supervisor.fork_all();
        info!(workers = self.supervisor.total(), "master is ready");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                event = self.inbox.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => break,
                },
                Some(id) = self.handler.next_expired() => self.handler.expire(&id),
            }
        }

        info!(in_flight = self.handler.in_flight(), "master is stopping");
        self.handler.abort_all();
        self.supervisor.release_all();
    }

    fn dispatch(&mut self, event: MasterEvent) {
        match event {
            MasterEvent::Command { token, sink } => {
                let fleet = FleetView {
                    supervisor: &self.supervisor,
                    responder: &self.responder,
                };
                self.handler.handle(sink, &token, &fleet);
            }
            MasterEvent::Signal(signal) => self.handler.notify(&signal),
            MasterEvent::WorkerExited {
                key,
                generation,
                reason,
            } => self.supervisor.on_exit(&key, generation, &reason),
            MasterEvent::Respawn { key } => {
                if !self.shutdown.is_cancelled() {
                    self.supervisor.respawn(&key);
                }
            }
            MasterEvent::Shutdown => self.shutdown.cancel(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Mutex, time::Duration};

    use hive_model::{WorkerIdentity, WorkerParams};

    use super::*;

    /// Spawner whose "processes" answer from a tokio task, the way a real worker does over its channel.
    #[derive(Default)]
    struct LoopbackSpawner {
        /// Slots that acknowledge restarts but never come back.
        stuck: Vec<usize>,
        spawned: Mutex<usize>,
    }

    impl WorkerSpawner for LoopbackSpawner {
        fn spawn(
            &self,
            key: &WorkerKey,
            params: &WorkerParams,
            generation: u64,
            master: MasterHandle,
        ) -> Result<WorkerChannel, CoreError> {
            *self.spawned.lock().unwrap() += 1;
            let (tx, mut rx) = mpsc::unbounded_channel::<Signal>();
            let identity = WorkerIdentity {
                key: key.clone(),
                index: params.index,
            };
            let key = key.clone();
            let stuck = self.stuck.contains(&params.index);

            tokio::spawn(async move {
                if generation > 1 && !stuck {
                    tokio::time::sleep(READY_DELAY).await;
                    master.signal(
                        Signal::new(SignalType::WorkerReady, None)
                            .with_payload(Payload::new("ts", ["ready"]).with_worker(identity.clone())),
                    );
                }
                while let Some(request) = rx.recv().await {
                    let kind = match request.kind() {
                        SignalType::WorkerStatusReq => SignalType::WorkerStatusRes,
                        SignalType::WorkerRestartReq => SignalType::WorkerRestartRes,
                        SignalType::WorkerReloadReq => SignalType::WorkerReloadRes,
                        _ => continue,
                    };
                    master.signal(
                        Signal::new(kind, Some(request.correlation_id().clone())).with_payload(
                            Payload::new("ts", [format!("pid {}", params_pid(identity.index))])
                                .with_worker(identity.clone()),
                        ),
                    );
                    if kind != SignalType::WorkerStatusRes {
                        if stuck {
                            // acknowledged, then hangs forever
                            std::future::pending::<()>().await;
                        }
                        break;
                    }
                }
                master.worker_exited(key, generation, "exit status: 0");
            });
            Ok(WorkerChannel::new(tx, None))
        }
    }

    /// Time a respawned loopback worker takes to announce `ready`.
    const READY_DELAY: Duration = Duration::from_millis(100);
    const RESPAWN_DELAY_MS: u64 = 50;

    fn params_pid(index: usize) -> usize {
        4000 + index
    }

    fn config(workers: usize) -> Arc<HiveConfig> {
        Arc::new(HiveConfig {
            num_workers: workers,
            command_exec_time_ms: 1_000,
            worker_startup_time_ms: 1_000,
            respawn_delay_ms: RESPAWN_DELAY_MS,
            base_run: PathBuf::from("/tmp"),
            ..Default::default()
        })
    }

    fn start(workers: usize, spawner: LoopbackSpawner) -> (MasterHandle, CancellationToken) {
        let token = CancellationToken::new();
        let master = Master::new("t", config(workers), Arc::new(spawner), Bus::new(), token.clone()).unwrap();
        let handle = master.handle();
        tokio::spawn(master.run());
        (handle, token)
    }

    async fn run_command(handle: &MasterHandle, token: &str) -> String {
        let mut rx = handle.command(token).unwrap();
        let mut out = String::new();
        while let Some(chunk) = rx.recv().await {
            out.push_str(&chunk);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_master_and_every_worker() {
        let (handle, token) = start(2, LoopbackSpawner::default());

        let out = run_command(&handle, "status").await;
        assert!(out.starts_with(":: MASTER ::\n\tMemory usage:"), "{out}");
        assert!(out.contains("\tCommands running: 1\n"));
        assert!(out.contains("\tWorkers: 2/2 live\n"));
        assert!(out.contains("\tWatcher: disabled\n"), "{out}");
        assert!(out.contains(":: WORKER[0] ::\n\tpid 4000\n"));
        assert!(out.contains(":: WORKER[1] ::\n\tpid 4001\n"));
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn reload_rolls_through_workers() {
        let (handle, token) = start(2, LoopbackSpawner::default());

        let started = tokio::time::Instant::now();
        let out = run_command(&handle, "reload").await;
        assert!(!out.contains("timed out"), "{out}");

        // one worker at a time: each waits for the previous one's respawn and ready
        let per_worker = Duration::from_millis(RESPAWN_DELAY_MS) + READY_DELAY;
        assert!(started.elapsed() >= 2 * per_worker, "{:?}", started.elapsed());
        let master = out.find(":: MASTER ::").unwrap();
        let w0 = out.find(":: WORKER[0] ::").unwrap();
        let w1 = out.find(":: WORKER[1] ::").unwrap();
        assert!(master < w0 && w0 < w1);
        assert!(out.contains("You should not reload master application."));

        // the fleet is whole again
        let status = run_command(&handle, "status").await;
        assert!(status.contains("Workers: 2/2 live"), "{status}");
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn restart_times_out_on_a_worker_that_never_returns() {
        let spawner = LoopbackSpawner {
            stuck: vec![1],
            ..Default::default()
        };
        let (handle, token) = start(2, spawner);

        let started = tokio::time::Instant::now();
        let out = run_command(&handle, "restart").await;
        assert!(started.elapsed() >= Duration::from_millis(2_000));
        assert!(out.contains(":: WORKER[0] ::\n\tready\n"), "{out}");
        assert!(!out.contains(":: WORKER[1] ::"), "{out}");
        assert!(out.contains("timed out after 2000 ms, 1 target(s)"), "{out}");
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_command_gets_a_warning() {
        let (handle, token) = start(1, LoopbackSpawner::default());
        let out = run_command(&handle, "dance").await;
        assert!(out.starts_with("!! unknown command"));
        token.cancel();
    }

    #[test]
    fn responder_ignores_worker_kinds() {
        let (handle, _rx) = MasterHandle::channel();
        let responder = MasterResponder::new(handle, Arc::new(AtomicUsize::new(0)));
        let req = Signal::new(SignalType::WorkerStatusReq, None);
        assert!(responder.answer(&req, FleetSnapshot::default()).is_none());

        let req = Signal::new(SignalType::MasterRestartReq, Some("jar-1".into()));
        let res = responder.answer(&req, FleetSnapshot::default()).unwrap();
        assert_eq!(res.kind(), SignalType::MasterRestartRes);
        assert_eq!(res.correlation_id().as_str(), "jar-1");
    }

    #[test]
    fn status_names_the_watched_patterns() {
        let (handle, _rx) = MasterHandle::channel();
        let patterns = vec!["src/**/*.rs".to_string(), "Cargo.toml".to_string()];
        let responder = MasterResponder::new(handle, Arc::new(AtomicUsize::new(0))).with_watcher(&patterns);

        let req = Signal::new(SignalType::MasterStatusReq, Some("jar-2".into()));
        let res = responder.answer(&req, FleetSnapshot { live: 1, total: 1 }).unwrap();
        let lines = res.payload().map(|p| p.messages.clone()).unwrap_or_default();
        assert!(lines.contains(&"Watcher: src/**/*.rs, Cargo.toml".to_string()), "{lines:?}");
    }
}
