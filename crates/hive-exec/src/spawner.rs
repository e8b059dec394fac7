use std::{
    path::PathBuf,
    process::Stdio,
    time::Duration,
};

use tokio::{process::Command, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use hive_core::{Bus, CoreError, MasterHandle, WorkerChannel, WorkerSpawner};
use hive_model::{
    Event, EventKind, Signal, WORKER_CHANNEL_FD_KEY, WORKER_PARAMS_KEY, WorkerKey, WorkerParams,
};

use crate::{
    channel::{self, CHANNEL_FD},
    error::ExecError,
    util::{describe_exit, kill_graceful},
};

const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Worker process template.
#[derive(Clone, Debug)]
pub struct ProcConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Time between SIGTERM and kill on shutdown.
    pub grace: Duration,
}

impl ProcConfig {
    /// Re-execute the running binary with its own arguments.
    pub fn current_exe() -> Result<Self, ExecError> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: std::env::args().skip(1).collect(),
            env: Vec::new(),
            cwd: None,
            grace: DEFAULT_GRACE,
        })
    }

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            grace: DEFAULT_GRACE,
        }
    }
}

/// Forks workers as child processes connected over an inherited socket pair.
pub struct ProcSpawner {
    cfg: ProcConfig,
    bus: Bus,
    shutdown: CancellationToken,
}

impl ProcSpawner {
    pub fn new(cfg: ProcConfig, bus: Bus, shutdown: CancellationToken) -> Self {
        Self { cfg, bus, shutdown }
    }

    fn command(&self, params: &WorkerParams) -> Result<Command, ExecError> {
        let mut cmd = Command::new(&self.cfg.program);
        cmd.args(&self.cfg.args);
        if let Some(cwd) = &self.cfg.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &self.cfg.env {
            cmd.env(k, v);
        }
        cmd.env(WORKER_PARAMS_KEY, params.to_env_value()?);
        cmd.env(WORKER_CHANNEL_FD_KEY, CHANNEL_FD.to_string());
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);
        Ok(cmd)
    }

    fn spawn_proc(
        &self,
        key: &WorkerKey,
        params: &WorkerParams,
        generation: u64,
        master: MasterHandle,
    ) -> Result<WorkerChannel, ExecError> {
        let (master_end, child_end) = channel::socket_pair()?;
        let child_fd = channel::raw_fd(&child_end);

        let mut cmd = self.command(params)?;
        unsafe {
            cmd.pre_exec(move || channel::install_in_child(child_fd));
        }
        trace!(program = %self.cfg.program.display(), index = params.index, "spawn worker");
        let mut child = cmd.spawn().map_err(|e| ExecError::Spawn(e.to_string()))?;
        drop(child_end);
        let pid = child.id();

        let (read_half, mut write_half) = channel::into_async(master_end)?.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Signal>();

        // master → worker
        tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                if let Err(e) = channel::write_signal(&mut write_half, &signal).await {
                    debug!(pid, error = %e, "worker channel write failed");
                    break;
                }
            }
        });

        // worker → master
        let reader_master = master.clone();
        let bus = self.bus.clone();
        let index = params.index;
        tokio::spawn(async move {
            let mut frames = channel::FrameReader::new(read_half);
            loop {
                match frames.next_frame().await {
                    Ok(Some(frame)) => match Signal::parse(frame) {
                        Some(signal) => reader_master.signal(signal),
                        None => {
                            debug!(pid, index, len = frame.len(), "dropping malformed signal");
                            bus.publish(
                                Event::new(EventKind::SignalDropped)
                                    .with_worker(index.to_string())
                                    .with_reason("malformed"),
                            );
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        debug!(pid, error = %e, "worker channel read failed");
                        break;
                    }
                }
            }
        });

        // process lifetime
        let shutdown = self.shutdown.clone();
        let grace = self.cfg.grace;
        let key = key.clone();
        tokio::spawn(async move {
            let reason = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => describe_exit(&status),
                    Err(e) => format!("wait failed: {e}"),
                },
                _ = shutdown.cancelled() => {
                    debug!(pid, "shutdown; stopping worker");
                    if let Err(e) = kill_graceful(&mut child, grace).await {
                        warn!(pid, error = %e, "failed to stop worker");
                    }
                    return;
                }
            };
            master.worker_exited(key, generation, reason);
        });

        Ok(WorkerChannel::new(tx, pid))
    }
}

impl WorkerSpawner for ProcSpawner {
    fn spawn(
        &self,
        key: &WorkerKey,
        params: &WorkerParams,
        generation: u64,
        master: MasterHandle,
    ) -> Result<WorkerChannel, CoreError> {
        Ok(self.spawn_proc(key, params, generation, master)?)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use hive_core::MasterEvent;
    use hive_model::{SignalType, WorkerEndpoint};

    use super::*;

    fn params() -> WorkerParams {
        WorkerParams::new(
            WorkerEndpoint::Socket {
                path: PathBuf::from("/tmp/spawner-test.worker0.sock"),
            },
            0,
        )
    }

    /// A shell "worker" running `script` with its channel end at fd 3.
    fn shell(script: &str) -> ProcConfig {
        let mut cfg = ProcConfig::new("sh");
        cfg.args = vec!["-c".into(), script.into()];
        cfg
    }

    #[tokio::test]
    async fn signals_and_exit_reach_the_master() {
        let script = r#"
            echo 'garbage' >&3
            echo '{"type":"W_M_READY","correlationId":"__NO_UID__","payload":null}' >&3
            exit 7
        "#;
        let spawner = ProcSpawner::new(shell(script), Bus::new(), CancellationToken::new());
        let (handle, mut inbox) = MasterHandle::channel();
        let params = params();
        let key = params.key().unwrap();

        let channel = spawner.spawn(&key, &params, 1, handle).unwrap();
        assert!(channel.pid().is_some());

        // the inbox closes once the reader and the waiter are done
        let mut ready = false;
        let mut exited = None;
        while let Some(event) = inbox.recv().await {
            match event {
                MasterEvent::Signal(s) => ready = s.kind() == SignalType::WorkerReady,
                MasterEvent::WorkerExited { key: k, generation, reason } => {
                    assert_eq!(k, key);
                    assert_eq!(generation, 1);
                    exited = Some(reason);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(ready);
        assert_eq!(exited.unwrap(), "exit code 7");
    }

    #[tokio::test]
    async fn non_utf8_frame_does_not_stop_the_reader() {
        let script = r#"
            printf '\377\376\n' >&3
            echo '{"type":"W_M_READY","correlationId":"__NO_UID__","payload":null}' >&3
        "#;
        let bus = Bus::new();
        let mut events = bus.subscribe();
        let spawner = ProcSpawner::new(shell(script), bus, CancellationToken::new());
        let (handle, mut inbox) = MasterHandle::channel();
        let params = params();
        spawner.spawn(&params.key().unwrap(), &params, 1, handle).unwrap();

        let mut ready = false;
        while let Some(event) = inbox.recv().await {
            if let MasterEvent::Signal(s) = event {
                ready |= s.kind() == SignalType::WorkerReady;
            }
        }
        assert!(ready);
        let dropped = events.recv().await.unwrap();
        assert_eq!(dropped.kind, EventKind::SignalDropped);
    }

    #[tokio::test]
    async fn worker_receives_params_in_env() {
        let script = r#"
            printf '{"type":"W_M_STATUS_RES","correlationId":"jar-env","payload":{"timestamp":"t","messages":["%s"]}}\n' "$HIVE_CHANNEL_FD" >&3
        "#;
        let spawner = ProcSpawner::new(shell(script), Bus::new(), CancellationToken::new());
        let (handle, mut inbox) = MasterHandle::channel();
        let params = params();
        spawner.spawn(&params.key().unwrap(), &params, 1, handle).unwrap();

        loop {
            if let MasterEvent::Signal(s) = inbox.recv().await.unwrap() {
                assert_eq!(s.correlation_id().as_str(), "jar-env");
                assert_eq!(s.payload().unwrap().messages, vec!["3".to_string()]);
                break;
            }
        }
    }

    #[tokio::test]
    async fn shutdown_stops_the_worker_without_exit_report() {
        let token = CancellationToken::new();
        let spawner = ProcSpawner::new(shell("exec sleep 30"), Bus::new(), token.clone());
        let (handle, mut inbox) = MasterHandle::channel();
        let params = params();
        spawner.spawn(&params.key().unwrap(), &params, 1, handle).unwrap();

        token.cancel();
        drop(spawner);
        // every task holding a handle finishes, so the inbox closes without a WorkerExited
        while let Some(event) = inbox.recv().await {
            assert!(!matches!(event, MasterEvent::WorkerExited { .. }));
        }
    }
}
