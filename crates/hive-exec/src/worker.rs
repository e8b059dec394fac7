use std::{future::Future, os::fd::RawFd, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hive_core::{ExitPolicy, HiveConfig};
use hive_model::{
    Signal, WORKER_CHANNEL_FD_KEY, WORKER_PARAMS_KEY, WorkerEndpoint, WorkerIdentity, WorkerParams,
};

use crate::{
    channel,
    error::{ExecError, ExecResult},
    handler::WorkerSignalHandler,
};

/// What a worker's application gets from the runtime.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    pub params: WorkerParams,
    /// Cancelled when the worker must stop serving.
    pub shutdown: CancellationToken,
}

impl WorkerContext {
    #[inline]
    pub fn index(&self) -> usize {
        self.params.index
    }

    #[inline]
    pub fn endpoint(&self) -> &WorkerEndpoint {
        &self.params.endpoint
    }
}

/// Whether this process was started as a worker.
pub fn is_worker() -> bool {
    std::env::var_os(WORKER_PARAMS_KEY).is_some()
}

/// Worker parameters and channel descriptor handed down by the master.
pub fn worker_env() -> ExecResult<(WorkerParams, RawFd)> {
    let raw = std::env::var(WORKER_PARAMS_KEY).map_err(|_| ExecError::MissingEnv(WORKER_PARAMS_KEY))?;
    let params = WorkerParams::from_env_value(&raw)?;
    let fd = std::env::var(WORKER_CHANNEL_FD_KEY)
        .map_err(|_| ExecError::MissingEnv(WORKER_CHANNEL_FD_KEY))?;
    let fd = fd
        .trim()
        .parse::<RawFd>()
        .map_err(|_| ExecError::InvalidChannelFd(fd.clone()))?;
    Ok((params, fd))
}

/// Run the worker side: answer the master over the inherited channel and drive `app` until it returns.
pub async fn run_worker<F, Fut>(config: &HiveConfig, app: F) -> ExecResult<()>
where
    F: FnOnce(WorkerContext) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let (params, fd) = worker_env()?;
    let identity = WorkerIdentity {
        key: params.key()?,
        index: params.index,
    };
    remove_stale_socket(&params.endpoint);

    let stream = unsafe { channel::adopt(fd)? };
    let (reader, writer) = stream.into_split();
    let shutdown = CancellationToken::new();

    serve(
        reader,
        writer,
        WorkerSignalHandler::new(identity),
        config.exit_policy,
        config.worker_startup_time(),
        shutdown.clone(),
    );
    watch_os_signals(shutdown.clone());

    info!(index = params.index, pid = std::process::id(), "worker started");
    let ctx = WorkerContext {
        params,
        shutdown: shutdown.clone(),
    };
    let result = app(ctx).await;
    shutdown.cancel();

    match result {
        Ok(()) => {
            info!("worker application finished");
            Ok(())
        }
        Err(e) => Err(ExecError::App(format!("{e:#}"))),
    }
}

/// Serve master requests on the channel halves.
///
/// Spawns a reader, a writer and the ready announcer. The reader cancels `shutdown` when the master end closes.
pub fn serve<R, W>(
    reader: R,
    mut writer: W,
    handler: WorkerSignalHandler,
    policy: ExitPolicy,
    startup: Duration,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<(Signal, bool)>();

    let writer_shutdown = shutdown.clone();
    tokio::spawn(async move {
        while let Some((signal, exit)) = out_rx.recv().await {
            if let Err(e) = channel::write_signal(&mut writer, &signal).await {
                warn!(error = %e, "failed to write to master");
                writer_shutdown.cancel();
                return;
            }
            if exit {
                match policy {
                    ExitPolicy::DirectExit => {
                        info!(kind = %signal.kind(), "exiting on master request");
                        std::process::exit(0);
                    }
                    ExitPolicy::GracefulSignal => {
                        info!(kind = %signal.kind(), "stopping on master request");
                        writer_shutdown.cancel();
                    }
                }
            }
        }
    });

    let ready = handler.ready();
    let ready_tx = out_tx.clone();
    let ready_shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(startup) => {
                debug!("announcing ready");
                let _ = ready_tx.send((ready, false));
            }
            _ = ready_shutdown.cancelled() => {}
        }
    });

    tokio::spawn(async move {
        let mut frames = channel::FrameReader::new(reader);
        loop {
            let frame = tokio::select! {
                frame = frames.next_frame() => frame,
                _ = shutdown.cancelled() => return,
            };
            match frame {
                Ok(Some(frame)) => {
                    let Some(request) = Signal::parse(frame) else {
                        debug!(len = frame.len(), "dropping malformed signal");
                        continue;
                    };
                    if let Some(answer) = handler.answer(&request) {
                        let exit = answer.exit;
                        let _ = out_tx.send((answer.response, exit));
                        if exit {
                            return;
                        }
                    }
                }
                Ok(None) => {
                    info!("master channel closed");
                    shutdown.cancel();
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "master channel read failed");
                    shutdown.cancel();
                    return;
                }
            }
        }
    });
}

fn remove_stale_socket(endpoint: &WorkerEndpoint) {
    if let WorkerEndpoint::Socket { path } = endpoint {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "cannot remove stale socket"),
        }
    }
}

fn watch_os_signals(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "cannot install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = term.recv() => info!("SIGTERM received"),
                _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
                _ = shutdown.cancelled() => return,
            }
        }
        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
                _ = shutdown.cancelled() => return,
            }
        }
        shutdown.cancel();
    });
}
