use std::sync::Arc;

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, UnixListener},
};
use tracing::{debug, info, warn};

use hive_prometheus::PrometheusMetrics;
use hive_runtime::prelude::*;

/// Accept until the worker's shutdown token fires, echoing each connection on its own task.
macro_rules! accept_until_shutdown {
    ($listener:expr, $ctx:expr) => {
        loop {
            tokio::select! {
                _ = $ctx.shutdown.cancelled() => break,
                accepted = $listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(echo(stream));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1) Config: HIVE_CONFIG file if set, two workers on Unix sockets otherwise
    let defaults = RuntimeConfig::from_hive(HiveConfig {
        num_workers: 2,
        ..Default::default()
    });
    let config = RuntimeConfig::from_env_or(defaults)?;

    // 2) Metrics (recorded by the master only)
    let metrics = Arc::new(PrometheusMetrics::new()?);

    // 3) Run as master, worker or client depending on argv and environment
    Hive::bind("echo", config)
        .with_metrics(metrics)
        .run(serve)
        .await?;
    Ok(())
}

/// Worker application: echo every connection back until asked to stop.
async fn serve(ctx: WorkerContext) -> anyhow::Result<()> {
    match ctx.endpoint().clone() {
        WorkerEndpoint::Socket { path } => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let listener = UnixListener::bind(&path)?;
            info!(index = ctx.index(), path = %path.display(), "echo worker listening");
            accept_until_shutdown!(listener, ctx);
            let _ = std::fs::remove_file(&path);
        }
        WorkerEndpoint::Tcp { host, port } => {
            let host = host.unwrap_or_else(|| "127.0.0.1".to_string());
            let listener = TcpListener::bind((host.as_str(), port)).await?;
            info!(index = ctx.index(), %host, port, "echo worker listening");
            accept_until_shutdown!(listener, ctx);
        }
    }
    info!(index = ctx.index(), "echo worker stopped");
    Ok(())
}

async fn echo<S>(stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    if let Err(e) = tokio::io::copy(&mut reader, &mut writer).await {
        debug!(error = %e, "echo connection closed");
    }
}
