use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, UnixListener},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hive_core::ControlTarget;

use crate::{error::ApiError, handler::ControlHandler};

/// Longest a client may take to send its command line.
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_TOKEN_LEN: usize = 256;

enum Listener {
    Unix { listener: UnixListener, path: PathBuf },
    Tcp(TcpListener),
}

/// Control socket listener: one command line in, the streamed answer out, then close.
pub struct ControlServer<H> {
    handler: Arc<H>,
    listener: Listener,
}

impl<H> ControlServer<H>
where
    H: ControlHandler,
{
    /// Bind the control socket; a stale Unix socket file is replaced.
    pub async fn bind(target: &ControlTarget, handler: Arc<H>) -> Result<Self, ApiError> {
        let listener = match target {
            ControlTarget::Unix(path) => {
                if let Some(dir) = path.parent()
                    && !dir.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(dir)?;
                }
                match std::fs::remove_file(path) {
                    Ok(()) => debug!(path = %path.display(), "removed stale control socket"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Listener::Unix {
                    listener: UnixListener::bind(path)?,
                    path: path.clone(),
                }
            }
            ControlTarget::Tcp { host, port } => {
                Listener::Tcp(TcpListener::bind((host.as_str(), *port)).await?)
            }
        };
        Ok(Self { handler, listener })
    }

    /// Address clients should connect to; resolves an ephemeral TCP port.
    pub fn local_target(&self) -> Result<ControlTarget, ApiError> {
        Ok(match &self.listener {
            Listener::Unix { path, .. } => ControlTarget::Unix(path.clone()),
            Listener::Tcp(l) => {
                let addr = l.local_addr()?;
                ControlTarget::Tcp {
                    host: addr.ip().to_string(),
                    port: addr.port(),
                }
            }
        })
    }

    /// Accept connections until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ApiError> {
        info!(target = %self.local_target()?, "control socket listening");
        let result = match &self.listener {
            Listener::Unix { listener, .. } => loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break Ok(()),
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => self.spawn_conn(stream),
                        Err(e) => warn!(error = %e, "control accept failed"),
                    },
                }
            },
            Listener::Tcp(listener) => loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break Ok(()),
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "control connection");
                            self.spawn_conn(stream)
                        }
                        Err(e) => warn!(error = %e, "control accept failed"),
                    },
                }
            },
        };

        if let Listener::Unix { path, .. } = &self.listener {
            let _ = std::fs::remove_file(path);
        }
        info!("control socket closed");
        result
    }

    fn spawn_conn<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            if let Err(e) = handle_conn(stream, handler.as_ref()).await {
                debug!(error = %e, "control connection ended with error");
            }
        });
    }
}

async fn handle_conn<S, H>(stream: S, handler: &H) -> Result<(), ApiError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: ControlHandler + ?Sized,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    let mut line = String::new();
    match tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(read) => {
            read?;
        }
        Err(_) => {
            return Err(ApiError::InvalidRequest("no command received".into()));
        }
    }
    let token = line.trim();
    if token.is_empty() || token.len() > MAX_TOKEN_LEN {
        writer.write_all(b"!! empty or oversized command\n").await?;
        writer.shutdown().await?;
        return Err(ApiError::InvalidRequest(format!("{} bytes", line.len())));
    }

    debug!(token, "control command received");
    let mut output = handler.dispatch(token).await?;
    while let Some(chunk) = output.recv().await {
        writer.write_all(chunk.as_bytes()).await?;
    }
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}
