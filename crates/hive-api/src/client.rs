use std::time::Duration;

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpStream, UnixStream},
};
use tracing::debug;

use hive_core::ControlTarget;

use crate::error::ApiError;

/// Send `token` to a running master and collect its whole answer.
///
/// Fails with [`ApiError::Timeout`] when the answer is not complete within `ttl`.
pub async fn emit(target: &ControlTarget, token: &str, ttl: Duration) -> Result<String, ApiError> {
    debug!(%target, token, ttl_ms = ttl.as_millis() as u64, "emit command");
    let roundtrip = async {
        match target {
            ControlTarget::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(|e| connect_error(target, e))?;
                exchange(stream, token).await
            }
            ControlTarget::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|e| connect_error(target, e))?;
                exchange(stream, token).await
            }
        }
    };
    tokio::time::timeout(ttl, roundtrip)
        .await
        .map_err(|_| ApiError::Timeout(ttl))?
}

async fn exchange<S>(mut stream: S, token: &str) -> Result<String, ApiError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(token.trim().as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;

    let mut answer = String::new();
    stream.read_to_string(&mut answer).await?;
    Ok(answer)
}

fn connect_error(target: &ControlTarget, e: std::io::Error) -> ApiError {
    ApiError::Connect {
        target: target.to_string(),
        reason: e.to_string(),
    }
}
