//! Control socket: the master-side listener and the operator-side client.
mod error;
pub use error::ApiError;

mod handler;
pub use handler::ControlHandler;

mod adapter;
pub use adapter::MasterAdapter;

mod server;
pub use server::ControlServer;

mod client;
pub use client::emit;

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use hive_core::ControlTarget;

    use super::*;

    /// Echoes the token back in two chunks; `hang` never ends the stream.
    struct Echo;

    #[async_trait]
    impl ControlHandler for Echo {
        async fn dispatch(&self, token: &str) -> Result<mpsc::UnboundedReceiver<String>, ApiError> {
            let (tx, rx) = mpsc::unbounded_channel();
            tx.send(":: MASTER ::\n".to_string()).unwrap();
            tx.send(format!("\t{token}\n")).unwrap();
            if token == "hang" {
                std::mem::forget(tx);
            }
            Ok(rx)
        }
    }

    fn socket_path() -> PathBuf {
        static SEQ: AtomicUsize = AtomicUsize::new(0);
        std::env::temp_dir().join(format!(
            "hive-api-{}-{}/control.sock",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ))
    }

    async fn start(target: ControlTarget) -> (ControlTarget, CancellationToken) {
        let server = ControlServer::bind(&target, Arc::new(Echo)).await.unwrap();
        let target = server.local_target().unwrap();
        let token = CancellationToken::new();
        tokio::spawn(server.serve(token.clone()));
        (target, token)
    }

    #[tokio::test]
    async fn unix_round_trip() {
        let (target, token) = start(ControlTarget::Unix(socket_path())).await;
        let answer = emit(&target, "status\n", Duration::from_secs(5)).await.unwrap();
        assert_eq!(answer, ":: MASTER ::\n\tstatus\n");
        token.cancel();
    }

    #[tokio::test]
    async fn tcp_round_trip() {
        let (target, token) = start(ControlTarget::Tcp {
            host: "127.0.0.1".into(),
            port: 0,
        })
        .await;
        let answer = emit(&target, "reload", Duration::from_secs(5)).await.unwrap();
        assert!(answer.ends_with("\treload\n"));
        token.cancel();
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced() {
        let path = socket_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"").unwrap();

        let (target, token) = start(ControlTarget::Unix(path)).await;
        assert!(emit(&target, "status", Duration::from_secs(5)).await.is_ok());
        token.cancel();
    }

    #[tokio::test]
    async fn unfinished_answer_times_out() {
        let (target, token) = start(ControlTarget::Unix(socket_path())).await;
        let err = emit(&target, "hang", Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout(_)));
        token.cancel();
    }

    #[tokio::test]
    async fn missing_master_is_a_connect_error() {
        let err = emit(&ControlTarget::Unix(socket_path()), "status", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Connect { .. }));
    }
}
