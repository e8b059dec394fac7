use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ApiError;

/// Backend of the control socket.
///
/// The returned receiver yields the command output in chunks and ends when the command is done.
#[async_trait]
pub trait ControlHandler: Send + Sync + 'static {
    async fn dispatch(&self, token: &str) -> Result<mpsc::UnboundedReceiver<String>, ApiError>;
}
