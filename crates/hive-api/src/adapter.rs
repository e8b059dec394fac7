use async_trait::async_trait;
use tokio::sync::mpsc;

use hive_core::MasterHandle;

use crate::{error::ApiError, handler::ControlHandler};

/// Adapter that bridges the master event loop to [`ControlHandler`].
pub struct MasterAdapter {
    master: MasterHandle,
}

impl MasterAdapter {
    pub fn new(master: MasterHandle) -> Self {
        Self { master }
    }
}

#[async_trait]
impl ControlHandler for MasterAdapter {
    async fn dispatch(&self, token: &str) -> Result<mpsc::UnboundedReceiver<String>, ApiError> {
        self.master.command(token).map_err(ApiError::from)
    }
}
