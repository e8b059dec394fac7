//! Polling file watcher that restarts the fleet when watched files change.
mod error;
pub use error::WatchError;

pub mod glob;

mod watcher;
pub use watcher::{Snapshot, Watcher};
