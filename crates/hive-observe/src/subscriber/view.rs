use std::borrow::Borrow;

use hive_model::{Event, EventKind};
use tracing::{debug, error, info, trace, warn};

/// Field accessors with placeholders for absent context.
pub trait View {
    fn as_worker(&self) -> &str;
    fn as_command(&self) -> &str;
    fn as_correlation(&self) -> &str;
    fn as_reason(&self) -> &str;
    fn kind(&self) -> EventKind;
}

impl<T> View for T
where
    T: Borrow<Event>,
{
    #[inline]
    fn as_worker(&self) -> &str {
        self.borrow().worker.as_deref().unwrap_or("-")
    }
    #[inline]
    fn as_command(&self) -> &str {
        self.borrow().command.as_deref().unwrap_or("-")
    }
    #[inline]
    fn as_correlation(&self) -> &str {
        self.borrow().correlation.as_deref().unwrap_or("-")
    }
    #[inline]
    fn as_reason(&self) -> &str {
        self.borrow().reason.as_deref().unwrap_or("unknown")
    }
    #[inline]
    fn kind(&self) -> EventKind {
        self.borrow().kind
    }
}

#[inline]
pub fn message_for(kind: EventKind) -> &'static str {
    match kind {
        // pool
        EventKind::WorkerForked => "worker process forked",
        EventKind::WorkerExited => "worker process exited",
        EventKind::WorkerRespawnScheduled => "worker respawn scheduled",
        EventKind::WorkerSpawnFailed => "worker could not be spawned",

        // commands
        EventKind::CommandAccepted => "command accepted",
        EventKind::CommandRejected => "unknown command rejected",
        EventKind::CommandCompleted => "command completed",
        EventKind::CommandTimedOut => "command exceeded its execution budget",

        // protocol
        EventKind::SignalDropped => "malformed signal dropped",
    }
}

#[inline]
pub fn log_event<E: View>(e: E) {
    let msg = message_for(e.kind());

    match e.kind() {
        // pool
        EventKind::WorkerForked => debug!(worker = e.as_worker(), "{msg}"),
        EventKind::WorkerExited => info!(worker = e.as_worker(), reason = e.as_reason(), "{msg}"),
        EventKind::WorkerRespawnScheduled => trace!(worker = e.as_worker(), "{msg}"),
        EventKind::WorkerSpawnFailed => {
            error!(worker = e.as_worker(), reason = e.as_reason(), "{msg}")
        }

        // commands
        EventKind::CommandAccepted => {
            debug!(command = e.as_command(), id = e.as_correlation(), "{msg}")
        }
        EventKind::CommandRejected => warn!(command = e.as_command(), "{msg}"),
        EventKind::CommandCompleted => info!(
            command = e.as_command(),
            id = e.as_correlation(),
            detail = e.as_reason(),
            "{msg}"
        ),
        EventKind::CommandTimedOut => warn!(
            command = e.as_command(),
            id = e.as_correlation(),
            detail = e.as_reason(),
            "{msg}"
        ),

        // protocol
        EventKind::SignalDropped => debug!(worker = e.as_worker(), reason = e.as_reason(), "{msg}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_fills_placeholders() {
        let e = Event::new(EventKind::CommandRejected).with_command("dance");
        assert_eq!(e.as_command(), "dance");
        assert_eq!(e.as_worker(), "-");
        assert_eq!(e.as_reason(), "unknown");
        log_event(&e);
    }

    #[test]
    fn every_kind_has_a_message() {
        for kind in [
            EventKind::WorkerForked,
            EventKind::WorkerExited,
            EventKind::WorkerRespawnScheduled,
            EventKind::WorkerSpawnFailed,
            EventKind::CommandAccepted,
            EventKind::CommandRejected,
            EventKind::CommandCompleted,
            EventKind::CommandTimedOut,
            EventKind::SignalDropped,
        ] {
            assert!(!message_for(kind).is_empty());
        }
    }
}
