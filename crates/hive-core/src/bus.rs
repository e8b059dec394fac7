use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use hive_model::Event;

const BUS_CAPACITY: usize = 1024;

/// Consumer of runtime events.
///
/// Each attached subscriber gets its own bounded queue and worker task, so a slow subscriber never stalls the master loop.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, event: &Event);

    fn name(&self) -> &'static str;

    fn queue_capacity(&self) -> usize {
        1024
    }
}

/// Fan-out of [`Event`]s from the master to its subscribers.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Arc<Event>>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event; dropped silently when nobody listens.
    pub fn publish(&self, event: Event) {
        trace!(kind = ?event.kind, "publish event");
        let _ = self.tx.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.tx.subscribe()
    }

    /// Drive `subscriber` until `token` is cancelled.
    pub fn attach(&self, subscriber: Arc<dyn Subscribe>, token: CancellationToken) {
        let mut rx = self.subscribe();
        let (queue_tx, mut queue_rx) = mpsc::channel::<Arc<Event>>(subscriber.queue_capacity().max(1));
        let name = subscriber.name();

        let forward_token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = forward_token.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => {
                            if queue_tx.try_send(event).is_err() {
                                warn!(subscriber = name, "subscriber queue full, event dropped");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(subscriber = name, skipped, "subscriber lagged behind the bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = queue_rx.recv() => match next {
                        Some(event) => subscriber.on_event(&event).await,
                        None => break,
                    },
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use hive_model::EventKind;

    use super::*;

    struct Recorder(Mutex<Vec<EventKind>>);

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &Event) {
            self.0.lock().unwrap().push(event.kind);
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    #[tokio::test]
    async fn attached_subscriber_sees_events() {
        let bus = Bus::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let token = CancellationToken::new();
        bus.attach(recorder.clone(), token.clone());

        bus.publish(Event::new(EventKind::WorkerForked));
        bus.publish(Event::new(EventKind::CommandCompleted));

        for _ in 0..100 {
            if recorder.0.lock().unwrap().len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![EventKind::WorkerForked, EventKind::CommandCompleted]
        );
        token.cancel();
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        Bus::new().publish(Event::new(EventKind::SignalDropped));
    }
}
