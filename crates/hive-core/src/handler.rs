use std::{
    collections::HashMap,
    future::poll_fn,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, info, warn};

use hive_model::{Command, CorrelationId, Event, EventKind, Signal};

use crate::{
    bus::Bus,
    config::HiveConfig,
    jar::{CommandJar, DestroyReason, Fleet, JarState},
    sink::ResponseSink,
};

/// Registry of in-flight command jars.
///
/// Every jar is registered together with a one-shot budget timer; the entry is removed exactly once,
/// by completion or by expiry, whichever happens first.
pub struct CommandHandler {
    jars: HashMap<CorrelationId, (CommandJar, delay_queue::Key)>,
    timers: DelayQueue<CorrelationId>,
    in_flight: Arc<AtomicUsize>,
    config: Arc<HiveConfig>,
    bus: Bus,
}

impl CommandHandler {
    pub fn new(config: Arc<HiveConfig>, bus: Bus) -> Self {
        Self {
            jars: HashMap::new(),
            timers: DelayQueue::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            config,
            bus,
        }
    }

    /// Gauge of in-flight jars, readable outside the master loop.
    pub fn in_flight_gauge(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.in_flight)
    }

    pub fn in_flight(&self) -> usize {
        self.jars.len()
    }

    pub fn status_line(&self) -> String {
        format!("Commands running: {}", self.in_flight())
    }

    /// Start a new invocation of `token`; the aggregate output goes to `sink`.
    ///
    /// Returns the correlation id of the created jar, or `None` when the token is not a command.
    pub fn handle(&mut self, mut sink: ResponseSink, token: &str, fleet: &dyn Fleet) -> Option<CorrelationId> {
        let command = match token.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                warn!(token, "{e}");
                sink.write(format!("!! {e}\n"));
                sink.close();
                self.bus
                    .publish(Event::new(EventKind::CommandRejected).with_command(token.trim()));
                return None;
            }
        };

        let mut jar = CommandJar::new(command, self.config.jar_params(command), sink);
        let id = jar.id().clone();
        let bus = self.bus.clone();
        jar.on_destroy(Box::new(move |report| {
            let kind = match report.reason {
                DestroyReason::Completed => EventKind::CommandCompleted,
                DestroyReason::TimedOut => EventKind::CommandTimedOut,
            };
            bus.publish(
                Event::new(kind)
                    .with_command(report.command.as_str())
                    .with_correlation(report.id.as_str())
                    .with_reason(format!(
                        "{} target(s) pending after {} ms",
                        report.pending,
                        report.elapsed.as_millis()
                    )),
            );
        }));

        info!(%command, id = %id, "command accepted");
        self.bus.publish(
            Event::new(EventKind::CommandAccepted)
                .with_command(command.as_str())
                .with_correlation(id.as_str()),
        );

        self.register(jar);
        let state = match self.jars.get_mut(&id) {
            Some((jar, _)) => jar.handle(fleet),
            None => JarState::Destroyed,
        };
        if state == JarState::Destroyed {
            self.unregister(&id);
        }
        Some(id)
    }

    /// Route a signal to every registered jar and drop the ones that finished.
    pub fn notify(&mut self, signal: &Signal) {
        let mut finished = Vec::new();
        for (id, (jar, _)) in self.jars.iter_mut() {
            if jar.notify(signal) == JarState::Destroyed {
                finished.push(id.clone());
            }
        }
        for id in finished {
            self.unregister(&id);
        }
    }

    /// Wait for the next budget expiry.
    ///
    /// Resolves to `None` immediately when no timer is armed.
    pub async fn next_expired(&mut self) -> Option<CorrelationId> {
        poll_fn(|cx| self.timers.poll_expired(cx))
            .await
            .map(|expired| expired.into_inner())
    }

    /// Force-destroy the jar whose budget elapsed.
    pub fn expire(&mut self, id: &CorrelationId) {
        let Some((mut jar, _)) = self.jars.remove(id) else {
            debug!(id = %id, "timer fired for a finished command");
            return;
        };
        self.in_flight.store(self.jars.len(), Ordering::Relaxed);
        warn!(
            command = %jar.command(),
            id = %id,
            budget_ms = jar.params().budget.as_millis() as u64,
            pending = jar.armed_stoppers() + jar.queued_starters(),
            "command timed out"
        );
        jar.destroy(DestroyReason::TimedOut);
    }

    /// Time out every in-flight jar at once.
    pub fn abort_all(&mut self) {
        let ids: Vec<_> = self.jars.keys().cloned().collect();
        for id in ids {
            if let Some((_, key)) = self.jars.get(&id) {
                self.timers.remove(key);
            }
            self.expire(&id);
        }
    }

    fn register(&mut self, jar: CommandJar) {
        let id = jar.id().clone();
        let key = self.timers.insert(id.clone(), jar.params().budget);
        self.jars.insert(id, (jar, key));
        self.in_flight.store(self.jars.len(), Ordering::Relaxed);
    }

    fn unregister(&mut self, id: &CorrelationId) {
        if let Some((jar, key)) = self.jars.remove(id) {
            self.timers.remove(&key);
            self.in_flight.store(self.jars.len(), Ordering::Relaxed);
            debug!(command = %jar.command(), id = %id, "command finished");
        }
    }
}
