use async_trait::async_trait;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry, proto::MetricFamily};

use hive_core::Subscribe;
use hive_model::{Event, EventKind};

/// Counters fed from master runtime events.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    commands: IntCounterVec,
    worker_exits: IntCounterVec,
    forked: IntCounter,
    respawns: IntCounter,
    spawn_failures: IntCounter,
    signals_dropped: IntCounter,
}

impl PrometheusMetrics {
    /// Metrics registered in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Metrics registered in `registry`.
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let commands = IntCounterVec::new(
            Opts::new("hive_commands_total", "Operator commands by outcome"),
            &["command", "outcome"],
        )?;
        let worker_exits = IntCounterVec::new(
            Opts::new("hive_worker_exits_total", "Worker process exits"),
            &["worker"],
        )?;
        let forked = IntCounter::new("hive_workers_forked_total", "Worker processes forked")?;
        let respawns = IntCounter::new("hive_worker_respawns_total", "Worker respawns scheduled")?;
        let spawn_failures = IntCounter::new("hive_worker_spawn_failures_total", "Failed worker spawns")?;
        let signals_dropped = IntCounter::new("hive_signals_dropped_total", "Malformed signals dropped")?;

        registry.register(Box::new(commands.clone()))?;
        registry.register(Box::new(worker_exits.clone()))?;
        registry.register(Box::new(forked.clone()))?;
        registry.register(Box::new(respawns.clone()))?;
        registry.register(Box::new(spawn_failures.clone()))?;
        registry.register(Box::new(signals_dropped.clone()))?;

        Ok(Self {
            registry,
            commands,
            worker_exits,
            forked,
            respawns,
            spawn_failures,
            signals_dropped,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Account one event.
    pub fn record(&self, event: &Event) {
        let command = event.command.as_deref().unwrap_or("unknown");
        match event.kind {
            EventKind::CommandAccepted => self.commands.with_label_values(&[command, "accepted"]).inc(),
            EventKind::CommandRejected => self.commands.with_label_values(&["unknown", "rejected"]).inc(),
            EventKind::CommandCompleted => self.commands.with_label_values(&[command, "completed"]).inc(),
            EventKind::CommandTimedOut => self.commands.with_label_values(&[command, "timed_out"]).inc(),
            EventKind::WorkerExited => {
                let worker = event.worker.as_deref().unwrap_or("unknown");
                self.worker_exits.with_label_values(&[worker]).inc();
            }
            EventKind::WorkerForked => self.forked.inc(),
            EventKind::WorkerRespawnScheduled => self.respawns.inc(),
            EventKind::WorkerSpawnFailed => self.spawn_failures.inc(),
            EventKind::SignalDropped => self.signals_dropped.inc(),
        }
    }
}

#[async_trait]
impl Subscribe for PrometheusMetrics {
    async fn on_event(&self, event: &Event) {
        self.record(event);
    }
    fn name(&self) -> &'static str {
        "prometheus"
    }
}
