//! Prometheus metrics for a hive master.
//!
//! [`PrometheusMetrics`] is an event-bus subscriber: attach it to the master's [`hive_core::Bus`]
//! and serve [`PrometheusMetrics::gather`] from whatever HTTP stack the application already runs.
//!
//! ## Metrics
//! - `hive_commands_total{command, outcome}` - Counter (`accepted`, `rejected`, `completed`, `timed_out`)
//! - `hive_worker_exits_total{worker}` - Counter
//! - `hive_workers_forked_total` - Counter
//! - `hive_worker_respawns_total` - Counter
//! - `hive_worker_spawn_failures_total` - Counter
//! - `hive_signals_dropped_total` - Counter
//!
//! ```rust,ignore
//! let metrics = Arc::new(PrometheusMetrics::new()?);
//! bus.attach(metrics.clone(), shutdown.child_token());
//!
//! let mut buffer = vec![];
//! TextEncoder::new().encode(&metrics.gather(), &mut buffer)?;
//! ```

mod backend;
pub use backend::PrometheusMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
