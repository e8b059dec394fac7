use std::{future::Future, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hive_api::{ControlServer, MasterAdapter, emit};
use hive_core::{Bus, Master, MasterHandle, WatchConfig, WorkerSpawner};
use hive_exec::{ProcConfig, ProcSpawner, WorkerContext, run_worker};
use hive_model::Command;
use hive_observe::{Journal, LoggerConfig, LoggerError, logger_init};
#[cfg(feature = "metrics")]
use hive_prometheus::PrometheusMetrics;
use hive_watch::Watcher;

use crate::{
    config::RuntimeConfig, error::RuntimeError, scope::RuntimeScope,
    shutdown::install_shutdown_handler,
};

/// A named application run as a supervised fleet.
///
/// The same binary is the master, every worker and the control client; [`Hive::run`] picks the role.
pub struct Hive {
    name: String,
    config: RuntimeConfig,
    init_logger: bool,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<PrometheusMetrics>>,
}

impl Hive {
    pub fn bind(name: impl Into<String>, config: RuntimeConfig) -> Self {
        Self {
            name: name.into(),
            config,
            init_logger: true,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Leave tracing setup to the caller.
    pub fn without_logger(mut self) -> Self {
        self.init_logger = false;
        self
    }

    /// Record master events into `metrics`.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<PrometheusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run in the role selected by the process environment and arguments.
    ///
    /// `app` is only called in worker processes.
    pub async fn run<F, Fut>(self, app: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(WorkerContext) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        self.run_as(RuntimeScope::current(), app).await
    }

    pub async fn run_as<F, Fut>(self, scope: RuntimeScope, app: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(WorkerContext) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        if self.init_logger {
            init_logger(&self.config.logger)?;
        }
        debug!(hive = %self.name, %scope, "runtime scope selected");

        match scope {
            RuntimeScope::Worker => {
                run_worker(&self.config.hive, app).await?;
                Ok(())
            }
            RuntimeScope::Client(command) => {
                print!("{}", self.command(command).await);
                Ok(())
            }
            RuntimeScope::Master { watch } => {
                let shutdown = install_shutdown_handler()?;
                let bus = Bus::new();
                let spawner = ProcSpawner::new(ProcConfig::current_exe()?, bus.clone(), shutdown.clone());
                self.master(watch, Arc::new(spawner), bus, shutdown).await
            }
            RuntimeScope::Unknown(arg) => {
                warn!(arg, "unknown runtime scope (expected: watch|status|restart|reload)");
                Ok(())
            }
        }
    }

    /// Send `command` to the running master and return its answer.
    ///
    /// Connection failures and timeouts come back as a `!!` line rather than an error.
    pub async fn command(&self, command: Command) -> String {
        let hive = &self.config.hive;
        let target = hive.command_target(&self.name);
        match emit(&target, command.as_str(), hive.client_ttl(command)).await {
            Ok(answer) => answer,
            Err(e) => format!("!! {e}\n"),
        }
    }

    /// Run the master until `shutdown` is cancelled: workers, control socket and, with `watch`, the file watcher.
    pub async fn master(
        self,
        watch: bool,
        spawner: Arc<dyn WorkerSpawner>,
        bus: Bus,
        shutdown: CancellationToken,
    ) -> Result<(), RuntimeError> {
        bus.attach(Arc::new(Journal::new()), shutdown.clone());
        #[cfg(feature = "metrics")]
        if let Some(metrics) = self.metrics {
            bus.attach(metrics, shutdown.clone());
        }

        let name = self.name;
        let hive = Arc::new(self.config.hive);
        let mut master = Master::new(&name, Arc::clone(&hive), spawner, bus, shutdown.clone())?;
        if watch {
            master = master.watching(&hive.watch.patterns);
        }
        let handle = master.handle();

        let target = hive.command_target(&name);
        let server = ControlServer::bind(&target, Arc::new(MasterAdapter::new(handle.clone()))).await?;
        let server_task = tokio::spawn(server.serve(shutdown.clone()));

        if watch {
            start_watcher(&hive.watch, handle, shutdown.clone())?;
        }

        info!(hive = %name, %target, workers = hive.num_workers, "hive is up");
        master.run().await;
        shutdown.cancel();

        match server_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "control socket stopped with error"),
            Err(e) => warn!(error = %e, "control socket task failed"),
        }
        info!(hive = %name, "hive stopped");
        Ok(())
    }
}

fn init_logger(cfg: &LoggerConfig) -> Result<(), RuntimeError> {
    match logger_init(cfg) {
        Ok(()) | Err(LoggerError::AlreadyInstalled) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn start_watcher(
    cfg: &WatchConfig,
    master: MasterHandle,
    shutdown: CancellationToken,
) -> Result<(), RuntimeError> {
    if cfg.patterns.is_empty() {
        warn!("watch requested but watch.patterns is empty, file watcher not started");
        return Ok(());
    }
    let watcher = Watcher::new(cfg, master)?;
    tokio::spawn(watcher.run(shutdown));
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hive_api::ApiError;
    use hive_core::{CoreError, HiveConfig, WorkerChannel};
    use hive_model::{WorkerKey, WorkerParams};

    use super::*;

    struct NoSpawn;

    impl WorkerSpawner for NoSpawn {
        fn spawn(
            &self,
            _key: &WorkerKey,
            _params: &WorkerParams,
            _generation: u64,
            _master: MasterHandle,
        ) -> Result<WorkerChannel, CoreError> {
            Err(CoreError::Spawn("no processes in tests".into()))
        }
    }

    fn config(tag: &str) -> RuntimeConfig {
        RuntimeConfig::from_hive(HiveConfig {
            num_workers: 0,
            base_run: std::env::temp_dir().join(format!("hive-runtime-{}-{tag}", std::process::id())),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn master_answers_the_command_client() {
        let cfg = config("status");
        let client = Hive::bind("demo", cfg.clone()).without_logger();
        let target = cfg.hive.command_target("demo");

        let shutdown = CancellationToken::new();
        let master = Hive::bind("demo", cfg).without_logger();
        let task = tokio::spawn(master.master(false, Arc::new(NoSpawn), Bus::new(), shutdown.clone()));

        for _ in 0..100 {
            match emit(&target, "status", Duration::from_secs(2)).await {
                Err(ApiError::Connect { .. }) => tokio::time::sleep(Duration::from_millis(20)).await,
                _ => break,
            }
        }

        let answer = client.command(Command::Status).await;
        assert!(answer.starts_with(":: MASTER ::\n"), "{answer}");
        assert!(answer.contains("Workers: 0/0 live"), "{answer}");

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unreachable_master_is_reported_inline() {
        let hive = Hive::bind("absent", config("absent")).without_logger();
        let answer = hive.command(Command::Restart).await;
        assert!(answer.starts_with("!! "), "{answer}");
    }

    #[tokio::test]
    async fn unknown_scope_exits_cleanly() {
        let hive = Hive::bind("demo", config("unknown")).without_logger();
        let result = hive
            .run_as(RuntimeScope::Unknown("stop".into()), |_ctx| async { Ok(()) })
            .await;
        assert!(result.is_ok());
    }
}
