use std::{fmt, path::{Path, PathBuf}, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use hive_model::{Command, TimeoutMs, WorkerEndpoint, WorkerParams};

use crate::{error::CoreError, jar::JarParams};

/// Slack added on top of a command budget before the control client gives up.
const CLIENT_TTL_SLACK: Duration = Duration::from_secs(1);

/// How a worker terminates after acknowledging a restart or reload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitPolicy {
    /// Exit the process right after the acknowledgement is flushed.
    #[default]
    DirectExit,
    /// Cancel the worker's shutdown token and exit once the application returns.
    GracefulSignal,
}

impl FromStr for ExitPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct-exit" | "halt" => Ok(ExitPolicy::DirectExit),
            "graceful-signal" | "sigterm" => Ok(ExitPolicy::GracefulSignal),
            other => Err(CoreError::Config(format!(
                "invalid exit policy: {other} (expected: direct-exit|graceful-signal)"
            ))),
        }
    }
}

/// Connection template for the control socket or a worker endpoint.
///
/// Socket paths support `%hiveName`, `%workerIndex` and `%baseRun` substitution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConnTemplate {
    Socket {
        path: String,
    },
    Tcp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        port: u16,
        /// Added once per worker index; `0` makes every worker share the port.
        #[serde(default)]
        port_stride: u16,
    },
}

/// Resolved control socket address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlTarget {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
}

impl fmt::Display for ControlTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlTarget::Unix(path) => write!(f, "unix:{}", path.display()),
            ControlTarget::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
        }
    }
}

/// File watcher settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Glob patterns (`*`, `?`, `**`) of files whose change triggers a restart.
    pub patterns: Vec<String>,
    /// Delay before the first scan.
    pub delay_ms: TimeoutMs,
    /// Poll period.
    pub interval_ms: TimeoutMs,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            delay_ms: 2_000,
            interval_ms: 1_000,
        }
    }
}

/// Hive configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    pub num_workers: usize,
    /// Per-process answer budget for a command.
    pub command_exec_time_ms: TimeoutMs,
    /// Time a worker is given to bring its listener up before it reports ready.
    pub worker_startup_time_ms: TimeoutMs,
    /// Constant pause before a dead worker slot is forked again.
    pub respawn_delay_ms: TimeoutMs,
    pub exit_policy: ExitPolicy,
    pub base_run: PathBuf,
    pub command_conn: ConnTemplate,
    pub worker_conn: ConnTemplate,
    pub watch: WatchConfig,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            command_exec_time_ms: 2_000,
            worker_startup_time_ms: 3_000,
            respawn_delay_ms: 500,
            exit_policy: ExitPolicy::DirectExit,
            base_run: PathBuf::from("run"),
            command_conn: ConnTemplate::Socket {
                path: "%baseRun/%hiveName.command.sock".to_string(),
            },
            worker_conn: ConnTemplate::Socket {
                path: "%baseRun/%hiveName.worker%workerIndex.sock".to_string(),
            },
            watch: WatchConfig::default(),
        }
    }
}

impl HiveConfig {
    /// Load a config from a JSON file; absent fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let cfg: HiveConfig = serde_json::from_str(&raw)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.command_exec_time_ms == 0 {
            return Err(CoreError::Config("command_exec_time_ms must be positive".into()));
        }
        if let ConnTemplate::Socket { path } = &self.command_conn
            && path.contains("%workerIndex")
        {
            return Err(CoreError::Config(
                "command_conn.path must not depend on %workerIndex".into(),
            ));
        }
        if self.watch.interval_ms == 0 && !self.watch.patterns.is_empty() {
            return Err(CoreError::Config("watch.interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Whether all targets of `command` are asked at once.
    ///
    /// `reload` rolls through the fleet one target at a time; the other commands fan out.
    pub fn is_parallel(&self, command: Command) -> bool {
        !matches!(command, Command::Reload)
    }

    /// Absolute execution budget of one invocation of `command`.
    pub fn budget(&self, command: Command) -> Duration {
        let exec = self.command_exec_time_ms;
        let startup = self.worker_startup_time_ms;
        let workers = self.num_workers as u64;
        let ms = match command {
            Command::Status => exec,
            Command::Restart => exec + startup,
            Command::Reload => (workers + 1) * exec + workers * startup,
        };
        Duration::from_millis(ms)
    }

    pub fn jar_params(&self, command: Command) -> JarParams {
        JarParams {
            parallel: self.is_parallel(command),
            budget: self.budget(command),
        }
    }

    /// How long the control client waits for the aggregate answer.
    pub fn client_ttl(&self, command: Command) -> Duration {
        self.budget(command) + CLIENT_TTL_SLACK
    }

    pub fn command_target(&self, hive_name: &str) -> ControlTarget {
        match &self.command_conn {
            ConnTemplate::Socket { path } => {
                ControlTarget::Unix(PathBuf::from(self.substitute(path, hive_name, None)))
            }
            ConnTemplate::Tcp { host, port, .. } => ControlTarget::Tcp {
                host: host.clone().unwrap_or_else(|| "127.0.0.1".to_string()),
                port: *port,
            },
        }
    }

    /// Connection parameters of worker slot `index`; identical for every spawn of the slot.
    pub fn worker_params(&self, hive_name: &str, index: usize) -> WorkerParams {
        let endpoint = match &self.worker_conn {
            ConnTemplate::Socket { path } => WorkerEndpoint::Socket {
                path: PathBuf::from(self.substitute(path, hive_name, Some(index))),
            },
            ConnTemplate::Tcp {
                host,
                port,
                port_stride,
            } => WorkerEndpoint::Tcp {
                host: host.clone(),
                port: port.saturating_add(port_stride.saturating_mul(index as u16)),
            },
        };
        WorkerParams::new(endpoint, index)
    }

    pub fn command_exec_time(&self) -> Duration {
        Duration::from_millis(self.command_exec_time_ms)
    }

    pub fn worker_startup_time(&self) -> Duration {
        Duration::from_millis(self.worker_startup_time_ms)
    }

    pub fn respawn_delay(&self) -> Duration {
        Duration::from_millis(self.respawn_delay_ms)
    }

    fn substitute(&self, template: &str, hive_name: &str, index: Option<usize>) -> String {
        let mut out = template
            .replace("%baseRun", &self.base_run.to_string_lossy())
            .replace("%hiveName", hive_name);
        if let Some(index) = index {
            out = out.replace("%workerIndex", &index.to_string());
        }
        out
    }
}
