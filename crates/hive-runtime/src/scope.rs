use std::fmt;

use hive_model::Command;

/// Argument that runs the master with the file watcher.
pub const WATCH_ARG: &str = "watch";

/// Role of the current process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuntimeScope {
    /// Supervise the workers and serve the control socket.
    Master { watch: bool },
    /// Serve the application under a master.
    Worker,
    /// Send one command to a running master and print the answer.
    Client(Command),
    /// Unrecognised first argument.
    Unknown(String),
}

impl RuntimeScope {
    /// Role selected by the worker environment and the first argument.
    ///
    /// The worker environment wins over arguments, since workers inherit the master's argv.
    pub fn detect<I, S>(args: I, worker_env: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if worker_env {
            return RuntimeScope::Worker;
        }
        let Some(first) = args.into_iter().next() else {
            return RuntimeScope::Master { watch: false };
        };
        let first = first.as_ref().trim();
        if first == WATCH_ARG {
            return RuntimeScope::Master { watch: true };
        }
        match first.parse::<Command>() {
            Ok(command) => RuntimeScope::Client(command),
            Err(_) => RuntimeScope::Unknown(first.to_string()),
        }
    }

    /// Role of this process, from `std::env`.
    pub fn current() -> Self {
        Self::detect(std::env::args().skip(1), hive_exec::is_worker())
    }
}

impl fmt::Display for RuntimeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeScope::Master { watch: false } => f.write_str("master"),
            RuntimeScope::Master { watch: true } => f.write_str("master+watch"),
            RuntimeScope::Worker => f.write_str("worker"),
            RuntimeScope::Client(command) => write!(f, "client({command})"),
            RuntimeScope::Unknown(arg) => write!(f, "unknown({arg})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_argument_is_master() {
        let none: [&str; 0] = [];
        assert_eq!(RuntimeScope::detect(none, false), RuntimeScope::Master { watch: false });
        assert_eq!(RuntimeScope::detect(["watch"], false), RuntimeScope::Master { watch: true });
    }

    #[test]
    fn command_arguments_select_the_client() {
        assert_eq!(RuntimeScope::detect(["status"], false), RuntimeScope::Client(Command::Status));
        assert_eq!(
            RuntimeScope::detect(["reload", "extra"], false),
            RuntimeScope::Client(Command::Reload)
        );
        assert_eq!(
            RuntimeScope::detect(["stop"], false),
            RuntimeScope::Unknown("stop".into())
        );
    }

    #[test]
    fn worker_env_overrides_arguments() {
        assert_eq!(RuntimeScope::detect(["watch"], true), RuntimeScope::Worker);
    }
}
