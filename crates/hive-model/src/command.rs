use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{ModelError, SignalType};

/// Fleet-wide operation an operator can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    Status,
    Restart,
    Reload,
}

impl Command {
    pub const ALL: [Command; 3] = [Command::Status, Command::Restart, Command::Reload];

    /// Literal token used on the control socket and the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::Restart => "restart",
            Command::Reload => "reload",
        }
    }

    /// Request kind the master sends to itself for this command.
    pub fn master_request(&self) -> SignalType {
        match self {
            Command::Status => SignalType::MasterStatusReq,
            Command::Restart => SignalType::MasterRestartReq,
            Command::Reload => SignalType::MasterReloadReq,
        }
    }

    /// Request kind the master sends to every worker for this command.
    pub fn worker_request(&self) -> SignalType {
        match self {
            Command::Status => SignalType::WorkerStatusReq,
            Command::Restart => SignalType::WorkerRestartReq,
            Command::Reload => SignalType::WorkerReloadReq,
        }
    }
}

impl FromStr for Command {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "status" => Ok(Command::Status),
            "restart" => Ok(Command::Restart),
            "reload" => Ok(Command::Reload),
            other => Err(ModelError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_trimmed() {
        assert_eq!(" reload\n".parse::<Command>().unwrap(), Command::Reload);
    }

    #[test]
    fn unknown_token_is_rejected() {
        assert!(matches!(
            "stop".parse::<Command>(),
            Err(ModelError::UnknownCommand(t)) if t == "stop"
        ));
    }

    #[test]
    fn request_pairs() {
        assert_eq!(Command::Status.master_request(), SignalType::MasterStatusReq);
        assert_eq!(Command::Restart.worker_request(), SignalType::WorkerRestartReq);
        assert_eq!(Command::Reload.worker_request(), SignalType::WorkerReloadReq);
    }
}
