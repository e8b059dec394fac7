use std::{process::ExitStatus, time::Duration};

use tokio::process::Child;
use tracing::debug;

/// Ask the child to stop with SIGTERM, kill it when it outlives `grace`.
#[cfg(target_family = "unix")]
pub async fn kill_graceful(child: &mut Child, grace: Duration) -> std::io::Result<()> {
    if let Some(id) = child.id() {
        unsafe {
            libc::kill(id as libc::pid_t, libc::SIGTERM);
        }
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            debug!(pid = id, status = %describe_exit(&status?), "child stopped on SIGTERM");
            return Ok(());
        }
        debug!(pid = id, grace_ms = grace.as_millis() as u64, "grace exceeded; killing child");
    }
    child.kill().await
}

/// Human-readable exit reason.
pub fn describe_exit(status: &ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return format!("killed by signal {sig}");
        }
    }
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "unknown exit".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::process::Stdio;

    use tokio::process::Command;

    use super::*;

    #[tokio::test]
    async fn sigterm_stops_a_sleeping_child() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        kill_graceful(&mut child, Duration::from_secs(5)).await.unwrap();
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn exit_codes_are_described() {
        let status = Command::new("sh").args(["-c", "exit 3"]).status().await.unwrap();
        assert_eq!(describe_exit(&status), "exit code 3");
    }
}
