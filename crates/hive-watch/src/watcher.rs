use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hive_core::{MasterHandle, WatchConfig};
use hive_model::Command;

use crate::{error::WatchError, glob};

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules"];

/// Modification times of every watched file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot(BTreeMap<PathBuf, SystemTime>);

impl Snapshot {
    /// Scan the file system for files matching any of `patterns`.
    pub fn take(patterns: &[String]) -> Self {
        let mut files = BTreeMap::new();
        for pattern in patterns {
            let root = PathBuf::from(glob::base_dir(pattern));
            walk(&root, pattern, &mut files);
        }
        Self(files)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Files added, removed or modified since `earlier`.
    pub fn changed_since(&self, earlier: &Snapshot) -> Vec<PathBuf> {
        let mut changed: Vec<PathBuf> = self
            .0
            .iter()
            .filter(|(path, mtime)| earlier.0.get(*path) != Some(*mtime))
            .map(|(path, _)| path.clone())
            .collect();
        changed.extend(earlier.0.keys().filter(|p| !self.0.contains_key(*p)).cloned());
        changed
    }
}

fn walk(dir: &Path, pattern: &str, out: &mut BTreeMap<PathBuf, SystemTime>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            let name = entry.file_name();
            if !SKIPPED_DIRS.iter().any(|s| name == *s) {
                walk(&path, pattern, out);
            }
        } else if glob::path_matches(pattern, &path.to_string_lossy())
            && let Ok(mtime) = meta.modified()
        {
            out.insert(path, mtime);
        }
    }
}

/// Fold a scan into `baseline` and return what changed.
///
/// A failed scan changes nothing. The first successful scan only sets the baseline.
fn advance(baseline: &mut Option<Snapshot>, scan: Option<Snapshot>) -> Vec<PathBuf> {
    let Some(current) = scan else {
        return Vec::new();
    };
    match baseline {
        None => {
            *baseline = Some(current);
            Vec::new()
        }
        Some(previous) => {
            let changed = current.changed_since(previous);
            if !changed.is_empty() {
                *previous = current;
            }
            changed
        }
    }
}

/// Polls the watched files and restarts the fleet when one of them changes.
pub struct Watcher {
    patterns: Vec<String>,
    delay: Duration,
    interval: Duration,
    master: MasterHandle,
}

impl Watcher {
    pub fn new(config: &WatchConfig, master: MasterHandle) -> Result<Self, WatchError> {
        if let Some(bad) = config.patterns.iter().find(|p| p.trim().is_empty()) {
            return Err(WatchError::InvalidPattern(bad.clone()));
        }
        if config.interval_ms == 0 {
            return Err(WatchError::ZeroInterval);
        }
        Ok(Self {
            patterns: config.patterns.clone(),
            delay: Duration::from_millis(config.delay_ms),
            interval: Duration::from_millis(config.interval_ms),
            master,
        })
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// A change seen while the previous restart is still running is held back until it finishes.
    pub async fn run(self, shutdown: CancellationToken) {
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = shutdown.cancelled() => return,
        }

        let mut baseline = self.snapshot().await;
        match &baseline {
            Some(snap) => info!(patterns = ?self.patterns, files = snap.len(), "watching files"),
            None => info!(patterns = ?self.patterns, "watching files, first scan pending"),
        }

        let mut restart: Option<JoinHandle<()>> = None;
        let mut pending = false;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => break,
            }

            let changed = advance(&mut baseline, self.snapshot().await);
            if !changed.is_empty() {
                info!(count = changed.len(), first = %changed[0].display(), "watched files changed");
                pending = true;
            }

            if pending && restart.as_ref().is_none_or(|h| h.is_finished()) {
                pending = false;
                restart = self.trigger_restart();
            }
        }
    }

    /// `None` when the scan task failed; the caller keeps its previous view.
    async fn snapshot(&self) -> Option<Snapshot> {
        let patterns = self.patterns.clone();
        match tokio::task::spawn_blocking(move || Snapshot::take(&patterns)).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "file scan failed, keeping previous snapshot");
                None
            }
        }
    }

    fn trigger_restart(&self) -> Option<JoinHandle<()>> {
        let mut output = match self.master.command(Command::Restart.as_str()) {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "cannot restart workers");
                return None;
            }
        };
        info!("restarting workers");
        Some(tokio::spawn(async move {
            while let Some(chunk) = output.recv().await {
                for line in chunk.lines().filter(|l| !l.trim().is_empty()) {
                    debug!(line, "restart output");
                }
            }
            info!("restart finished");
        }))
    }
}
