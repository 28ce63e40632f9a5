// Walnut - EVM Transaction Debugger
// Copyright (C) 2025 The Walnut Team
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Garbage collection of the scratch space.
//!
//! Run directories are removed once the newest modification time anywhere in
//! them is older than the configured age. Nothing is locked: a run still being
//! written or compiled has fresh entries and survives the sweep.

use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use serde::Serialize;
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{compile::RUN_DIR_PREFIX, config::ScratchConfig};

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Run directories deleted
    pub removed: Vec<PathBuf>,
    /// Run directories left in place
    pub kept: Vec<PathBuf>,
}

fn age_of(modified: SystemTime, now: SystemTime) -> Duration {
    now.duration_since(modified).unwrap_or_default()
}

/// Newest mtime of `dir` and everything below it. Symlinks are not followed.
async fn last_activity(dir: &Path, own: SystemTime) -> io::Result<SystemTime> {
    let mut newest = own;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match tokio::fs::symlink_metadata(entry.path()).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if let Ok(modified) = metadata.modified() {
                newest = newest.max(modified);
            }
            if metadata.is_dir() {
                pending.push(entry.path());
            }
        }
    }
    Ok(newest)
}

/// Delete run directories directly under `root` whose newest entry is older
/// than `max_age`.
///
/// A missing root yields an empty report. Entries that are not run
/// directories are never touched.
pub async fn sweep_once(root: &Path, max_age: Duration) -> io::Result<SweepReport> {
    let mut report = SweepReport::default();
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_name().to_string_lossy().starts_with(RUN_DIR_PREFIX) {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(metadata) if metadata.is_dir() => metadata,
            Ok(_) => continue,
            // Removed concurrently.
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot stat scratch entry");
                report.kept.push(path);
                continue;
            }
        };

        let own = metadata.modified().unwrap_or(now);
        let age = match last_activity(&path, own).await {
            Ok(newest) => age_of(newest, now),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot scan scratch directory");
                report.kept.push(path);
                continue;
            }
        };
        if age < max_age {
            report.kept.push(path);
            continue;
        }

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), age_secs = age.as_secs(), "Removed scratch directory");
                report.removed.push(path);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => report.removed.push(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
                report.kept.push(path);
            }
        }
    }

    report.removed.sort();
    report.kept.sort();
    Ok(report)
}

/// Handle to a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to finish its current pass.
    pub async fn stop(self) {
        if self.stop_tx.send(()).is_err() {
            warn!("Scratch sweeper already stopped");
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "Scratch sweeper task ended abnormally");
        }
    }
}

/// Periodic background sweep of the scratch root.
#[derive(Debug, Clone)]
pub struct ScratchSweeper {
    root: PathBuf,
    every: Duration,
    max_age: Duration,
}

impl ScratchSweeper {
    /// Sweeper for `config`.
    pub fn new(config: &ScratchConfig) -> Self {
        Self { root: config.root.clone(), every: config.sweep_interval(), max_age: config.max_age() }
    }

    /// Spawn a sweeper for `config` on the current runtime.
    pub fn start(config: &ScratchConfig) -> SweeperHandle {
        Self::new(config).spawn()
    }

    /// Spawn this sweeper on the current runtime. The first pass runs
    /// immediately.
    pub fn spawn(self) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        info!(
            root = %self.root.display(),
            every_secs = self.every.as_secs(),
            max_age_secs = self.max_age.as_secs(),
            "Starting scratch sweeper"
        );

        let task = tokio::spawn(async move {
            let mut ticker = interval(self.every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => match sweep_once(&self.root, self.max_age).await {
                        Ok(report) if !report.removed.is_empty() => {
                            info!(removed = report.removed.len(), kept = report.kept.len(), "Scratch sweep");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Scratch sweep failed"),
                    },
                }
            }
            info!("Scratch sweeper stopped");
        });

        SweeperHandle { stop_tx, task }
    }
}
