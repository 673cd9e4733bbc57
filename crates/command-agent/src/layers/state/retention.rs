use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::paths::{Stage, StoreLayout};

/// Upper bound on deletions in one sweep. Each document costs two units:
/// its orchestration directory and its state file.
pub const MAX_DELETION_UNITS: usize = 100;
const UNITS_PER_DOCUMENT: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted_documents: usize,
    pub deletion_units: usize,
}

/// Deletes completed documents older than the retention window.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    layout: StoreLayout,
    max_units: usize,
}

impl RetentionSweeper {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            layout,
            max_units: MAX_DELETION_UNITS,
        }
    }

    #[cfg(test)]
    pub fn with_max_units(mut self, max_units: usize) -> Self {
        self.max_units = max_units;
        self
    }

    /// One pass over the Completed directory of `instance_id`. Never fails:
    /// I/O errors and panics are logged and end the pass early.
    pub fn sweep(
        &self,
        instance_id: &str,
        orchestration_root: &str,
        retention_hours: u64,
        matches: &dyn Fn(&str) -> bool,
        orchestration_folder: &dyn Fn(&str) -> String,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.sweep_inner(
                instance_id,
                orchestration_root,
                retention_hours,
                matches,
                orchestration_folder,
                &mut report,
            )
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(
                event = "retention.failed",
                instance_id,
                error = %err,
                "retention sweep stopped"
            ),
            Err(_) => tracing::error!(
                event = "retention.panic",
                instance_id,
                "retention sweep panicked"
            ),
        }
        if report.deleted_documents > 0 {
            tracing::info!(
                event = "retention.swept",
                instance_id,
                documents = report.deleted_documents,
                units = report.deletion_units,
                "deleted expired documents"
            );
        }
        report
    }

    fn sweep_inner(
        &self,
        instance_id: &str,
        orchestration_root: &str,
        retention_hours: u64,
        matches: &dyn Fn(&str) -> bool,
        orchestration_folder: &dyn Fn(&str) -> String,
        report: &mut SweepReport,
    ) -> io::Result<()> {
        let completed = self.layout.state_dir(instance_id, Stage::Completed);
        let entries = match fs::read_dir(&completed) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        let orchestration = self.layout.orchestration_dir(instance_id, orchestration_root);
        let retention = Duration::from_secs(retention_hours.saturating_mul(3600));
        let now = SystemTime::now();

        for entry in entries {
            if report.deletion_units + UNITS_PER_DOCUMENT > self.max_units {
                tracing::debug!(
                    event = "retention.capped",
                    instance_id,
                    units = report.deletion_units,
                    "deletion cap reached"
                );
                break;
            }
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !matches(&name) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() || !is_expired(&metadata, retention, now) {
                continue;
            }

            let folder = orchestration.join(orchestration_folder(&name));
            if let Err(err) = remove_dir_if_present(&folder) {
                tracing::warn!(
                    event = "retention.orchestration_failed",
                    document_id = %name,
                    path = %folder.display(),
                    error = %err,
                    "keeping state file"
                );
                continue;
            }
            report.deletion_units += 1;

            if let Err(err) = fs::remove_file(entry.path()) {
                tracing::warn!(
                    event = "retention.state_failed",
                    document_id = %name,
                    error = %err,
                    "failed to delete state file"
                );
                continue;
            }
            report.deletion_units += 1;
            report.deleted_documents += 1;
            tracing::debug!(event = "retention.deleted", document_id = %name);
        }
        Ok(())
    }
}

fn is_expired(metadata: &fs::Metadata, retention: Duration, now: SystemTime) -> bool {
    match metadata.modified() {
        Ok(modified) => modified
            .checked_add(retention)
            .map(|deadline| deadline < now)
            .unwrap_or(false),
        Err(_) => false,
    }
}

fn remove_dir_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Settings for the periodic sweep run by the daemon.
#[derive(Debug, Clone)]
pub struct SweepSchedule {
    pub instance_id: String,
    pub orchestration_root: String,
    pub retention_hours: u64,
    pub interval: Duration,
}

/// Runs the sweep on a blocking thread every `schedule.interval`, treating
/// UUID-named documents as command documents.
pub fn spawn_periodic_sweep(
    sweeper: Arc<RetentionSweeper>,
    schedule: SweepSchedule,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(schedule.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let sweeper = Arc::clone(&sweeper);
            let schedule = schedule.clone();
            let result = tokio::task::spawn_blocking(move || {
                sweeper.sweep(
                    &schedule.instance_id,
                    &schedule.orchestration_root,
                    schedule.retention_hours,
                    &is_command_document,
                    &|name: &str| name.to_string(),
                )
            })
            .await;
            if let Err(err) = result {
                tracing::error!(event = "retention.join_failed", error = %err);
            }
        }
    })
}

fn is_command_document(name: &str) -> bool {
    uuid::Uuid::parse_str(name).is_ok()
}
