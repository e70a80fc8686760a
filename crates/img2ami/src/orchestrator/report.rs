//! Run report and summary output

use super::phase::{Attempt, AttemptOutcome};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use img2ami_common::{ImageId, SnapshotId};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Result of a successful registration run
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationReport {
    pub run_id: String,
    pub image_name: String,
    pub image_id: ImageId,
    pub snapshot_id: SnapshotId,
    pub volume_size_gib: i32,
    /// Whether DescribeImages listed the image before the visibility budget ran out
    pub visible: bool,
    pub attempts: Vec<Attempt>,
    pub finished_at: DateTime<Utc>,
}

impl RegistrationReport {
    /// Number of attempts that failed before the successful one
    pub fn failed_attempts(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome != AttemptOutcome::Success)
            .count()
    }

    /// Write the report as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Report written");
        Ok(())
    }

    /// Print a short human-readable summary to stdout
    pub fn print_summary(&self) {
        println!("\n=== Registration Complete ===\n");
        println!("  Image:     {} ({})", self.image_id, self.image_name);
        println!("  Snapshot:  {}", self.snapshot_id);
        println!("  Volume:    {} GiB", self.volume_size_gib);
        println!("  Attempts:  {}", self.attempts.len());
        if !self.visible {
            println!("  Note:      image was not yet listed by DescribeImages");
        }
        println!();
    }
}
