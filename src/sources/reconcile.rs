//! Orphan reconciliation.
//!
//! Before anything is mirrored, the destination's user root is listed and
//! every folder that no longer matches a configured source is purged. Name
//! matching is case-insensitive. A failed listing skips reconciliation for the
//! run; a failed purge is recorded and the next orphan is still attempted.

use std::collections::HashSet;

use serde::Serialize;

use super::rclone::{Destination, Rclone, parse_listing};
use super::registry::SourceRemote;
use super::runner::CommandRunner;
use super::transcript::{ERROR_MARKER, Transcript};

/// Result of purging one orphan folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeResult {
    /// Folder name under the user root.
    pub folder: String,
    /// Full rclone path that was purged.
    pub path: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Folder names found at the destination, normalized.
    pub listed: Vec<String>,
    /// Folders matching a configured source.
    pub kept: Vec<String>,
    /// One entry per orphan, in listing order.
    pub purges: Vec<PurgeResult>,
    /// Set when the listing failed and reconciliation was skipped.
    pub skipped: Option<String>,
    /// True once the listing succeeded and every orphan was attempted.
    pub completed: bool,
}

impl ReconcileReport {
    pub fn orphans(&self) -> impl Iterator<Item = &str> {
        self.purges.iter().map(|p| p.folder.as_str())
    }

    pub fn failed_purges(&self) -> usize {
        self.purges.iter().filter(|p| !p.success).count()
    }

    /// True when no purge failed. A skipped pass counts as success.
    pub fn all_succeeded(&self) -> bool {
        self.failed_purges() == 0
    }
}

/// Lists destination folders and purges orphans.
pub struct Reconciler<'a, R> {
    runner: &'a R,
    rclone: &'a Rclone,
    destination: &'a Destination,
}

impl<'a, R: CommandRunner> Reconciler<'a, R> {
    pub fn new(runner: &'a R, rclone: &'a Rclone, destination: &'a Destination) -> Self {
        Self {
            runner,
            rclone,
            destination,
        }
    }

    /// Run one reconciliation pass against the given source snapshot.
    ///
    /// `execute == false` passes `--dry-run` to every purge.
    pub async fn reconcile(
        &self,
        sources: &[SourceRemote],
        execute: bool,
        transcript: &mut Transcript,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let root = self.destination.user_root();

        let known: HashSet<String> = sources
            .iter()
            .filter(|s| !s.is_reserved())
            .map(|s| s.name.to_lowercase())
            .collect();

        transcript.push(format!("== Reconciling destination folders under {root}"));
        let list_cmd = self.rclone.list_dirs(&root);
        transcript.push(format!("$ {list_cmd}"));

        let listing = match self.runner.run(&list_cmd).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(root = %root, error = %e, "destination listing failed");
                transcript.push_output("listing", e.stdout());
                transcript.push(format!(
                    "Listing failed, skipping reconciliation: {}",
                    e.diagnostic()
                ));
                report.skipped = Some(e.to_string());
                return report;
            }
        };

        transcript.push_output("listing", &listing.stdout);
        transcript.push_output("listing stderr", &listing.stderr);

        let parsed = parse_listing(&listing.stdout);
        for raw in &parsed.ambiguous {
            transcript.push(format!("Skipping unrecognized listing line: {raw}"));
        }

        for folder in parsed.folders {
            if known.contains(&folder.to_lowercase()) {
                report.kept.push(folder.clone());
            } else {
                let result = self.purge(&folder, execute, transcript).await;
                report.purges.push(result);
            }
            report.listed.push(folder);
        }

        if report.listed.is_empty() {
            transcript.push("No destination folders found");
        }
        report.completed = true;

        tracing::info!(
            root = %root,
            listed = report.listed.len(),
            orphans = report.purges.len(),
            failed = report.failed_purges(),
            execute,
            "reconciliation finished"
        );
        report
    }

    async fn purge(
        &self,
        folder: &str,
        execute: bool,
        transcript: &mut Transcript,
    ) -> PurgeResult {
        let path = self.destination.folder(folder);
        let cmd = self.rclone.purge(&path, !execute);
        let mode = if execute { "purge" } else { "purge (dry-run)" };
        transcript.push(format!("Orphan {folder}: {mode}"));
        transcript.push(format!("$ {cmd}"));

        match self.runner.run(&cmd).await {
            Ok(output) => {
                transcript.push_output(&format!("{folder} purge"), &output.stdout);
                transcript.push_output(&format!("{folder} purge stderr"), &output.stderr);
                PurgeResult {
                    folder: folder.to_string(),
                    path,
                    success: true,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(folder = %folder, error = %e, "purge failed");
                transcript.push_output(&format!("{folder} purge"), e.stdout());
                transcript.push(format!(
                    "{ERROR_MARKER} purge of {path} failed: {}",
                    e.diagnostic()
                ));
                PurgeResult {
                    folder: folder.to_string(),
                    path,
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
