//! Persisted per-source sync status.
//!
//! After a real (non dry-run) sync the outcome of each source is written to
//! `sync_status.json` in the data directory so `cloudmirror status` can show
//! when each source last mirrored and whether it worked.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::mirror::MirrorResult;
use super::sync::SyncRunReport;

/// Result of the last sync attempt for a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncResult {
    /// Mirror completed.
    Success,
    /// Mirror failed with the given error.
    Failed(String),
    /// Never ran, or the run was cancelled before reaching this source.
    #[default]
    Skipped,
}

/// Sync information for a single source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSyncInfo {
    /// Timestamp of the last attempt (ms since epoch).
    pub last_sync: Option<i64>,
    pub last_result: SyncResult,
    /// Timestamp of the last successful mirror (ms since epoch).
    pub last_success: Option<i64>,
    pub duration_ms: u64,
}

/// Persistent sync status for all sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Keyed by source name.
    pub sources: HashMap<String, SourceSyncInfo>,
    /// Orphan folders purged by the last real run.
    #[serde(default)]
    pub last_purged: Vec<String>,
}

impl SyncStatus {
    /// Load sync status from disk. A missing file is an empty status.
    pub fn load(data_dir: &Path) -> Result<Self, std::io::Error> {
        let path = Self::status_path(data_dir);
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        } else {
            Ok(Self::default())
        }
    }

    /// Save sync status to disk.
    pub fn save(&self, data_dir: &Path) -> Result<(), std::io::Error> {
        let path = Self::status_path(data_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)
    }

    /// Record the outcome of one mirror.
    pub fn update(&mut self, result: &MirrorResult, now: i64) {
        let entry = self.sources.entry(result.source.clone()).or_default();
        entry.last_sync = Some(now);
        entry.duration_ms = result.duration_ms;
        if result.success {
            entry.last_result = SyncResult::Success;
            entry.last_success = Some(now);
        } else {
            entry.last_result =
                SyncResult::Failed(result.error.clone().unwrap_or_else(|| "unknown error".into()));
        }
    }

    /// Record a whole run. Dry runs change nothing.
    ///
    /// `last_purged` is only replaced when reconciliation actually finished,
    /// so a run that stopped early keeps the previous record.
    pub fn record_run(&mut self, report: &SyncRunReport) {
        if !report.execute {
            return;
        }
        let now = chrono::Utc::now().timestamp_millis();
        for result in &report.mirrors {
            self.update(result, now);
        }
        if !report.reconcile.completed {
            return;
        }
        self.last_purged = report
            .reconcile
            .purges
            .iter()
            .filter(|p| p.success)
            .map(|p| p.folder.clone())
            .collect();
    }

    /// Get sync info for a source.
    pub fn get(&self, source_name: &str) -> Option<&SourceSyncInfo> {
        self.sources.get(source_name)
    }

    fn status_path(data_dir: &Path) -> PathBuf {
        data_dir.join("sync_status.json")
    }
}
