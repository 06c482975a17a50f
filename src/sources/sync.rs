//! Sync orchestrator: reconcile the destination, then mirror every source.
//!
//! This is the only entry point collaborators (CLI, scheduler) call. A run
//! always produces a [`SyncRunReport`]; ordinary remote-side failures are
//! folded into it rather than returned as errors.
//!
//! # Ordering
//!
//! Reconciliation (listing plus every purge attempt) completes before the
//! first mirror starts. Mirrors run one at a time in the order the sources
//! were supplied. Nothing runs in parallel, so the transcript order is the
//! execution order.
//!
//! # Example
//!
//! ```rust,ignore
//! use cloud_mirror::sources::{SyncOrchestrator, SyncRunOptions, TokioRunner};
//!
//! let orchestrator = SyncOrchestrator::new(TokioRunner::new());
//! let report = orchestrator.test_sync(options).await;
//! println!("{}", report.transcript);
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use super::mirror::{MirrorExecutor, MirrorResult};
use super::rclone::{Destination, Rclone};
use super::reconcile::{ReconcileReport, Reconciler};
use super::registry::{MetadataMap, SourceRemote};
use super::runner::{CommandRunner, TokioRunner};
use super::transcript::{Transcript, TranscriptSink};

/// Problems that stop a run before any remote is touched.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("invalid sync options: {0}")]
    InvalidOptions(String),

    #[error("source {0:?} is configured more than once")]
    DuplicateSource(String),

    #[error("failed to write options snapshot: {0}")]
    Snapshot(#[from] std::io::Error),

    #[error("failed to encode options snapshot: {0}")]
    SnapshotEncode(#[from] serde_json::Error),
}

/// Everything one run needs, resolved by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunOptions {
    /// Path to the rclone executable.
    pub executable: PathBuf,
    /// Merged rclone config holding source and destination credentials.
    pub config_path: PathBuf,
    /// Sources to mirror, in order.
    pub sources: Vec<SourceRemote>,
    /// Destination remote name; also used as the `user` path segment.
    pub destination_remote: String,
    pub bucket: String,
    /// `false` means dry-run.
    #[serde(default)]
    pub execute: bool,
    /// Per-source metadata (subfolder restrictions).
    #[serde(default)]
    pub metadata: MetadataMap,
}

impl SyncRunOptions {
    /// Check the options before touching any remote.
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.executable.as_os_str().is_empty() {
            return Err(SetupError::InvalidOptions(
                "rclone executable path is empty".into(),
            ));
        }
        if self.destination_remote.trim().is_empty() {
            return Err(SetupError::InvalidOptions(
                "destination remote name is empty".into(),
            ));
        }
        if self.destination_remote.contains(':') {
            return Err(SetupError::InvalidOptions(format!(
                "destination remote name {:?} must not contain ':'",
                self.destination_remote
            )));
        }
        if self.bucket.trim().is_empty() {
            return Err(SetupError::InvalidOptions("bucket name is empty".into()));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(SetupError::InvalidOptions("source name is empty".into()));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(SetupError::DuplicateSource(source.name.clone()));
            }
        }
        Ok(())
    }

    pub fn destination(&self) -> Destination {
        Destination::new(&self.destination_remote, &self.bucket)
    }

    pub fn rclone(&self) -> Rclone {
        Rclone::new(&self.executable, &self.config_path)
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncRunReport {
    pub success: bool,
    pub message: String,
    /// Every step, command, and captured output, in execution order.
    pub transcript: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execute: bool,
    pub cancelled: bool,
    pub reconcile: ReconcileReport,
    pub mirrors: Vec<MirrorResult>,
    pub duration_ms: u64,
}

impl SyncRunReport {
    /// Report for a run that failed during setup.
    pub fn setup_failed(error: SetupError, transcript: String, execute: bool) -> Self {
        Self {
            success: false,
            message: format!("Sync could not start: {error}"),
            transcript,
            error: Some(error.to_string()),
            execute,
            ..Default::default()
        }
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = &MirrorResult> {
        self.mirrors.iter().filter(|m| !m.success)
    }

    pub fn succeeded_sources(&self) -> usize {
        self.mirrors.iter().filter(|m| m.success).count()
    }
}

/// Cooperative cancellation, checked between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sequences reconciliation and mirroring for one run at a time.
pub struct SyncOrchestrator<R = TokioRunner> {
    runner: R,
    sinks: Vec<Arc<dyn TranscriptSink>>,
    snapshot_dir: Option<PathBuf>,
    cancel: CancelFlag,
}

impl<R: CommandRunner> SyncOrchestrator<R> {
    /// Create an orchestrator that snapshots options into the system temp dir.
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            sinks: Vec::new(),
            snapshot_dir: Some(std::env::temp_dir()),
            cancel: CancelFlag::new(),
        }
    }

    /// Add a sink that receives every transcript line as it is written.
    pub fn with_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Where the per-run options snapshot goes. `None` disables it.
    pub fn with_snapshot_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.snapshot_dir = dir;
        self
    }

    /// Share an existing cancellation flag with this orchestrator.
    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// Handle that cancels the run in progress at the next step boundary.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run reconciliation then mirroring. Dry-run unless `options.execute`.
    pub async fn test_sync(&self, options: SyncRunOptions) -> SyncRunReport {
        let start = Instant::now();
        let mut transcript = self
            .sinks
            .iter()
            .fold(Transcript::new(), |t, sink| t.with_sink(Arc::clone(sink)));

        let execute = options.execute;
        let mut report = match self.run(&options, &mut transcript).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "sync setup failed");
                transcript.push(format!("Sync could not start: {e}"));
                SyncRunReport::setup_failed(e, String::new(), execute)
            }
        };

        report.transcript = transcript.into_string();
        report.duration_ms = start.elapsed().as_millis() as u64;
        report
    }

    /// Same as [`test_sync`](Self::test_sync) with `execute` forced on.
    pub async fn execute_sync(&self, mut options: SyncRunOptions) -> SyncRunReport {
        options.execute = true;
        self.test_sync(options).await
    }

    async fn run(
        &self,
        options: &SyncRunOptions,
        transcript: &mut Transcript,
    ) -> Result<SyncRunReport, SetupError> {
        self.cancel.reset();
        options.validate()?;

        // Removed on drop, whichever way this function returns.
        let snapshot = self.write_snapshot(options)?;

        let mode = if options.execute { "execute" } else { "dry-run" };
        transcript.push(format!(
            "Sync run started ({mode}) at {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        if let Some(file) = &snapshot {
            transcript.push(format!("Options snapshot: {}", file.path().display()));
        }
        if options.sources.is_empty() {
            tracing::warn!("no sources configured; every destination folder is an orphan");
        }

        let rclone = options.rclone();
        let destination = options.destination();
        let mut report = SyncRunReport {
            execute: options.execute,
            ..Default::default()
        };

        if self.check_cancelled(transcript, "reconciliation") {
            return Ok(self.finish(report, transcript));
        }

        report.reconcile = Reconciler::new(&self.runner, &rclone, &destination)
            .reconcile(&options.sources, options.execute, transcript)
            .await;

        report.mirrors = MirrorExecutor::new(&self.runner, &rclone, &destination)
            .mirror_all(
                &options.sources,
                &options.metadata,
                options.execute,
                &self.cancel,
                transcript,
            )
            .await;

        Ok(self.finish(report, transcript))
    }

    fn check_cancelled(&self, transcript: &mut Transcript, step: &str) -> bool {
        if self.cancel.is_cancelled() {
            transcript.push(format!("Run cancelled before {step}"));
            tracing::info!(step, "sync cancelled");
            true
        } else {
            false
        }
    }

    fn finish(&self, mut report: SyncRunReport, transcript: &mut Transcript) -> SyncRunReport {
        report.cancelled = self.cancel.is_cancelled();
        let failed_mirrors = report.failed_sources().count();
        let failed_purges = report.reconcile.failed_purges();
        let marker = transcript.has_error_marker();

        report.success = !report.cancelled && failed_mirrors == 0 && failed_purges == 0 && !marker;
        let what = if report.execute { "Sync" } else { "Dry run" };
        let purged = if report.execute { "purged" } else { "would be purged" };
        report.message = if report.cancelled {
            format!("{what} cancelled")
        } else if report.success {
            format!(
                "{what} completed: {} source(s) mirrored, {} orphan folder(s) {purged}",
                report.succeeded_sources(),
                report.reconcile.purges.len()
            )
        } else if failed_mirrors > 0 || failed_purges > 0 {
            format!(
                "{what} finished with errors: {failed_mirrors} source(s) failed, {failed_purges} purge(s) failed"
            )
        } else {
            format!("{what} finished with errors reported in the rclone output")
        };

        transcript.push(format!("Sync run finished: {}", report.message));
        tracing::info!(
            success = report.success,
            mirrors = report.mirrors.len(),
            failed_mirrors,
            failed_purges,
            "sync run finished"
        );
        report
    }

    fn write_snapshot(
        &self,
        options: &SyncRunOptions,
    ) -> Result<Option<NamedTempFile>, SetupError> {
        let Some(dir) = &self.snapshot_dir else {
            return Ok(None);
        };
        let mut file = tempfile::Builder::new()
            .prefix("cloudmirror-run-")
            .suffix(".json")
            .tempfile_in(dir)?;
        serde_json::to_writer_pretty(file.as_file_mut(), options)?;
        Ok(Some(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::runner::{CommandLine, ProcessError, ProcessOutput};
    use std::sync::Mutex;

    /// Records every call and answers from a simple script.
    #[derive(Default)]
    struct Scripted {
        listing: String,
        fail_listing: bool,
        fail_sources: Vec<&'static str>,
        mirror_stdout: String,
        cancel_on_list: Option<CancelFlag>,
        calls: Mutex<Vec<CommandLine>>,
    }

    impl Scripted {
        fn verbs(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|c| format!("{} {}", c.get_args()[0], c.get_args()[1]))
                .collect()
        }
    }

    impl CommandRunner for Scripted {
        async fn run(&self, command: &CommandLine) -> Result<ProcessOutput, ProcessError> {
            self.calls.lock().unwrap().push(command.clone());
            let args = command.get_args();
            let fail = |msg: &str| ProcessError::Exit {
                command: command.display(),
                code: Some(1),
                stdout: String::new(),
                stderr: msg.to_string(),
            };
            if args[0] == "lsd"
                && let Some(flag) = &self.cancel_on_list
            {
                flag.cancel();
            }
            match args[0].as_str() {
                "lsd" if self.fail_listing => Err(fail("failed to list: token expired")),
                "lsd" => Ok(ProcessOutput {
                    stdout: self.listing.clone(),
                    stderr: String::new(),
                }),
                "sync" if self.fail_sources.iter().any(|s| args[1].starts_with(s)) => {
                    Err(fail("quota exceeded"))
                }
                "sync" => Ok(ProcessOutput {
                    stdout: self.mirror_stdout.clone(),
                    stderr: String::new(),
                }),
                _ => Ok(ProcessOutput::default()),
            }
        }
    }

    fn options(sources: &[&str]) -> SyncRunOptions {
        SyncRunOptions {
            executable: "rclone".into(),
            config_path: "merged.conf".into(),
            sources: sources.iter().map(|s| SourceRemote::new(*s)).collect(),
            destination_remote: "pfuser".into(),
            bucket: "data".into(),
            ..Default::default()
        }
    }

    fn orchestrator(runner: Scripted) -> SyncOrchestrator<Scripted> {
        SyncOrchestrator::new(runner).with_snapshot_dir(None)
    }

    #[test]
    fn test_validate_rejects_bad_options() {
        let mut opts = options(&["a"]);
        opts.destination_remote = "".into();
        assert!(matches!(opts.validate(), Err(SetupError::InvalidOptions(_))));

        let mut opts = options(&["a"]);
        opts.bucket = " ".into();
        assert!(matches!(opts.validate(), Err(SetupError::InvalidOptions(_))));

        let opts = options(&["a", "a"]);
        assert!(matches!(opts.validate(), Err(SetupError::DuplicateSource(n)) if n == "a"));

        assert!(options(&["a", "b"]).validate().is_ok());
    }

    #[tokio::test]
    async fn test_setup_failure_is_reported_not_thrown() {
        let orch = orchestrator(Scripted::default());
        let mut opts = options(&["a"]);
        opts.bucket.clear();

        let report = orch.test_sync(opts).await;
        assert!(!report.success);
        assert!(report.error.is_some());
        assert!(report.message.starts_with("Sync could not start"));
        assert!(orch.runner().calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_sync_forces_execute() {
        let orch = orchestrator(Scripted::default());
        let report = orch.execute_sync(options(&["a"])).await;

        assert!(report.execute);
        assert!(report.success);
        assert_eq!(
            report.message,
            "Sync completed: 1 source(s) mirrored, 0 orphan folder(s) purged"
        );
        let calls = orch.runner().calls.lock().unwrap();
        assert!(calls.iter().all(|c| !c.has_arg("--dry-run")));
    }

    #[tokio::test]
    async fn test_reconcile_runs_before_mirrors_in_order() {
        let orch = orchestrator(Scripted {
            listing: "-1 2024-01-01 00:00:00 -1 a\n-1 2024-01-01 00:00:00 -1 b\n-1 2024-01-01 00:00:00 -1 c\n".into(),
            ..Default::default()
        });

        let report = orch.test_sync(options(&["a", "b"])).await;

        assert!(report.success, "{}", report.transcript);
        assert_eq!(
            orch.runner().verbs(),
            vec![
                "lsd pfuser:data/user/pfuser",
                "purge pfuser:data/user/pfuser/c",
                "sync a:",
                "sync b:"
            ]
        );
        assert!(!report.execute);
        assert_eq!(
            report.message,
            "Dry run completed: 2 source(s) mirrored, 1 orphan folder(s) would be purged"
        );
    }

    #[tokio::test]
    async fn test_listing_failure_does_not_fail_run() {
        let orch = orchestrator(Scripted {
            fail_listing: true,
            ..Default::default()
        });

        let report = orch.test_sync(options(&["a", "b"])).await;

        assert!(report.success, "{}", report.transcript);
        assert!(report.reconcile.skipped.is_some());
        assert_eq!(report.mirrors.len(), 2);
        assert!(report.transcript.contains("token expired"));
    }

    #[tokio::test]
    async fn test_error_marker_in_output_fails_run() {
        let orch = orchestrator(Scripted {
            mirror_stdout: "Error: something only visible in text\n".into(),
            ..Default::default()
        });

        let report = orch.test_sync(options(&["a"])).await;

        assert!(report.mirrors.iter().all(|m| m.success));
        assert!(!report.success);
        assert!(report.message.contains("rclone output"));
    }

    #[tokio::test]
    async fn test_mirror_failure_marks_run_failed() {
        let orch = orchestrator(Scripted {
            fail_sources: vec!["b:"],
            ..Default::default()
        });

        let report = orch.test_sync(options(&["a", "b", "c"])).await;

        assert!(!report.success);
        assert_eq!(report.mirrors.len(), 3);
        assert_eq!(report.failed_sources().count(), 1);
        assert!(report.message.contains("1 source(s) failed"));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let orch = orchestrator(Scripted::default());
        let flag = orch.cancel_flag();
        flag.cancel();

        // A fresh run clears any stale cancellation.
        let report = orch.test_sync(options(&["a"])).await;
        assert!(report.success);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_cancel_between_steps() {
        let flag = CancelFlag::new();
        let orch = orchestrator(Scripted {
            cancel_on_list: Some(flag.clone()),
            ..Default::default()
        })
        .with_cancel_flag(flag);

        let report = orch.test_sync(options(&["a", "b"])).await;

        assert!(report.cancelled);
        assert!(!report.success);
        assert!(report.mirrors.is_empty());
        assert!(report.transcript.contains("Run cancelled before mirroring a"));
        assert!(report.transcript.ends_with("Sync run finished: Dry run cancelled\n"));
    }

    #[tokio::test]
    async fn test_snapshot_removed_after_run() {
        let tmp = tempfile::TempDir::new().unwrap();
        let orch = SyncOrchestrator::new(Scripted::default())
            .with_snapshot_dir(Some(tmp.path().to_path_buf()));

        let report = orch.test_sync(options(&["a"])).await;

        assert!(report.transcript.contains("Options snapshot:"));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_failure_is_setup_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let missing = tmp.path().join("does-not-exist");
        let orch = SyncOrchestrator::new(Scripted::default()).with_snapshot_dir(Some(missing));

        let report = orch.test_sync(options(&["a"])).await;

        assert!(!report.success);
        assert!(report.error.unwrap().contains("snapshot"));
        assert!(orch.runner().calls.lock().unwrap().is_empty());
    }
}
