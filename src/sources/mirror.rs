//! Mirror execution.
//!
//! Each configured source is mirrored with `rclone sync` into its own folder
//! under the destination user root, one at a time and in caller order. A
//! failing source is recorded and the next one still runs.

use std::time::Instant;

use serde::Serialize;

use super::rclone::{Destination, Rclone, source_path};
use super::registry::{MetadataMap, SourceRemote, resolve_subfolder};
use super::runner::CommandRunner;
use super::sync::CancelFlag;
use super::transcript::{ERROR_MARKER, Transcript};

/// Result of mirroring one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorResult {
    /// Source remote name.
    pub source: String,
    /// rclone source path, including any subfolder.
    pub source_path: String,
    /// rclone destination path.
    pub dest_path: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Runs one-way mirrors for a list of sources.
pub struct MirrorExecutor<'a, R> {
    runner: &'a R,
    rclone: &'a Rclone,
    destination: &'a Destination,
}

impl<'a, R: CommandRunner> MirrorExecutor<'a, R> {
    pub fn new(runner: &'a R, rclone: &'a Rclone, destination: &'a Destination) -> Self {
        Self {
            runner,
            rclone,
            destination,
        }
    }

    /// Source and destination paths for one source.
    pub fn paths(&self, source: &SourceRemote, metadata: &MetadataMap) -> (String, String) {
        let subfolder = resolve_subfolder(source, metadata);
        (
            source_path(&source.name, subfolder),
            self.destination.folder(&source.name),
        )
    }

    /// Mirror a single source. Never fails; the error lands in the result.
    pub async fn mirror_one(
        &self,
        source: &SourceRemote,
        metadata: &MetadataMap,
        execute: bool,
        transcript: &mut Transcript,
    ) -> MirrorResult {
        let start = Instant::now();
        let (src, dst) = self.paths(source, metadata);
        let cmd = self.rclone.mirror(&src, &dst, !execute);
        let mode = if execute { "sync" } else { "sync (dry-run)" };

        transcript.push(format!("== Source {}: {mode} {src} -> {dst}", source.name));
        transcript.push(format!("$ {cmd}"));

        tracing::debug!(source = %source.name, src = %src, dst = %dst, execute, "starting mirror");

        let mut result = MirrorResult {
            source: source.name.clone(),
            source_path: src,
            dest_path: dst,
            ..Default::default()
        };

        match self.runner.run(&cmd).await {
            Ok(output) => {
                transcript.push_output(&format!("{} stdout", source.name), &output.stdout);
                transcript.push_output(&format!("{} stderr", source.name), &output.stderr);
                result.success = true;
            }
            Err(e) => {
                transcript.push_output(&format!("{} stdout", source.name), e.stdout());
                transcript.push(format!(
                    "{ERROR_MARKER} mirror of {} failed: {}",
                    source.name,
                    e.diagnostic()
                ));
                tracing::warn!(source = %source.name, error = %e, "mirror failed");
                result.error = Some(e.to_string());
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            source = %result.source,
            success = result.success,
            duration_ms = result.duration_ms,
            "mirror finished"
        );
        result
    }

    /// Mirror every source in order, skipping the reserved `remotes` entry.
    ///
    /// `cancel` is checked before each source; remaining sources are dropped
    /// once it is set.
    pub async fn mirror_all(
        &self,
        sources: &[SourceRemote],
        metadata: &MetadataMap,
        execute: bool,
        cancel: &CancelFlag,
        transcript: &mut Transcript,
    ) -> Vec<MirrorResult> {
        let mut results = Vec::with_capacity(sources.len());
        for source in sources {
            if source.is_reserved() {
                tracing::debug!(source = %source.name, "skipping reserved source name");
                continue;
            }
            if cancel.is_cancelled() {
                transcript.push(format!("Run cancelled before mirroring {}", source.name));
                tracing::info!(source = %source.name, "sync cancelled");
                break;
            }
            results.push(self.mirror_one(source, metadata, execute, transcript).await);
        }
        results
    }
}
