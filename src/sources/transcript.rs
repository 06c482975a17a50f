//! Append-only run transcript and pluggable sinks.
//!
//! A [`Transcript`] records every step, issued command, and captured output
//! chunk of one run, in order. Sinks receive each line as it is appended, so a
//! caller can mirror the run into a log file or tracing without the engine
//! touching any global logger.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Literal marker that fails a run when it appears anywhere in the transcript.
pub const ERROR_MARKER: &str = "Error:";

/// Receives transcript lines as they are produced.
pub trait TranscriptSink: Send + Sync {
    fn line(&self, line: &str);
}

/// Forwards transcript lines to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TranscriptSink for TracingSink {
    fn line(&self, line: &str) {
        tracing::info!(target: "transcript", "{line}");
    }
}

/// Appends timestamped transcript lines to a file.
#[derive(Debug)]
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    /// Open `path` for appending, creating it and its parent directory.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl TranscriptSink for FileSink {
    fn line(&self, line: &str) {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let Ok(mut file) = self.file.lock() else {
            return;
        };
        for part in line.lines() {
            if let Err(e) = writeln!(file, "[{stamp}] {part}") {
                tracing::warn!(error = %e, "failed to write transcript log");
                return;
            }
        }
    }
}

/// Ordered transcript for one run.
#[derive(Default)]
pub struct Transcript {
    text: String,
    sinks: Vec<Arc<dyn TranscriptSink>>,
}

impl std::fmt::Debug for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcript")
            .field("text", &self.text)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink that sees every subsequent line.
    pub fn with_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Append a line (or multi-line chunk).
    pub fn push(&mut self, line: impl AsRef<str>) {
        let line = line.as_ref().trim_end_matches(['\r', '\n']);
        tracing::debug!(target: "transcript", "{line}");
        self.text.push_str(line);
        self.text.push('\n');
        for sink in &self.sinks {
            sink.line(line);
        }
    }

    /// Append captured subprocess output, labeled, skipping empty chunks.
    pub fn push_output(&mut self, label: &str, output: &str) {
        let output = output.trim_end();
        if output.is_empty() {
            return;
        }
        self.push(format!("[{label}]\n{output}"));
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    /// Whether the literal error marker appears anywhere so far.
    pub fn has_error_marker(&self) -> bool {
        self.text.contains(ERROR_MARKER)
    }
}
