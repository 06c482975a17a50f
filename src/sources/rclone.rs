//! rclone command vocabulary and destination path layout.
//!
//! Every destination folder lives under one fixed template:
//!
//! ```text
//! {remote}:{bucket}/user/{remote}/{source}
//! ```
//!
//! The destination remote's own name doubles as the `user` segment. Nothing
//! here executes anything; it only builds [`CommandLine`]s and parses output.

use std::path::{Path, PathBuf};

use super::runner::CommandLine;

/// rclone flag that turns a mutating command into a report.
pub const DRY_RUN_FLAG: &str = "--dry-run";

/// The single destination remote and bucket for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    remote: String,
    bucket: String,
}

impl Destination {
    pub fn new(remote: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            bucket: bucket.into(),
        }
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Folder that holds one subfolder per source.
    pub fn user_root(&self) -> String {
        format!("{}:{}/user/{}", self.remote, self.bucket, self.remote)
    }

    /// Destination folder for one source (or orphan) name.
    pub fn folder(&self, name: &str) -> String {
        format!("{}/{}", self.user_root(), name)
    }
}

/// Build the rclone path for a source, honoring an optional subfolder.
///
/// `gdrive1` + `notes` and `gdrive1` + `/notes` both give `gdrive1:/notes`.
pub fn source_path(name: &str, subfolder: Option<&str>) -> String {
    match subfolder.map(str::trim).filter(|s| !s.is_empty()) {
        Some(sub) if sub.starts_with('/') => format!("{name}:{sub}"),
        Some(sub) => format!("{name}:/{sub}"),
        None => format!("{name}:"),
    }
}

/// Builds rclone invocations against one merged config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rclone {
    executable: PathBuf,
    config: PathBuf,
}

impl Rclone {
    pub fn new(executable: impl Into<PathBuf>, config: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            config: config.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn config(&self) -> &Path {
        &self.config
    }

    fn base(&self) -> CommandLine {
        CommandLine::new(&self.executable)
    }

    fn with_config(&self, cmd: CommandLine) -> CommandLine {
        cmd.arg("--config")
            .arg(self.config.to_string_lossy().into_owned())
    }

    /// `rclone listremotes`
    pub fn list_remotes(&self) -> CommandLine {
        self.with_config(self.base().arg("listremotes"))
    }

    /// `rclone lsd <target> --max-depth 1`
    pub fn list_dirs(&self, target: &str) -> CommandLine {
        self.with_config(
            self.base()
                .arg("lsd")
                .arg(target)
                .args(["--max-depth", "1"]),
        )
    }

    /// `rclone purge <target> [--dry-run] -v`
    pub fn purge(&self, target: &str, dry_run: bool) -> CommandLine {
        self.with_config(
            self.base()
                .arg("purge")
                .arg(target)
                .arg_if(dry_run, DRY_RUN_FLAG)
                .arg("-v"),
        )
    }

    /// `rclone sync <source> <dest> [--dry-run] --progress`
    ///
    /// `sync` deletes destination files missing from the source.
    pub fn mirror(&self, source: &str, dest: &str, dry_run: bool) -> CommandLine {
        self.with_config(
            self.base()
                .arg("sync")
                .arg(source)
                .arg(dest)
                .arg_if(dry_run, DRY_RUN_FLAG)
                .arg("--progress"),
        )
    }
}

/// One line of `rclone lsd` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingLine {
    /// A folder name, taken from the last whitespace token.
    Folder(String),
    /// A non-blank line without the expected preamble.
    Ambiguous(String),
}

/// Classify one listing line. Blank lines yield `None`.
///
/// Lines look like `-1 2024-01-01 12:00:00.123 -1 name`, but the preamble
/// width varies, so only the last token is used.
pub fn parse_listing_line(line: &str) -> Option<ListingLine> {
    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;
    match tokens.last() {
        Some(name) => Some(ListingLine::Folder(normalize_folder(name).to_string())),
        None => Some(ListingLine::Ambiguous(first.to_string())),
    }
}

/// Parsed `rclone lsd` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Folder names in listing order, normalized.
    pub folders: Vec<String>,
    /// Lines that did not look like listing entries and were skipped.
    pub ambiguous: Vec<String>,
}

/// Parse folder names from `rclone lsd` output, keeping skipped lines.
pub fn parse_listing(output: &str) -> Listing {
    let mut listing = Listing::default();
    for line in output.lines().filter_map(parse_listing_line) {
        match line {
            ListingLine::Folder(name) if !name.is_empty() => listing.folders.push(name),
            ListingLine::Folder(_) => {}
            ListingLine::Ambiguous(raw) => {
                tracing::warn!(line = %raw, "skipping unrecognized listing line");
                listing.ambiguous.push(raw);
            }
        }
    }
    listing
}

/// Strip a single trailing slash.
pub fn normalize_folder(name: &str) -> &str {
    name.strip_suffix('/').unwrap_or(name)
}

/// Parse `rclone listremotes` output into bare remote names.
pub fn parse_remote_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.strip_suffix(':').unwrap_or(l).to_string())
        .collect()
}
