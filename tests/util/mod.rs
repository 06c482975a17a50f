#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cloud_mirror::sources::{CommandLine, CommandRunner, ProcessError, ProcessOutput};

/// In-memory stand-in for rclone that tracks which destination folders exist.
///
/// Real (non dry-run) `purge` removes a folder and real `sync` creates one,
/// so repeated runs observe the effect of earlier ones.
#[derive(Default)]
pub struct FakeRclone {
    folders: Mutex<BTreeSet<String>>,
    failing: Vec<String>,
    calls: Mutex<Vec<CommandLine>>,
}

impl FakeRclone {
    pub fn with_folders(names: &[&str]) -> Self {
        Self {
            folders: Mutex::new(names.iter().map(|n| n.to_string()).collect()),
            ..Default::default()
        }
    }

    /// `sync` fails for any source path starting with `prefix`.
    pub fn failing(mut self, prefix: &str) -> Self {
        self.failing.push(prefix.to_string());
        self
    }

    pub fn folders(&self) -> Vec<String> {
        self.folders.lock().unwrap().iter().cloned().collect()
    }

    pub fn calls(&self) -> Vec<CommandLine> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<CommandLine> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// Calls rendered as `verb target`.
    pub fn verbs(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| format!("{} {}", c.get_args()[0], c.get_args()[1]))
            .collect()
    }

    fn last_segment(path: &str) -> String {
        path.rsplit('/').next().unwrap_or(path).to_string()
    }
}

impl CommandRunner for FakeRclone {
    async fn run(&self, command: &CommandLine) -> Result<ProcessOutput, ProcessError> {
        self.calls.lock().unwrap().push(command.clone());
        let args = command.get_args();
        let dry_run = command.has_arg("--dry-run");
        let mut folders = self.folders.lock().unwrap();

        match args[0].as_str() {
            "lsd" => {
                let stdout = folders
                    .iter()
                    .map(|f| format!("          -1 2024-03-01 10:00:00        -1 {f}\n"))
                    .collect();
                Ok(ProcessOutput {
                    stdout,
                    stderr: String::new(),
                })
            }
            "purge" => {
                if !dry_run {
                    folders.remove(&Self::last_segment(&args[1]));
                }
                Ok(ProcessOutput::default())
            }
            "sync" if self.failing.iter().any(|p| args[1].starts_with(p.as_str())) => {
                Err(ProcessError::Exit {
                    command: command.display(),
                    code: Some(7),
                    stdout: String::new(),
                    stderr: "directory not found".into(),
                })
            }
            "sync" => {
                if !dry_run {
                    folders.insert(Self::last_segment(&args[2]));
                }
                Ok(ProcessOutput {
                    stdout: "Transferred: 0 B / 0 B, -, 0 B/s, ETA -\n".into(),
                    stderr: String::new(),
                })
            }
            _ => Ok(ProcessOutput::default()),
        }
    }
}

/// Write an executable shell script that behaves like a small rclone.
///
/// `listremotes` prints `remotes`, `lsd` prints `folders`, and `sync` exits
/// 3 with an error for any source starting with `broken`.
#[cfg(unix)]
pub fn write_fake_rclone(dir: &Path, remotes: &[&str], folders: &[&str]) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let listing: String = folders
        .iter()
        .map(|f| format!("echo '          -1 2024-03-01 10:00:00        -1 {f}'\n"))
        .collect();
    let remote_list: String = remotes.iter().map(|r| format!("echo '{r}:'\n")).collect();
    let script = format!(
        r#"#!/bin/sh
case "$1" in
  listremotes)
{remote_list}    ;;
  lsd)
{listing}    ;;
  purge)
    echo "purged $2"
    ;;
  sync)
    case "$2" in
      broken*) echo "Error: directory not found" >&2; exit 3 ;;
    esac
    echo "Transferred: 0 B / 0 B"
    ;;
esac
exit 0
"#
    );
    let path = dir.join("rclone");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Write `settings.toml` plus an empty rclone config, returning the settings path.
pub fn write_settings(dir: &Path, rclone: &Path, sources: &[&str]) -> PathBuf {
    let conf = dir.join("rclone.conf");
    std::fs::write(&conf, "[pfuser]\ntype = s3\n").unwrap();
    let mut settings = format!(
        "rclone = {:?}\nrclone_config = {:?}\nlog_file = {:?}\n\n[destination]\nremote = \"pfuser\"\nbucket = \"data\"\n",
        rclone.display().to_string(),
        conf.display().to_string(),
        dir.join("sync.log").display().to_string(),
    );
    for source in sources {
        settings.push_str(&format!("\n[[sources]]\nname = \"{source}\"\nkind = \"drive\"\n"));
    }
    let path = dir.join("settings.toml");
    std::fs::write(&path, settings).unwrap();
    path
}
