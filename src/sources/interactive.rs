//! Interactive confirmation before a real sync.
//!
//! A real run purges destination folders and deletes destination files that
//! are missing at the source, so the CLI shows what will be touched and asks
//! before going ahead. Scheduled runs pass `--yes` and never reach a prompt.

use colored::Colorize;
use dialoguer::{Confirm, theme::ColorfulTheme};
use thiserror::Error;

use super::rclone::{Destination, source_path};
use super::registry::resolve_subfolder;
use super::sync::SyncRunOptions;

/// Human-readable list of what a run will touch.
pub fn describe_plan(options: &SyncRunOptions) -> Vec<String> {
    let destination: Destination = options.destination();
    let mut details = vec![format!(
        "destination root {}",
        destination.user_root().cyan()
    )];
    details.push("destination folders without a configured source are purged".to_string());
    for source in options.sources.iter().filter(|s| !s.is_reserved()) {
        let subfolder = resolve_subfolder(source, &options.metadata);
        details.push(format!(
            "{} {} -> {}",
            source.name.bold(),
            source_path(&source.name, subfolder).dimmed(),
            destination.folder(&source.name).dimmed()
        ));
    }
    details
}

/// Ask for confirmation before a destructive operation.
pub fn confirm_action(message: &str, default: bool) -> Result<bool, InteractiveError> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(message)
        .default(default)
        .interact()
        .map_err(|e| InteractiveError::IoError(e.to_string()))
}

/// Ask for confirmation with a detailed explanation.
pub fn confirm_with_details(
    action: &str,
    details: &[String],
    default: bool,
) -> Result<bool, InteractiveError> {
    println!();
    println!("{}", action.bold());
    for detail in details {
        println!("  • {}", detail);
    }
    println!();

    confirm_action("Proceed?", default)
}

/// Errors from interactive prompts.
#[derive(Error, Debug)]
pub enum InteractiveError {
    /// User declined the prompt
    #[error("Operation cancelled by user")]
    Cancelled,
    /// IO error during prompt
    #[error("IO error: {0}")]
    IoError(String),
}
