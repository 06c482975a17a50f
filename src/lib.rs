pub mod cli;
pub mod config;
pub mod sources;

/// Library entrypoint; parses the command line and returns the exit code.
pub async fn run() -> i32 {
    cli::run().await
}
