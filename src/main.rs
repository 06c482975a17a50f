use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    // stdout carries the transcript and --json output.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false)
        .init();

    let code = cloud_mirror::run().await;
    std::process::exit(code);
}
