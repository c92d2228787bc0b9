//! toolchat CLI binary entry point.

use clap::Parser;
use toolchat::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_filter())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = toolchat::cli::run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
