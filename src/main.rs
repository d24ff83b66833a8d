//! Main entry point for the Redis health sidecar

use anyhow::Context;
use clap::Parser;
use redis_health_sidecar::{
    cli::{self, ServeArgs},
    init_logger_with_config, log_error, log_info,
    runtime::run_with_runtime,
    SidecarConfig,
};

#[derive(Parser)]
#[command(name = "redis-health-sidecar")]
#[command(about = "Probes Redis endpoints and reports their liveness over HTTP")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(flatten)]
    serve: ServeArgs,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = start(cli) {
        log_error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn start(cli: Cli) -> anyhow::Result<()> {
    // The file is read first so that its log level can be honoured.
    let file_config = SidecarConfig::load_file(cli.serve.config.as_deref())
        .context("Failed to load configuration")?;

    let level = if cli.verbose {
        "debug".to_string()
    } else if let Some(level) = cli.log_level.clone() {
        level
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| file_config.log_level.clone())
    };
    init_logger_with_config(&level);

    let config = cli
        .serve
        .resolve(file_config)
        .context("Invalid configuration")?;

    log_info!("Starting redis-health-sidecar {}", env!("CARGO_PKG_VERSION"));

    let runtime_config = config.runtime.clone();
    run_with_runtime(&runtime_config, async move {
        cli::run(config).await.context("Health sidecar failed")
    })
}
