use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

use rust_dumper::cli::Args;
use rust_dumper::cloud::AwsConnector;
use rust_dumper::config::BackupConfig;
use rust_dumper::constants::SHUTDOWN_DRAIN_TIMEOUT;
use rust_dumper::handler::BackupHandler;
use rust_dumper::server::serve;

fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    initialize_logging(args.verbose)?;

    // Configuration problems should stop the process, not every request
    let config = Arc::new(BackupConfig::from_env().context("Invalid configuration")?);
    info!(
        "Dumping {} to bucket {} via {} (secret {})",
        config.root_path.display(),
        config.bucket,
        config.s3_endpoint,
        config.secret_id
    );

    let connector = Arc::new(AwsConnector::new(&config));
    let handler = Arc::new(BackupHandler::new(config, connector));

    let addr: SocketAddr = args
        .listen_addr()
        .parse()
        .with_context(|| format!("Invalid listen address: {}", args.listen_addr()))?;

    let runtime = Runtime::new().context("Failed to create Tokio runtime")?;
    runtime.block_on(async move {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        info!("Listening on {}", addr);

        serve(
            listener,
            handler,
            async {
                tokio::signal::ctrl_c().await.ok();
                info!("Received shutdown signal");
            },
            SHUTDOWN_DRAIN_TIMEOUT,
        )
        .await
    })
}

/// Initialize logging with the specified verbosity level
fn initialize_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ).context("Failed to initialize logger")?;
    Ok(())
}
