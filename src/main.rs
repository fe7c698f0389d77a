use std::process;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use proxbalance::balancer::Balancer;
use proxbalance::cli::Args;
use proxbalance::config::load_config;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(
                "Failed to load config file {}: {}",
                args.config.display(),
                e
            );
            process::exit(1);
        }
    };

    info!(
        "Starting proxbalance against {} (threshold {}%)",
        config.proxmox.base_url(),
        config.parameters.deviation
    );

    let balancer = Balancer::new(config);
    let result = if args.check {
        balancer.check().await
    } else {
        balancer.run().await
    };

    // run() never returns Ok; anything that gets here as an error is a state
    // the engine cannot safely balance against.
    if let Err(e) = result {
        error!("Fatal: {}", e);
        process::exit(1);
    }
}
