use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod dispatch;
mod error;
mod ingest;
mod metrics;
mod middleware;
mod parser;
mod queue;
mod rate_limiter;
mod replay;
mod sender;
mod server;

use config::{Cli, Command, ReplayConfig};
use metrics::ReplayStats;
use replay::Replayer;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Command::Play(args) => play(args).await,
    }
}

fn init_logging(log_level: &str) {
    let env_filter = format!("h2=off,hyper=off,hyper_util=off,rustls=off,{log_level}");
    let filter = EnvFilter::try_new(&env_filter).unwrap_or_else(|e| {
        eprintln!("Invalid log level \"{log_level}\": {e}; falling back to info");
        EnvFilter::new("info")
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_level(true)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    debug!("Logging subsystem enabled");
}

async fn play(args: config::PlayArgs) {
    let config = match ReplayConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let stats = Arc::new(ReplayStats::new());
    let replayer = match Replayer::new(config.clone(), Arc::clone(&stats)) {
        Ok(replayer) => replayer,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let status_server = match config.status_listen_address() {
        Some(addr) => server::spawn(&addr, Arc::clone(&stats)).await,
        None => None,
    };

    // Ctrl-C stops admitting lines; in-flight sends finish and the final
    // stats line is still printed.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping replay");
                cancel.cancel();
            }
        });
    }

    let result = replayer.run(cancel).await;

    if let Some(handle) = status_server {
        handle.abort();
    }
    if let Err(e) = result {
        error!("Replay failed: {e}");
        std::process::exit(1);
    }
}
