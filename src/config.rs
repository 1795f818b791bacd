use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use url::Url;

use crate::dispatch::DEFAULT_NUM_SENDERS;
use crate::error::ConfigError;
use crate::metrics::MONITORING_FREQUENCY;
use crate::sender::{SenderConfig, DEFAULT_MAX_CONNS_PER_HOST, DEFAULT_REQUEST_TIMEOUT};

// ─── Command line ────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "elb-log-replay", version, about = "Replay load-balancer access logs")]
pub struct Cli {
    /// Log filter, e.g. `info` or `elb_log_replay=debug`
    #[arg(long, global = true, env = "ELB_REPLAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Play the access logs against a target
    Play(PlayArgs),
}

#[derive(Debug, Clone, Args)]
pub struct PlayArgs {
    /// Target to play traffic to, scheme://host:port (e.g. http://localhost:1235)
    #[arg(long, env = "ELB_REPLAY_TARGET_HOST")]
    pub target_host: String,

    /// Directory holding the log files; every `*.txt` file in it is played
    #[arg(long, env = "ELB_REPLAY_LOG_FILES")]
    pub log_files: PathBuf,

    /// Requests per second.  Leave out for no limit
    #[arg(long, env = "ELB_REPLAY_RATE", allow_negative_numbers = true)]
    pub rate: Option<i64>,

    /// Number of parallel HTTP senders
    #[arg(long, env = "ELB_REPLAY_NUM_SENDERS", default_value_t = DEFAULT_NUM_SENDERS)]
    pub num_senders: usize,

    /// Bind address for the status endpoint, e.g. :6060 or 127.0.0.1:6060.
    /// Disabled when empty
    #[arg(long, env = "ELB_REPLAY_STATUS_BIND_ADDRESS")]
    pub status_bind_address: Option<String>,

    /// Overall timeout of a single replayed request
    #[arg(long, env = "ELB_REPLAY_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    pub request_timeout_secs: u64,

    /// Maximum simultaneous connections to the target
    #[arg(long, env = "ELB_REPLAY_MAX_CONNS_PER_HOST", default_value_t = DEFAULT_MAX_CONNS_PER_HOST)]
    pub max_conns_per_host: usize,
}

// ─── Validated configuration ─────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub target: Url,
    pub log_dir: PathBuf,
    /// `None` means unlimited.
    pub rate: Option<u64>,
    pub num_senders: usize,
    pub request_timeout: Duration,
    pub max_conns_per_host: usize,
    pub status_bind_address: Option<String>,
    pub monitor_interval: Duration,
}

impl ReplayConfig {
    pub fn from_args(args: PlayArgs) -> Result<Self, ConfigError> {
        let target = parse_target(&args.target_host)?;

        let rate = match args.rate {
            Some(rate) if rate <= 0 => return Err(ConfigError::Rate(rate)),
            Some(rate) => Some(rate.unsigned_abs()),
            None => None,
        };
        if args.num_senders == 0 {
            return Err(ConfigError::NumSenders);
        }
        if args.request_timeout_secs == 0 {
            return Err(ConfigError::Zero("request-timeout-secs"));
        }
        if args.max_conns_per_host == 0 {
            return Err(ConfigError::Zero("max-conns-per-host"));
        }

        let meta = std::fs::metadata(&args.log_files).map_err(|source| {
            ConfigError::LogDirectory {
                path: args.log_files.clone(),
                source,
            }
        })?;
        if !meta.is_dir() {
            return Err(ConfigError::LogDirectory {
                path: args.log_files,
                source: std::io::Error::other("not a directory"),
            });
        }

        Ok(Self {
            target,
            log_dir: args.log_files,
            rate,
            num_senders: args.num_senders,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            max_conns_per_host: args.max_conns_per_host,
            status_bind_address: args
                .status_bind_address
                .filter(|addr| !addr.trim().is_empty()),
            monitor_interval: MONITORING_FREQUENCY,
        })
    }

    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            target: self.target.clone(),
            timeout: self.request_timeout,
            max_conns_per_host: self.max_conns_per_host,
        }
    }

    /// Bound queue size: a few lines per sender.
    pub fn queue_capacity(&self) -> usize {
        self.num_senders.saturating_mul(4)
    }

    /// `:6060` binds on localhost.
    pub fn status_listen_address(&self) -> Option<String> {
        self.status_bind_address.as_deref().map(|addr| {
            if addr.starts_with(':') {
                format!("localhost{addr}")
            } else {
                addr.to_owned()
            }
        })
    }
}

fn parse_target(raw: &str) -> Result<Url, ConfigError> {
    let target = Url::parse(raw).map_err(|source| ConfigError::TargetUrl {
        url: raw.to_owned(),
        source,
    })?;
    if !matches!(target.scheme(), "http" | "https") {
        return Err(ConfigError::TargetScheme(raw.to_owned()));
    }
    if target.host_str().is_none() {
        return Err(ConfigError::TargetHost(raw.to_owned()));
    }
    Ok(target)
}
