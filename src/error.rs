use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ─── Startup errors ──────────────────────────────────────────────

/// Problems with the command-line configuration.  Always fatal, always
/// reported before a single request goes out.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot parse target URL {url}: {source}")]
    TargetUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("target URL {0} must use http or https")]
    TargetScheme(String),

    #[error("target URL {0} has no host")]
    TargetHost(String),

    #[error("rate must be > 0 when given, got {0}")]
    Rate(i64),

    #[error("cannot set up TLS for the target: {0}")]
    Tls(#[source] rustls::Error),

    #[error("num-senders must be at least 1")]
    NumSenders,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("cannot read log directory {path}: {source}")]
    LogDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ─── Pipeline errors ─────────────────────────────────────────────

/// A line that does not match the access-log grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to parse the line {line}")]
pub struct ParseError {
    pub line: String,
}

/// Everything that can go wrong while replaying.  Only `Cancelled` is
/// allowed to end a run early; the rest are handled per file or per line.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("error reading {path}: {source}")]
    SourceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("error building request for {url}: {reason}")]
    Dispatch { url: String, reason: String },

    #[error("error sending request for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("replay cancelled")]
    Cancelled,
}

/// Why a request that went out never produced a fully read response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("reading response body: {0}")]
    Body(#[from] hyper::Error),

    #[error("no complete response within {0:?}")]
    Timeout(Duration),
}
