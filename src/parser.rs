use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::error::ParseError;

// ─── Access-log grammar ──────────────────────────────────────────

/// Classic load-balancer access-log line.  Everything up to the quoted
/// user agent is matched; only method, URL, user agent and the
/// load-balancer status code are kept.
static CLASSIC_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?P<timestamp>[^Z]+Z) ",
        r"(?P<lb>\S+) ",
        r"(?P<client>[^:]+?):[0-9]+ ",
        r"(?P<backend>[^:]+?):[0-9]+ ",
        r"(?P<request_time>[0-9.]+) ",
        r"(?P<backend_time>[0-9.]+) ",
        r"(?P<response_time>[0-9.]+) ",
        r"(?P<lb_status>[0-9]{3}) ",
        r"(?P<backend_status>[0-9]{3}) ",
        r"(?P<received>[0-9]+) ",
        r"(?P<sent>[0-9]+) ",
        r#""(?P<method>[A-Z]+) (?P<url>[^ ]+) HTTP/[0-9.]+" "#,
        r#""(?P<user_agent>[^"]*)" .*"#,
    ))
    .expect("access-log grammar is a valid regex")
});

/// Original status codes worth replaying: successes and redirects.
const REPLAYABLE_STATUS: std::ops::RangeInclusive<u16> = 200..=399;

// ─── Request descriptor ──────────────────────────────────────────

/// One request as the load balancer originally saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: String,
    /// Request URL exactly as logged; usually absolute.
    pub url: String,
    pub user_agent: String,
    /// Status code the load balancer returned to the original client.
    pub status_code: u16,
}

impl RequestDescriptor {
    /// Only lines the original capture answered with 2xx/3xx get replayed.
    pub fn is_replayable(&self) -> bool {
        REPLAYABLE_STATUS.contains(&self.status_code)
    }
}

// ─── Parsing ─────────────────────────────────────────────────────

/// Parse one trimmed access-log line.
///
/// A status code outside 100–599 is rejected like any other grammar
/// mismatch, so the line is counted as a discard.
pub fn parse(line: &str) -> Result<RequestDescriptor, ParseError> {
    let reject = || ParseError {
        line: line.to_owned(),
    };

    let caps = CLASSIC_LINE.captures(line).ok_or_else(reject)?;

    let raw_status = &caps["lb_status"];
    let status_code = match raw_status.parse::<u16>() {
        Ok(code) if (100..=599).contains(&code) => code,
        _ => {
            warn!("Failed to parse status code ({raw_status}) from line {line}");
            return Err(reject());
        }
    };

    Ok(RequestDescriptor {
        method: caps["method"].to_owned(),
        url: caps["url"].to_owned(),
        user_agent: caps["user_agent"].to_owned(),
        status_code,
    })
}
