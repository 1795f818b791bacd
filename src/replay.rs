use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ReplayConfig;
use crate::dispatch;
use crate::error::{ConfigError, ReplayError};
use crate::ingest::{self, IngestSummary};
use crate::metrics::{Monitor, PercentileSet, ReplayStats, StatusLine, Totals};
use crate::queue;
use crate::rate_limiter::RateLimiter;
use crate::sender::Sender;

/// Final report of one run, returned once everything has drained.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub files: usize,
    pub ingest: IngestSummary,
    pub totals: Totals,
    pub final_status: StatusLine,
    pub latency_ms: PercentileSet,
    pub elapsed: Duration,
    pub cancelled: bool,
}

/// The whole pipeline: ingestion → rate limiter → queue → senders, with the
/// monitor reporting alongside.
pub struct Replayer {
    config: ReplayConfig,
    stats: Arc<ReplayStats>,
    sender: Arc<Sender>,
    limiter: Arc<RateLimiter>,
}

impl Replayer {
    pub fn new(config: ReplayConfig, stats: Arc<ReplayStats>) -> Result<Self, ConfigError> {
        let sender = Arc::new(Sender::new(config.sender_config(), Arc::clone(&stats))?);
        let limiter = Arc::new(match config.rate {
            Some(rate) => RateLimiter::new(rate as f64),
            None => RateLimiter::unlimited(),
        });
        Ok(Self {
            config,
            stats,
            sender,
            limiter,
        })
    }

    /// Replay every log file and wait for all in-flight sends.
    ///
    /// Per-file and per-line failures are logged and counted, never
    /// returned.  Cancelling `cancel` stops ingestion and the workers; the
    /// monitor still logs a last status line before this returns.
    pub async fn run(self, cancel: CancellationToken) -> Result<RunSummary, ReplayError> {
        let started = Instant::now();
        let files = ingest::discover(&self.config.log_dir).await?;
        let file_count = files.len();

        let rate = match self.config.rate {
            Some(rate) if self.limiter.is_limited() => format!("{rate}/sec"),
            _ => "unlimited".to_owned(),
        };
        self.stats.set_running(true);

        // Stopped only after the pool has joined, so the last line covers
        // every completed send.
        let monitor_stop = CancellationToken::new();
        let monitor = tokio::spawn(
            Monitor::new(Arc::clone(&self.stats))
                .run(self.config.monitor_interval, monitor_stop.clone()),
        );

        let (tx, rx) = queue::bounded(self.config.queue_capacity());
        info!(
            "Replaying {file_count} files to {} with {} senders, rate {rate}, queue capacity {}",
            self.sender.target(),
            self.config.num_senders,
            tx.capacity(),
        );
        let pool = tokio::spawn(dispatch::run_pool(
            self.config.num_senders,
            rx,
            Arc::clone(&self.sender),
            Arc::clone(&self.stats),
            cancel.clone(),
        ));

        let ingest = ingest::ingest_all(files, Arc::clone(&self.limiter), tx, cancel.clone()).await;
        if let Err(e) = pool.await {
            error!("Sender pool crashed: {e}");
        }

        monitor_stop.cancel();
        let final_status = match monitor.await {
            Ok(line) => line,
            Err(e) => {
                error!("Monitor crashed: {e}");
                Monitor::new(Arc::clone(&self.stats)).tick()
            }
        };
        self.stats.set_running(false);

        let summary = RunSummary {
            files: file_count,
            ingest,
            totals: self.stats.totals(),
            final_status,
            latency_ms: self.stats.latency_percentiles(),
            elapsed: started.elapsed(),
            cancelled: cancel.is_cancelled(),
        };
        log_summary(&summary);
        Ok(summary)
    }
}

fn log_summary(summary: &RunSummary) {
    let totals = &summary.totals;
    let latency = &summary.latency_ms;
    info!(
        "Replay {} after {:.1}s: {}/{} files completed ({} failed), {} lines admitted, \
         {} succeeded, {} failed, {} discarded",
        if summary.cancelled { "cancelled" } else { "finished" },
        summary.elapsed.as_secs_f64(),
        summary.ingest.files_completed,
        summary.files,
        summary.ingest.files_failed,
        summary.ingest.lines_admitted,
        totals.successes,
        totals.failures,
        totals.discards,
    );
    debug!("Last interval: {}", summary.final_status);
    if latency.has_data() {
        info!("Latency: {latency}");
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use mockito::{Matcher, Server};
    use tempfile::TempDir;
    use url::Url;

    use super::*;
    use crate::parser::tests::log_line;

    fn config(target: &str, dir: &Path, rate: Option<u64>, num_senders: usize) -> ReplayConfig {
        ReplayConfig {
            target: Url::parse(target).unwrap(),
            log_dir: dir.to_path_buf(),
            rate,
            num_senders,
            request_timeout: Duration::from_secs(5),
            max_conns_per_host: 16,
            status_bind_address: None,
            monitor_interval: Duration::from_millis(200),
        }
    }

    fn write_log(dir: &TempDir, name: &str, lines: &[String]) {
        let mut contents = lines.join("\n");
        contents.push('\n');
        std::fs::write(dir.path().join(name), contents).unwrap();
    }

    async fn replay(config: ReplayConfig) -> (RunSummary, Arc<ReplayStats>) {
        let stats = Arc::new(ReplayStats::new());
        let summary = Replayer::new(config, Arc::clone(&stats))
            .unwrap()
            .run(CancellationToken::new())
            .await
            .unwrap();
        (summary, stats)
    }

    #[tokio::test]
    async fn only_the_successful_original_request_is_replayed() {
        let mut server = Server::new_async().await;
        let ok = server
            .mock("GET", "/ok")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let not_found = server
            .mock("GET", "/missing")
            .expect(0)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        write_log(
            &dir,
            "access.txt",
            &[
                log_line(200, "GET", "http://www.example.com:80/ok", "ua"),
                log_line(404, "GET", "http://www.example.com:80/missing", "ua"),
            ],
        );

        let (summary, stats) = replay(config(&server.url(), dir.path(), None, 1)).await;

        ok.assert_async().await;
        not_found.assert_async().await;
        assert_eq!(
            summary.totals,
            Totals {
                successes: 1,
                failures: 0,
                discards: 1,
            }
        );
        assert_eq!(summary.final_status.successes, 1);
        assert_eq!(summary.final_status.discards, 1);
        assert!(!summary.cancelled);
        assert!(!stats.is_running());
    }

    #[tokio::test]
    async fn unreachable_target_counts_a_failure() {
        let dir = TempDir::new().unwrap();
        write_log(
            &dir,
            "access.txt",
            &[
                log_line(200, "GET", "http://www.example.com:80/ok", "ua"),
                log_line(404, "GET", "http://www.example.com:80/missing", "ua"),
            ],
        );

        let (summary, _) = replay(config("http://127.0.0.1:1", dir.path(), None, 1)).await;

        assert_eq!(summary.totals.failures, 1);
        assert_eq!(summary.totals.discards, 1);
        assert_eq!(summary.final_status.total_lines, 2);
    }

    #[tokio::test]
    async fn malformed_line_is_discarded_and_the_next_one_sent() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/form")
            .match_query(Matcher::UrlEncoded("step".into(), "2".into()))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        write_log(
            &dir,
            "access.txt",
            &[
                "not a log line".to_owned(),
                log_line(200, "POST", "https://www.example.com:443/form?step=2", "ua"),
            ],
        );

        let (summary, _) = replay(config(&server.url(), dir.path(), None, 2)).await;

        mock.assert_async().await;
        assert_eq!(summary.totals.discards, 1);
        assert_eq!(summary.totals.successes, 1);
    }

    #[tokio::test]
    async fn every_admitted_line_is_accounted_for_exactly_once() {
        let mut server = Server::new_async().await;
        let _ok = server
            .mock("GET", "/ok")
            .with_status(200)
            .create_async()
            .await;
        let _err = server
            .mock("GET", "/boom")
            .with_status(503)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        for file in 0..3 {
            let lines: Vec<String> = (0..40)
                .map(|i| match i % 4 {
                    0 => log_line(200, "GET", "http://h/ok", "ua"),
                    1 => log_line(301, "GET", "http://h/boom", "ua"),
                    2 => log_line(404, "GET", "http://h/ok", "ua"),
                    _ => format!("garbage {file} {i}"),
                })
                .collect();
            write_log(&dir, &format!("part-{file}.txt"), &lines);
        }
        write_log(&dir, "ignored.log", &[log_line(200, "GET", "http://h/ok", "ua")]);

        let (summary, _) = replay(config(&server.url(), dir.path(), None, 8)).await;

        assert_eq!(summary.files, 3);
        assert_eq!(summary.ingest.lines_admitted, 120);
        assert_eq!(summary.totals.lines(), 120);
        assert_eq!(
            summary.totals,
            Totals {
                successes: 30,
                failures: 30,
                discards: 60,
            }
        );
        assert_eq!(summary.latency_ms.count, 60);
    }

    #[tokio::test]
    async fn rate_limit_paces_admission() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/paced")
            .with_status(200)
            .expect(50)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        let lines: Vec<String> = (0..50)
            .map(|_| log_line(200, "GET", "http://h/paced", "ua"))
            .collect();
        write_log(&dir, "access.txt", &lines);

        let started = Instant::now();
        let (summary, _) = replay(config(&server.url(), dir.path(), Some(10), 4)).await;

        // burst = max(1, 10 / 10) = 1, so (50 - 1) / 10 = 4.9s
        assert!(started.elapsed() >= Duration::from_millis(4_800));
        mock.assert_async().await;
        assert_eq!(summary.totals.successes, 50);
    }

    #[tokio::test]
    async fn cancellation_stops_the_run_and_still_reports() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/slow")
            .with_status(200)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        let lines: Vec<String> = (0..1_000)
            .map(|_| log_line(200, "GET", "http://h/slow", "ua"))
            .collect();
        write_log(&dir, "access.txt", &lines);

        let stats = Arc::new(ReplayStats::new());
        let replayer =
            Replayer::new(config(&server.url(), dir.path(), Some(20), 2), Arc::clone(&stats))
                .unwrap();
        let cancel = CancellationToken::new();
        let run = tokio::spawn(replayer.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
        let summary = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("cancelled run returns promptly")
            .unwrap()
            .unwrap();

        assert!(summary.cancelled);
        assert!(summary.totals.lines() < 1_000);
        assert_eq!(summary.final_status.total_lines, summary.totals.lines());
    }

    #[tokio::test]
    async fn empty_directory_finishes_immediately() {
        let dir = TempDir::new().unwrap();
        let (summary, _) = replay(config("http://127.0.0.1:1", dir.path(), None, 4)).await;

        assert_eq!(summary.files, 0);
        assert_eq!(summary.totals, Totals::default());
        assert_eq!(summary.final_status.avg_latency_ms, -1);
    }
}
