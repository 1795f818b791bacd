use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::ReplayError;
use crate::queue::QueueSender;
use crate::rate_limiter::RateLimiter;

/// Log files are picked up by extension.
pub const LOG_FILE_SUFFIX: &str = ".txt";

// ─── Discovery ───────────────────────────────────────────────────

/// Regular files directly inside `dir` whose name ends in `.txt`.
/// The order is whatever the filesystem returns.
pub async fn discover(dir: &Path) -> Result<Vec<PathBuf>, ReplayError> {
    let io_err = |source| ReplayError::SourceIo {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir).await.map_err(io_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(LOG_FILE_SUFFIX));
        if !is_log {
            continue;
        }
        // follows symlinks, unlike DirEntry::file_type
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => debug!("Skipping {}: {e}", path.display()),
        }
    }

    info!("Found {} log files", files.len());
    Ok(files)
}

// ─── Line streaming ──────────────────────────────────────────────

/// Forward-only reader yielding trimmed, non-empty lines of one file.
pub struct LineStream {
    path: PathBuf,
    reader: BufReader<File>,
    buf: Vec<u8>,
}

impl LineStream {
    pub async fn open(path: &Path) -> Result<Self, ReplayError> {
        let file = File::open(path).await.map_err(|source| ReplayError::SourceIo {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            buf: Vec::with_capacity(1024),
        })
    }

    /// `Ok(None)` at end of file.  Bytes that are not UTF-8 are replaced
    /// rather than failing the whole file.
    pub async fn next_line(&mut self) -> Result<Option<String>, ReplayError> {
        loop {
            self.buf.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|source| ReplayError::SourceIo {
                    path: self.path.clone(),
                    source,
                })?;
            if read == 0 {
                return Ok(None);
            }

            let line = String::from_utf8_lossy(&self.buf);
            let line = line.trim();
            if !line.is_empty() {
                return Ok(Some(line.to_owned()));
            }
        }
    }
}

// ─── Ingestion ───────────────────────────────────────────────────

/// Stream one file into the work queue, one rate-limiter token per line.
/// Returns how many lines were admitted.
pub async fn ingest_file(
    path: &Path,
    limiter: &RateLimiter,
    queue: &QueueSender<String>,
    cancel: &CancellationToken,
) -> Result<u64, ReplayError> {
    info!("Playing log file {}", path.display());

    let mut lines = LineStream::open(path).await?;
    let mut admitted = 0u64;
    while let Some(line) = lines.next_line().await? {
        limiter.acquire(cancel).await?;
        debug!("replaying line: {line}");
        queue.push(line, cancel).await?;
        admitted += 1;
    }

    info!("Done with file {} ({admitted} lines)", path.display());
    Ok(admitted)
}

/// What ingestion did across every file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub files_completed: usize,
    pub files_failed: usize,
    pub lines_admitted: u64,
}

/// Ingest every file concurrently.  A file that fails to open or read is
/// reported and skipped; the others carry on.  The queue closes when this
/// returns, since every sender clone is dropped by then.
pub async fn ingest_all(
    files: Vec<PathBuf>,
    limiter: Arc<RateLimiter>,
    queue: QueueSender<String>,
    cancel: CancellationToken,
) -> IngestSummary {
    let mut tasks = JoinSet::new();
    for path in files {
        let limiter = Arc::clone(&limiter);
        let queue = queue.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let result = ingest_file(&path, &limiter, &queue, &cancel).await;
            (path, result)
        });
    }
    drop(queue);

    let mut summary = IngestSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(admitted))) => {
                summary.files_completed += 1;
                summary.lines_admitted += admitted;
            }
            Ok((path, Err(ReplayError::Cancelled))) => {
                info!("Stopped playing {}: cancelled", path.display());
            }
            Ok((path, Err(e))) => {
                error!("Error playing file {}: {e}", path.display());
                summary.files_failed += 1;
            }
            Err(e) => {
                error!("Ingestion task failed: {e}");
                summary.files_failed += 1;
            }
        }
    }
    summary
}
