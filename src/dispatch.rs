use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::ReplayError;
use crate::metrics::ReplayStats;
use crate::parser::{self, RequestDescriptor};
use crate::queue::QueueReceiver;
use crate::sender::Sender;

pub const DEFAULT_NUM_SENDERS: usize = 32;

/// What happened to a single line popped off the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Unparsable, or the original status was not 2xx/3xx.
    Discarded,
    /// A send was attempted; success or failure is in the stats.
    Sent,
    /// Cancellation was observed before the send started.
    Skipped,
}

// ─── Public entry point ──────────────────────────────────────────

/// Spawns `num_workers` tasks draining `queue` and waits for all of them.
/// Workers exit once the queue is closed and empty, or on cancellation.
pub async fn run_pool(
    num_workers: usize,
    queue: QueueReceiver<String>,
    sender: Arc<Sender>,
    stats: Arc<ReplayStats>,
    cancel: CancellationToken,
) -> u64 {
    let mut handles = Vec::with_capacity(num_workers);

    for worker_id in 0..num_workers {
        let queue = queue.clone();
        let sender = Arc::clone(&sender);
        let stats = Arc::clone(&stats);
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            worker(worker_id, queue, sender, stats, cancel).await
        }));
    }
    drop(queue);

    let mut handled = 0;
    for h in handles {
        match h.await {
            Ok(count) => handled += count,
            Err(e) => error!("Sender worker crashed: {e}"),
        }
    }
    handled
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(
    id: usize,
    queue: QueueReceiver<String>,
    sender: Arc<Sender>,
    stats: Arc<ReplayStats>,
    cancel: CancellationToken,
) -> u64 {
    let mut handled = 0;
    while let Some(line) = queue.pop(&cancel).await {
        if handle_line(&line, &sender, &stats, &cancel).await != LineOutcome::Skipped {
            handled += 1;
        }
    }
    debug!("Sender {id} done after {handled} lines");
    handled
}

/// Parse, filter and (maybe) send one line.  The send is awaited here, so a
/// worker never has more than one request in flight.
pub async fn handle_line(
    line: &str,
    sender: &Sender,
    stats: &ReplayStats,
    cancel: &CancellationToken,
) -> LineOutcome {
    let descriptor = match replayable(line) {
        Ok(Some(descriptor)) => descriptor,
        Ok(None) => {
            stats.record_discard();
            return LineOutcome::Discarded;
        }
        Err(e) => {
            warn!("{e}");
            stats.record_discard();
            return LineOutcome::Discarded;
        }
    };

    if cancel.is_cancelled() {
        return LineOutcome::Skipped;
    }

    if let Err(e) = sender.send(descriptor).await {
        error!("Error sending: {e}");
    }
    LineOutcome::Sent
}

/// The descriptor for `line` if it should be replayed, `None` when the
/// original request was not answered with a 2xx or 3xx.
fn replayable(line: &str) -> Result<Option<RequestDescriptor>, ReplayError> {
    let descriptor = parser::parse(line)?;
    if descriptor.is_replayable() {
        Ok(Some(descriptor))
    } else {
        debug!("Discarding non 2xx or 3xx line {descriptor:?}");
        Ok(None)
    }
}
