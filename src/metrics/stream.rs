use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::{Stream, StreamExt};

use super::collector::{ReplayStats, StatsSnapshot};

/// How often `/api/stats/stream` pushes a snapshot.  Faster than the
/// monitor's status lines, and independent of them: snapshots never drain
/// the interval latency sum.
pub const STREAM_INTERVAL: Duration = Duration::from_millis(500);

/// `GET /api/stats`: the current counters and latency distribution.
pub async fn get_stats(State(stats): State<Arc<ReplayStats>>) -> Json<StatsSnapshot> {
    Json(stats.snapshot())
}

/// `GET /api/stats/stream`: one `stats` event per tick, numbered from 0 so a
/// reader can tell when it missed some.
pub async fn stats_stream(
    State(stats): State<Arc<ReplayStats>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let ticks = IntervalStream::new(tokio::time::interval(STREAM_INTERVAL));

    let mut seq: u64 = 0;
    let events = ticks.map(move |_| {
        let id = seq;
        seq += 1;
        Event::default()
            .event("stats")
            .id(id.to_string())
            .json_data(stats.snapshot())
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
