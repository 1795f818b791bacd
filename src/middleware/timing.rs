use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::debug;

/// Adds `X-Response-Time-Us` to every status-endpoint response and logs the
/// request at debug level.  The SSE stream is only logged when it opens.
pub async fn timing_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let start = Instant::now();
    let mut response = next.run(req).await;
    let us = start.elapsed().as_micros();

    if let Ok(val) = us.to_string().parse() {
        response.headers_mut().insert("x-response-time-us", val);
    }

    debug!(
        "status endpoint: {} {method} {path} in {us}μs",
        response.status().as_u16()
    );

    response
}
