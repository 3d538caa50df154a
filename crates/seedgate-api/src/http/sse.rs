//! Server-sent stat streams: `statupdate` events carrying frame diffs and a
//! periodic `ping` keeping intermediaries from closing the connection.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_stream::stream;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_core::Stream;
use futures_util::StreamExt;
use tracing::{error, warn};

use seedgate_core::InfoHash;
use seedgate_session::StatStatus;

use crate::state::ApiState;

/// Keepalive ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(10);

/// SSE stream of stat diffs for `(hash, path)`.
pub(crate) fn stat_events(
    state: &Arc<ApiState>,
    hash: InfoHash,
    path: Option<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames = state.stat.stream(hash, path, state.shutdown.clone());
    let events = stream! {
        let mut frames = Box::pin(frames);
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + PING_INTERVAL,
            PING_INTERVAL,
        );
        let mut id: u64 = 0;
        loop {
            tokio::select! {
                _ = ping.tick() => {
                    let now = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs();
                    yield Ok(Event::default()
                        .id(id.to_string())
                        .event("ping")
                        .data(now.to_string()));
                    id += 1;
                }
                frame = frames.next() => match frame {
                    Some(Ok(frame)) => {
                        let terminated = frame.status == StatStatus::Terminated;
                        match serde_json::to_string(&frame) {
                            Ok(payload) => {
                                yield Ok(Event::default()
                                    .id(id.to_string())
                                    .event("statupdate")
                                    .data(payload));
                                id += 1;
                            }
                            Err(err) => {
                                error!(error = %err, "failed to serialise stat frame");
                                break;
                            }
                        }
                        if terminated {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(info_hash = %hash, error = %err, "stat stream failed");
                        break;
                    }
                    None => break,
                }
            }
        }
    };
    Sse::new(events).keep_alive(KeepAlive::new().interval(PING_INTERVAL))
}
