//! The webseed fetch loop: reader-prioritized piece selection, HTTP range
//! requests per overlapped file, hash verification, completion recording.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use leaky_bucket::RateLimiter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use seedgate_core::{Error, PieceHash, Result};

use crate::engine::Shared;

/// Back-off after a failed piece fetch.
const RETRY_DELAY: Duration = Duration::from_secs(1);

pub(crate) async fn run(
    shared: Arc<Shared>,
    client: reqwest::Client,
    limiter: Option<(Arc<RateLimiter>, usize)>,
    url: String,
    closed: CancellationToken,
) {
    let base = if url.ends_with('/') {
        url
    } else {
        format!("{url}/")
    };
    loop {
        if closed.is_cancelled() {
            break;
        }
        let Some(piece) = next_piece(&shared) else {
            debug!(info_hash = %shared.descriptor.info_hash(), "webseed fetch finished");
            break;
        };
        match fetch_piece(&shared, &client, limiter.as_ref(), &base, piece).await {
            Ok(()) => {
                shared.notify_piece();
            }
            Err(err) => {
                warn!(
                    info_hash = %shared.descriptor.info_hash(),
                    piece,
                    error = %err,
                    "webseed piece fetch failed"
                );
                tokio::select! {
                    () = tokio::time::sleep(RETRY_DELAY) => {}
                    () = closed.cancelled() => break,
                }
            }
        }
    }
    shared.fetching.store(false, Ordering::Relaxed);
    // Wake any reader waiting on stats/state changes.
    shared.completion_tx.send_modify(|_| {});
}

/// Pick the next piece to fetch: the first incomplete piece inside a
/// reader's demand window (streams served in position order), else the first
/// incomplete piece overall.
fn next_piece(shared: &Shared) -> Option<u32> {
    let descriptor = &shared.descriptor;
    let piece_length = descriptor.piece_length();
    let num_pieces = descriptor.num_pieces();

    for demand in shared.demand_snapshot() {
        let first = (demand.position / piece_length) as u32;
        let end_byte = demand.position.saturating_add(demand.window);
        let last = (end_byte.div_ceil(piece_length) as u32).min(num_pieces);
        for piece in first..last {
            if !shared.storage.piece_complete(piece) {
                return Some(piece);
            }
        }
    }
    (0..num_pieces).find(|&piece| !shared.storage.piece_complete(piece))
}

async fn fetch_piece(
    shared: &Shared,
    client: &reqwest::Client,
    limiter: Option<&(Arc<RateLimiter>, usize)>,
    base: &str,
    piece: u32,
) -> Result<()> {
    let descriptor = &shared.descriptor;
    let extent = descriptor
        .piece_extent(piece)
        .ok_or_else(|| Error::fatal(format!("no extent for piece {piece}")))?;

    if let Some((limiter, capacity)) = limiter {
        let mut remaining = extent.length as usize;
        while remaining > 0 {
            let chunk = remaining.min(*capacity);
            limiter.acquire(chunk).await;
            remaining -= chunk;
        }
    }

    let mut buf = vec![0u8; extent.length as usize];
    let piece_start = extent.offset;
    let piece_end = extent.offset + extent.length;
    for file in descriptor.files() {
        if file.length == 0 {
            continue;
        }
        let file_start = file.offset;
        let file_end = file.offset + file.length;
        if file_end <= piece_start || file_start >= piece_end {
            continue;
        }
        let from = piece_start.max(file_start);
        let to = piece_end.min(file_end);
        let within_file = from - file_start;
        let span = to - from;

        let url = format!("{base}{}", file.path);
        let response = client
            .get(&url)
            .header(
                "Range",
                format!("bytes={within_file}-{}", within_file + span - 1),
            )
            .send()
            .await
            .map_err(|err| Error::transient(format!("webseed GET {url}: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::transient(format!(
                "webseed GET {url} returned {status}"
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| Error::transient(format!("webseed body {url}: {err}")))?;
        // A server that ignores Range answers 200 with the whole file.
        let slice: &[u8] = if status == reqwest::StatusCode::PARTIAL_CONTENT {
            &body
        } else {
            let start = usize::try_from(within_file)
                .map_err(|_| Error::transient("offset overflow"))?;
            let end = start + span as usize;
            body.get(start..end)
                .ok_or_else(|| Error::transient(format!("webseed body too short from {url}")))?
        };
        if slice.len() != span as usize {
            return Err(Error::transient(format!(
                "webseed returned {} bytes, wanted {span}, from {url}",
                slice.len()
            )));
        }
        let dst = (from - piece_start) as usize;
        buf[dst..dst + span as usize].copy_from_slice(slice);
    }

    let expected = descriptor
        .piece_hash(piece)
        .ok_or_else(|| Error::fatal(format!("no declared hash for piece {piece}")))?;
    if &PieceHash::digest(&buf) != expected {
        return Err(Error::integrity(format!(
            "piece {piece} failed hash verification"
        )));
    }

    let written = shared
        .storage
        .write_piece(piece, 0, &buf)
        .map_err(|err| Error::io("write piece", err))?;
    if written != buf.len() {
        return Err(Error::integrity(format!(
            "short piece write: {written} of {}",
            buf.len()
        )));
    }
    shared.storage.mark_complete(piece)?;
    debug!(piece, "piece fetched and verified");
    Ok(())
}
