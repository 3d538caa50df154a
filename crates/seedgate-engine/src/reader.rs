//! Seekable file reader that pends until the covering piece is verified.

use std::future::Future;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tokio::sync::watch;

use seedgate_core::ReadaheadFn;

use crate::engine::{Demand, Shared};

type WaitFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Reader over one file; exposes `(current_pos, contiguous_read_start_pos)`
/// to the read-ahead policy and publishes its demand window to the fetcher.
pub(crate) struct PieceWaitReader {
    shared: Arc<Shared>,
    stream_id: u64,
    file_start: u64,
    file_len: u64,
    pos: u64,
    contiguous_start: u64,
    readahead: Option<ReadaheadFn>,
    default_window: u64,
    completion_rx: watch::Receiver<u64>,
    wait: Option<WaitFuture>,
}

impl PieceWaitReader {
    pub(crate) fn new(
        shared: Arc<Shared>,
        stream_id: u64,
        file_start: u64,
        file_len: u64,
        readahead: Option<ReadaheadFn>,
        default_window: u64,
    ) -> Self {
        let completion_rx = shared.completion_tx.subscribe();
        let reader = Self {
            shared,
            stream_id,
            file_start,
            file_len,
            pos: 0,
            contiguous_start: 0,
            readahead,
            default_window,
            completion_rx,
            wait: None,
        };
        reader.publish_demand();
        reader
    }

    fn window(&self) -> u64 {
        match &self.readahead {
            Some(policy) => policy(self.pos, self.contiguous_start).max(1),
            None => self.default_window,
        }
    }

    fn publish_demand(&self) {
        self.shared.set_demand(
            self.stream_id,
            Demand {
                position: self.file_start + self.pos,
                window: self.window().min(self.file_len.saturating_sub(self.pos)),
            },
        );
    }
}

impl AsyncRead for PieceWaitReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if self.pos >= self.file_len || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }
            let piece_length = self.shared.descriptor.piece_length();
            let global = self.file_start + self.pos;
            let piece = u32::try_from(global / piece_length)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "piece overflow"))?;

            if !self.shared.storage.piece_complete(piece) {
                self.publish_demand();
                if self.wait.is_none() {
                    let shared = Arc::clone(&self.shared);
                    let mut rx = self.completion_rx.clone();
                    // The fetcher signals every completion; the fallback poll
                    // covers pieces completed out-of-band (restored state,
                    // direct writes).
                    self.wait = Some(Box::pin(async move {
                        loop {
                            if shared.storage.piece_complete(piece) {
                                return;
                            }
                            tokio::select! {
                                _ = rx.changed() => {}
                                () = tokio::time::sleep(std::time::Duration::from_millis(250)) => {}
                            }
                        }
                    }));
                }
                let Some(wait) = self.wait.as_mut() else {
                    unreachable!("wait future installed above");
                };
                match wait.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(()) => {
                        self.wait = None;
                        continue;
                    }
                }
            }

            let within = global % piece_length;
            let piece_remaining = piece_length - within;
            let file_remaining = self.file_len - self.pos;
            let want = (buf.remaining() as u64)
                .min(piece_remaining)
                .min(file_remaining) as usize;
            let mut scratch = vec![0u8; want];
            let read = self.shared.storage.read_piece(piece, within, &mut scratch)?;
            buf.put_slice(&scratch[..read]);
            self.pos += read as u64;
            self.publish_demand();
            return Poll::Ready(Ok(()));
        }
    }
}

impl AsyncSeek for PieceWaitReader {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let next = match position {
            SeekFrom::Start(offset) => i64::try_from(offset).unwrap_or(i64::MAX),
            SeekFrom::End(offset) => i64::try_from(self.file_len).unwrap_or(i64::MAX) + offset,
            SeekFrom::Current(offset) => i64::try_from(self.pos).unwrap_or(i64::MAX) + offset,
        };
        if next < 0 || next > i64::try_from(self.file_len).unwrap_or(i64::MAX) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek out of range",
            ));
        }
        self.pos = next as u64;
        self.contiguous_start = self.pos;
        self.wait = None;
        self.publish_demand();
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.pos))
    }
}

impl Drop for PieceWaitReader {
    fn drop(&mut self) {
        self.shared.clear_demand(self.stream_id);
    }
}
