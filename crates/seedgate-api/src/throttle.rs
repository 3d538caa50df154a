//! Token-bucket throttled reader.

use std::future::Future;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use leaky_bucket::{AcquireOwned, RateLimiter};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use seedgate_core::FileReader;

/// Largest chunk read from the inner reader between token acquisitions.
const CHUNK: usize = 16 * 1024;

enum State {
    Idle,
    /// Bytes read from the inner reader, waiting for tokens to cover them.
    Acquiring {
        data: Vec<u8>,
        acquire: Pin<Box<AcquireOwned>>,
    },
    /// Tokens granted; bytes not yet handed to the caller.
    Draining {
        data: Vec<u8>,
        offset: usize,
    },
}

/// Reader delivering at most `rate` bytes per second (plus the bucket's
/// burst capacity), by acquiring one token per byte after each inner read.
pub struct ThrottledReader {
    inner: Box<dyn FileReader>,
    bucket: Arc<RateLimiter>,
    state: State,
}

impl ThrottledReader {
    /// Wrap `inner` with the given bucket.
    #[must_use]
    pub fn new(inner: Box<dyn FileReader>, bucket: Arc<RateLimiter>) -> Self {
        Self {
            inner,
            bucket,
            state: State::Idle,
        }
    }
}

impl AsyncRead for ThrottledReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        loop {
            match &mut this.state {
                State::Idle => {
                    let want = buf.remaining().min(CHUNK);
                    if want == 0 {
                        return Poll::Ready(Ok(()));
                    }
                    let mut scratch = vec![0u8; want];
                    let mut scratch_buf = ReadBuf::new(&mut scratch);
                    match Pin::new(&mut this.inner).poll_read(cx, &mut scratch_buf) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                        Poll::Ready(Ok(())) => {
                            let filled = scratch_buf.filled().len();
                            if filled == 0 {
                                return Poll::Ready(Ok(()));
                            }
                            scratch.truncate(filled);
                            let acquire =
                                Box::pin(Arc::clone(&this.bucket).acquire_owned(filled));
                            this.state = State::Acquiring {
                                data: scratch,
                                acquire,
                            };
                        }
                    }
                }
                State::Acquiring { data, acquire } => match acquire.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(()) => {
                        let data = std::mem::take(data);
                        this.state = State::Draining { data, offset: 0 };
                    }
                },
                State::Draining { data, offset } => {
                    let take = (data.len() - *offset).min(buf.remaining());
                    buf.put_slice(&data[*offset..*offset + take]);
                    *offset += take;
                    if *offset == data.len() {
                        this.state = State::Idle;
                    }
                    return Poll::Ready(Ok(()));
                }
            }
        }
    }
}

impl AsyncSeek for ThrottledReader {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        // Seeking discards buffered bytes; their tokens are forfeit.
        self.state = State::Idle;
        Pin::new(&mut self.inner).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.inner).poll_complete(cx)
    }
}
