//! A byte stream wrapper that can be rewound to replay already-read bytes
//! without re-fetching from the network.
//!
//! The fetch orchestrator sometimes has to peek at a response (to decide
//! "too large" or "timed out") after having already consumed some bytes
//! making that decision; restarting lets the same logical stream be handed
//! to a different consumer without a second network round trip.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Wraps a consumable byte source, buffering everything read so the stream
/// can be restarted from the beginning.
///
/// Reading at the end of the buffered history pulls fresh bytes from the
/// underlying source and appends them to history: the common case. After
/// [`restart`](RestartableStream::restart), reads are satisfied from history
/// first; fresh reads resume seamlessly once history is exhausted.
pub struct RestartableStream<R> {
    source: Option<R>,
    buf: Vec<u8>,
    // Replay cursor into `buf`. When it equals `buf.len()` the source
    // should be used.
    pos: usize,
}

impl<R: AsyncRead + Unpin> RestartableStream<R> {
    /// Creates a new `RestartableStream` that reads from `source`.
    pub fn new(source: R) -> Self {
        RestartableStream {
            source: Some(source),
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Causes subsequent reads to start from the beginning of the stream
    /// instead of where they left off. History is kept and the source is
    /// untouched.
    pub fn restart(&mut self) {
        self.pos = 0;
    }

    /// Discards the buffered history and drops the underlying source,
    /// closing its connection. Subsequent reads fail.
    pub fn close(&mut self) {
        self.buf = Vec::new();
        self.pos = 0;
        self.source = None;
    }

    /// Number of bytes of buffered history.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for RestartableStream<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        let Some(source) = this.source.as_mut() else {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "restartable stream: closed",
            )));
        };

        if this.pos < this.buf.len() {
            // Reading from buffered history. Partial reads are fine; the
            // caller loops and falls through to fresh reads once history
            // is exhausted.
            let n = out.remaining().min(this.buf.len() - this.pos);
            out.put_slice(&this.buf[this.pos..this.pos + n]);
            this.pos += n;
            return Poll::Ready(Ok(()));
        }

        // At the end of history: read fresh bytes and append them.
        let filled_before = out.filled().len();
        match Pin::new(source).poll_read(cx, out) {
            Poll::Ready(Ok(())) => {
                let fresh = &out.filled()[filled_before..];
                this.buf.extend_from_slice(fresh);
                this.pos = this.buf.len();
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
