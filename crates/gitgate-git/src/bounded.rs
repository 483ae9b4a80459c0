//! Request body reader bounded by a declared length.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Reads at most `limit` bytes from the inner reader.
///
/// Once the limit is reached every read reports end of stream without
/// polling the inner reader again, so a transport that keeps the connection
/// open after the body cannot stall the consumer. An inner stream that ends
/// before the limit is an `UnexpectedEof` error.
#[derive(Debug)]
pub struct BoundedReader<R> {
    inner: R,
    limit: u64,
    remaining: u64,
}

impl<R> BoundedReader<R> {
    /// Wraps `inner`, allowing `limit` bytes through.
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            remaining: limit,
        }
    }

    /// Bytes read so far.
    pub fn consumed(&self) -> u64 {
        self.limit - self.remaining
    }

    /// Bytes still allowed through.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for BoundedReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.remaining == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let max = self.remaining.min(buf.remaining() as u64) as usize;
        let n = {
            let mut window = ReadBuf::new(buf.initialize_unfilled_to(max));
            ready!(Pin::new(&mut self.inner).poll_read(cx, &mut window))?;
            window.filled().len()
        };

        if n == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "request body ended after {} of {} declared bytes",
                    self.consumed(),
                    self.limit
                ),
            )));
        }

        buf.advance(n);
        self.remaining -= n as u64;
        Poll::Ready(Ok(()))
    }
}
