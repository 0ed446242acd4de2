//! Scripted in-memory stream for exercising the engine without a server

#![allow(missing_docs)]

use std::pin::Pin;
use std::task::{Context, Poll};

#[cfg(feature = "runtime-async-std")]
use async_std::io::{Cursor, Read, Write};
#[cfg(feature = "runtime-tokio")]
use std::io::Cursor;
#[cfg(feature = "runtime-tokio")]
use tokio::io::{AsyncRead as Read, AsyncWrite as Write};

use futures::io;
use pin_project::pin_project;

pub type MockCursor = Cursor<Vec<u8>>;

/// Plays back a pre-scripted server conversation and records everything
/// the client writes.
///
/// Reads are served one byte at a time. A buffered reader therefore
/// never holds bytes past the reply it is framing, so a scripted
/// session stays exact across a mid-stream transport rebind, and every
/// test doubles as a check that framing is independent of read chunking.
#[pin_project]
#[derive(Clone, Debug)]
pub struct MockStream {
    #[pin]
    reader: MockCursor,
    #[pin]
    writer: MockCursor,
}

impl Default for MockStream {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStream {
    pub fn new() -> MockStream {
        MockStream {
            reader: MockCursor::new(Vec::new()),
            writer: MockCursor::new(Vec::new()),
        }
    }

    /// Creates a stream whose reads replay `vec`.
    pub fn with_vec(vec: Vec<u8>) -> MockStream {
        MockStream {
            reader: MockCursor::new(vec),
            writer: MockCursor::new(Vec::new()),
        }
    }

    /// Returns and clears everything written so far.
    pub fn take_vec(&mut self) -> Vec<u8> {
        let vec = self.writer.get_ref().to_vec();
        self.writer.set_position(0);
        self.writer.get_mut().clear();
        vec
    }

    /// Replaces the remaining script with `vec`.
    pub fn next_vec(&mut self, vec: &[u8]) {
        let cursor = &mut self.reader;
        cursor.set_position(0);
        cursor.get_mut().clear();
        cursor.get_mut().extend_from_slice(vec);
    }
}

#[cfg(feature = "runtime-tokio")]
impl Read for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let _: Pin<&mut _> = this.reader;
        let mut byte = [0u8; 1];
        let mut one = tokio::io::ReadBuf::new(&mut byte);
        match this.reader.poll_read(cx, &mut one) {
            Poll::Ready(Ok(())) => {
                buf.put_slice(one.filled());
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(feature = "runtime-tokio")]
impl Write for MockStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.project();
        let _: Pin<&mut _> = this.writer;
        this.writer.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        let this = self.project();
        let _: Pin<&mut _> = this.writer;
        this.writer.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        let this = self.project();
        let _: Pin<&mut _> = this.writer;
        this.writer.poll_shutdown(cx)
    }
}

#[cfg(feature = "runtime-async-std")]
impl Read for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let _: Pin<&mut _> = this.reader;
        let limit = buf.len().min(1);
        this.reader.poll_read(cx, &mut buf[..limit])
    }
}

#[cfg(feature = "runtime-async-std")]
impl Write for MockStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.project();
        let _: Pin<&mut _> = this.writer;
        this.writer.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        let this = self.project();
        let _: Pin<&mut _> = this.writer;
        this.writer.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        let this = self.project();
        let _: Pin<&mut _> = this.writer;
        this.writer.poll_close(cx)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::async_test;
    #[cfg(feature = "runtime-async-std")]
    use async_std::io::{ReadExt, WriteExt};
    #[cfg(feature = "runtime-tokio")]
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async_test! { write_take_test, {
        let mut mock = MockStream::new();
        mock.write_all(&[1, 2, 3]).await.unwrap();
        assert_eq!(mock.take_vec(), vec![1, 2, 3]);
    }}

    async_test! { read_with_vec_test, {
        let mut mock = MockStream::with_vec(vec![4, 5]);
        let mut vec = Vec::new();
        mock.read_to_end(&mut vec).await.unwrap();
        assert_eq!(vec, vec![4, 5]);
    }}
}
