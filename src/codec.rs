#[cfg(feature = "runtime-async-std")]
use async_std::io::{Write, WriteExt};
#[cfg(feature = "runtime-tokio")]
use tokio::io::{AsyncWrite as Write, AsyncWriteExt};

use futures::io;

/// The codec used for DATA transparency.
///
/// Normalizes bare CR and bare LF to CRLF, doubles a `.` at the start of
/// a line, and terminates the stream with `<CRLF>.<CRLF>`. Input and
/// output byte totals are tracked across chunks.
#[derive(Clone, Copy, Debug)]
pub struct ClientCodec {
    at_line_start: bool,
    pending_lf: bool,
    in_bytes: u64,
    out_bytes: u64,
}

impl Default for ClientCodec {
    fn default() -> Self {
        ClientCodec::new()
    }
}

impl ClientCodec {
    /// Creates a new client codec
    pub fn new() -> Self {
        ClientCodec {
            at_line_start: true,
            pending_lf: false,
            in_bytes: 0,
            out_bytes: 0,
        }
    }

    /// Total message bytes accepted so far
    pub fn in_byte_count(&self) -> u64 {
        self.in_bytes
    }

    /// Total encoded bytes emitted so far, terminator included
    pub fn out_byte_count(&self) -> u64 {
        self.out_bytes
    }

    /// Adds transparency to one chunk of message bytes.
    ///
    /// Chunk boundaries carry no meaning: feeding the same bytes in any
    /// split produces the same output.
    pub async fn encode<W: Write + Unpin>(&mut self, frame: &[u8], buf: &mut W) -> io::Result<()> {
        self.in_bytes += frame.len() as u64;

        let mut encoded = Vec::with_capacity(frame.len() + 2);
        for &byte in frame {
            match byte {
                b'\r' => {
                    encoded.extend_from_slice(b"\r\n");
                    self.at_line_start = true;
                    self.pending_lf = true;
                }
                b'\n' => {
                    if self.pending_lf {
                        // second half of a CRLF that was already emitted
                        self.pending_lf = false;
                    } else {
                        encoded.extend_from_slice(b"\r\n");
                        self.at_line_start = true;
                    }
                }
                _ => {
                    self.pending_lf = false;
                    if self.at_line_start && byte == b'.' {
                        encoded.push(b'.');
                    }
                    encoded.push(byte);
                    self.at_line_start = false;
                }
            }
        }

        self.out_bytes += encoded.len() as u64;
        buf.write_all(&encoded).await?;
        Ok(())
    }

    /// Ends the data stream.
    ///
    /// Emits the terminating dot on its own line, completing the current
    /// line first if the message did not end with one.
    pub async fn finish<W: Write + Unpin>(&mut self, buf: &mut W) -> io::Result<()> {
        let terminator: &[u8] = if self.at_line_start {
            b".\r\n"
        } else {
            b"\r\n.\r\n"
        };
        self.out_bytes += terminator.len() as u64;
        buf.write_all(terminator).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::async_test;

    async fn encode_all(chunks: &[&[u8]]) -> (String, ClientCodec) {
        let mut codec = ClientCodec::new();
        let mut buf: Vec<u8> = vec![];
        for chunk in chunks {
            codec.encode(chunk, &mut buf).await.unwrap();
        }
        codec.finish(&mut buf).await.unwrap();
        (String::from_utf8(buf).unwrap(), codec)
    }

    async_test! { test_dot_stuffing, {
        let (out, _) = encode_all(&[b"test\r\n.\r\n.almost"]).await;
        assert_eq!(out, "test\r\n..\r\n..almost\r\n.\r\n");

        let (out, _) = encode_all(&[b".leading"]).await;
        assert_eq!(out, "..leading\r\n.\r\n");
    }}

    async_test! { test_newline_normalization, {
        let (out, _) = encode_all(&[b"a\nb\rc\r\nd"]).await;
        assert_eq!(out, "a\r\nb\r\nc\r\nd\r\n.\r\n");
    }}

    async_test! { test_terminator_after_complete_line, {
        let (out, _) = encode_all(&[b"line\r\n"]).await;
        assert_eq!(out, "line\r\n.\r\n");
    }}

    async_test! { test_chunking_invariance, {
        let message = b"te\r\n.\r\nst\n.dot\rtail";
        let (whole, _) = encode_all(&[message.as_ref()]).await;
        let split: Vec<&[u8]> = message.iter().map(std::slice::from_ref).collect();
        let (bytewise, _) = encode_all(&split).await;
        assert_eq!(whole, bytewise);
    }}

    async_test! { test_byte_counts, {
        let (out, codec) = encode_all(&[b"ab\n", b".cd"]).await;
        assert_eq!(codec.in_byte_count(), 6);
        assert_eq!(codec.out_byte_count(), out.len() as u64);
        assert_eq!(out, "ab\r\n..cd\r\n.\r\n");
    }}
}
