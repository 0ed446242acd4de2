use std::fmt::{Debug, Display};
use std::string::String;
use std::time::Duration;

use futures::Future;
use log::debug;

use crate::codec::ClientCodec;
use crate::error::{Error, SmtpResult};
use crate::response::parse_response;

#[cfg(feature = "runtime-async-std")]
use async_std::io::{prelude::*, BufReader, Read, ReadExt, Write, WriteExt};
#[cfg(feature = "runtime-tokio")]
use tokio::io::{
    AsyncBufReadExt, AsyncRead as Read, AsyncReadExt, AsyncWrite as Write, AsyncWriteExt, BufReader,
};

/// SMTP stream: line framing, command writing and body streaming on top
/// of a raw transport.
#[derive(Debug)]
pub struct SmtpStream<S: Read + Write + Unpin> {
    /// Inner stream.
    inner: BufReader<S>,
    /// Connection id used to tag wire traces.
    id: String,
    /// Idle limit applied to every response read.
    timeout: Option<Duration>,
}

impl<S: Read + Write + Unpin> SmtpStream<S> {
    /// Creates new SMTP stream.
    pub fn new(stream: S, id: String) -> Self {
        Self {
            inner: BufReader::new(stream),
            id,
            timeout: None,
        }
    }

    /// Returns inner stream.
    ///
    /// Should only be used when there are no unread responses,
    /// because the buffer of `BufReader` may be lost.
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }

    /// Sets the idle limit for response reads.
    pub fn set_timeout(&mut self, duration: Option<Duration>) {
        self.timeout = duration;
    }

    /// Send the given SMTP command to the server and read one response.
    pub async fn command(&mut self, command: impl Display) -> SmtpResult {
        self.send_command(command).await?;
        self.read_response().await
    }

    /// Sends the given SMTP command to the server without waiting for response.
    pub async fn send_command(&mut self, command: impl Display) -> Result<(), Error> {
        self.write(command.to_string().as_bytes()).await?;
        Ok(())
    }

    /// Writes the given data to the server.
    async fn write(&mut self, string: &[u8]) -> Result<(), Error> {
        self.inner.get_mut().write_all(string).await?;
        self.inner.get_mut().flush().await?;

        debug!(
            "{} >> {}",
            self.id,
            escape_crlf(String::from_utf8_lossy(string).as_ref())
        );
        Ok(())
    }

    /// Read one logical response, bounded by the configured idle limit.
    pub async fn read_response(&mut self) -> SmtpResult {
        let timeout = self.timeout;
        self.read_response_with_timeout(timeout.as_ref()).await
    }

    /// Read one logical response with an explicit time limit.
    pub async fn read_response_with_timeout(&mut self, timeout: Option<&Duration>) -> SmtpResult {
        let id = self.id.clone();
        let reader = &mut self.inner;
        with_timeout(timeout, read_one_response(&id, reader)).await
    }

    /// Sends the message content through the transparency codec, without
    /// closing the transport, and returns the number of encoded bytes
    /// put on the wire.
    pub async fn message<T: Read + Unpin>(&mut self, message: T) -> Result<u64, Error> {
        let mut codec = ClientCodec::new();

        let mut message_reader = BufReader::new(message);

        let mut message_bytes = Vec::new();
        message_reader
            .read_to_end(&mut message_bytes)
            .await
            .map_err(Error::Stream)?;

        if message_bytes.is_empty() {
            return Err(Error::EmptyMessage);
        }

        codec.encode(&message_bytes, self.inner.get_mut()).await?;
        codec.finish(self.inner.get_mut()).await?;
        self.inner.get_mut().flush().await?;

        debug!(
            "{} >> [{} message bytes, {} on the wire]",
            self.id,
            codec.in_byte_count(),
            codec.out_byte_count()
        );
        Ok(codec.out_byte_count())
    }
}

/// Read an SMTP response from the wire.
///
/// Multi-line replies are coalesced into one `Response`; empty keepalive
/// lines between replies are skipped without consuming anything else.
async fn read_one_response<S: Read + Write + Unpin>(
    id: &str,
    reader: &mut BufReader<S>,
) -> SmtpResult {
    let mut buffer = String::with_capacity(100);

    loop {
        let read = reader.read_line(&mut buffer).await?;
        if read == 0 {
            break;
        }
        debug!("{} << {}", id, escape_crlf(&buffer));
        if buffer.trim().is_empty() {
            buffer.clear();
            continue;
        }
        match parse_response(&buffer) {
            Ok((_remaining, response)) => {
                return Ok(response);
            }
            Err(nom::Err::Failure(e)) => {
                return Err(Error::Parsing(e.code));
            }
            Err(nom::Err::Incomplete(_)) => { /* read more */ }
            Err(nom::Err::Error(e)) => {
                return Err(Error::Parsing(e.code));
            }
        }
    }

    Err(Error::Connection("Connection closed unexpectedly"))
}

/// Execute io operations with an optional timeout.
pub(crate) async fn with_timeout<T, F>(
    timeout: Option<&Duration>,
    f: F,
) -> std::result::Result<T, Error>
where
    F: Future<Output = std::result::Result<T, Error>>,
{
    if let Some(timeout) = timeout {
        #[cfg(feature = "runtime-tokio")]
        let res = tokio::time::timeout(*timeout, f).await??;
        #[cfg(feature = "runtime-async-std")]
        let res = async_std::future::timeout(*timeout, f).await??;
        Ok(res)
    } else {
        f.await
    }
}

/// Returns the string replacing all the CRLF with "\<CRLF\>"
/// Used for debug displays
fn escape_crlf(string: &str) -> String {
    string.replace("\r\n", "<CRLF>")
}

#[cfg(test)]
mod test {
    use super::{escape_crlf, SmtpStream};
    use crate::async_test;
    use crate::mock::MockStream;

    #[test]
    fn test_escape_crlf() {
        assert_eq!(escape_crlf("\r\n"), "<CRLF>");
        assert_eq!(escape_crlf("EHLO my_name\r\n"), "EHLO my_name<CRLF>");
        assert_eq!(
            escape_crlf("EHLO my_name\r\nSIZE 42\r\n"),
            "EHLO my_name<CRLF>SIZE 42<CRLF>"
        );
    }

    async_test! { test_read_multiline_response, {
        let mock = MockStream::with_vec(b"250-x.test\r\n250-PIPELINING\r\n250 HELP\r\n".to_vec());
        let mut stream = SmtpStream::new(mock, "test".to_string());
        let response = stream.read_response().await.unwrap();
        assert!(response.has_code(250));
        assert_eq!(response.message.len(), 3);
        // the final line of a coalesced reply carries no continuation marker
        assert_eq!(response.message.last().map(String::as_str), Some("HELP"));
    }}

    async_test! { test_read_skips_keepalive_lines, {
        let mock = MockStream::with_vec(b"\r\n\r\n220 ready\r\n".to_vec());
        let mut stream = SmtpStream::new(mock, "test".to_string());
        let response = stream.read_response().await.unwrap();
        assert!(response.has_code(220));
    }}

    async_test! { test_eof_is_unexpected_close, {
        let mock = MockStream::with_vec(b"".to_vec());
        let mut stream = SmtpStream::new(mock, "test".to_string());
        let err = stream.read_response().await.unwrap_err();
        assert_eq!(
            err.code(),
            Some(crate::error::ErrorCode::Connection)
        );
    }}

    async_test! { test_message_encoding_and_count, {
        let mock = MockStream::new();
        let mut stream = SmtpStream::new(mock, "test".to_string());
        let written = stream.message(&b"hi\n.dot"[..]).await.unwrap();
        let out = stream.into_inner().take_vec();
        assert_eq!(out, b"hi\r\n..dot\r\n.\r\n".to_vec());
        assert_eq!(written, out.len() as u64);
    }}

    async_test! { test_empty_message_is_rejected, {
        let mock = MockStream::new();
        let mut stream = SmtpStream::new(mock, "test".to_string());
        let err = stream.message(&b""[..]).await.unwrap_err();
        assert_eq!(err.code(), Some(crate::error::ErrorCode::Message));
    }}
}
