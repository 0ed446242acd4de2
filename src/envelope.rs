//! Envelope and message body types

use std::fmt::{self, Display, Formatter};
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

#[cfg(feature = "runtime-async-std")]
use async_std::io::{Cursor, Read};
use futures::io;
use pin_project::pin_project;
#[cfg(feature = "runtime-tokio")]
use std::io::Cursor;
#[cfg(feature = "runtime-tokio")]
use tokio::io::AsyncRead as Read;

use crate::error::Error;

/// Email address
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Creates a new email address, checking that it does not contain
    /// characters that could break out of the SMTP command syntax.
    ///
    /// Non-ASCII addresses are accepted; sending them requires the
    /// server to advertise SMTPUTF8. Actual mailbox validation is left
    /// to the server.
    pub fn new(address: String) -> Result<EmailAddress, Error> {
        if address.chars().any(|c| {
            c.is_ascii_control() || c.is_ascii_whitespace() || c == '<' || c == '>'
        }) {
            return Err(Error::InvalidAddress);
        }

        Ok(EmailAddress(address))
    }

    /// Tells whether the address fits in 7-bit ASCII
    pub fn is_ascii(&self) -> bool {
        self.0.is_ascii()
    }
}

impl FromStr for EmailAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmailAddress::new(s.to_string())
    }
}

impl Display for EmailAddress {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// `RET` value of the DSN extension: how much of the message to return
/// in a bounce
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum DsnReturn {
    /// Return the full message
    Full,
    /// Return the headers only
    Headers,
}

impl Display for DsnReturn {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match self {
            DsnReturn::Full => "FULL",
            DsnReturn::Headers => "HDRS",
        })
    }
}

/// `NOTIFY` value of the DSN extension: which delivery outcomes produce
/// a notification. `Never` excludes every other event.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum DsnNotify {
    /// Suppress all notifications
    Never,
    /// Notify on the selected events
    Events {
        /// Notify on successful delivery
        success: bool,
        /// Notify on delivery failure
        failure: bool,
        /// Notify on delayed delivery
        delay: bool,
    },
}

impl DsnNotify {
    /// An `Events` value selecting nothing cannot be rendered
    pub fn is_empty(&self) -> bool {
        match self {
            DsnNotify::Never => false,
            DsnNotify::Events {
                success,
                failure,
                delay,
            } => !success && !failure && !delay,
        }
    }
}

impl Display for DsnNotify {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DsnNotify::Never => f.write_str("NEVER"),
            DsnNotify::Events {
                success,
                failure,
                delay,
            } => {
                let events = [
                    ("SUCCESS", *success),
                    ("FAILURE", *failure),
                    ("DELAY", *delay),
                ];
                let mut first = true;
                for (name, selected) in events.iter() {
                    if *selected {
                        if !first {
                            f.write_str(",")?;
                        }
                        f.write_str(name)?;
                        first = false;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Delivery status notification parameters (RFC 3461)
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct Dsn {
    /// How much of the original message bounces should carry
    pub ret: Option<DsnReturn>,
    /// Envelope identifier echoed in notifications
    pub envid: Option<String>,
    /// Which delivery events trigger a notification
    pub notify: Option<DsnNotify>,
    /// Original recipient address, rendered as `rfc822;<address>`
    pub orcpt: Option<String>,
}

/// Simple email envelope representation
///
/// We only accept mailboxes, and do not support source routes (as per RFC).
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Envelope {
    /// The envelope recipients' addresses
    ///
    /// This can not be empty.
    forward_path: Vec<EmailAddress>,
    /// The envelope sender address
    reverse_path: Option<EmailAddress>,
    /// Declared message size for the SIZE extension
    size: Option<u64>,
    /// Ask for BODY=8BITMIME
    eight_bit_mime: bool,
    /// Delivery status notification parameters
    dsn: Option<Dsn>,
}

impl Envelope {
    /// Creates a new envelope, which may fail if `to` is empty.
    pub fn new(from: Option<EmailAddress>, to: Vec<EmailAddress>) -> Result<Envelope, Error> {
        if to.is_empty() {
            return Err(Error::NoRecipients);
        }
        Ok(Envelope {
            forward_path: to,
            reverse_path: from,
            size: None,
            eight_bit_mime: false,
            dsn: None,
        })
    }

    /// Declares the message size ahead of transfer
    pub fn size(self, size: u64) -> Envelope {
        Envelope {
            size: Some(size),
            ..self
        }
    }

    /// Requests an 8-bit clean transfer when the server supports it
    pub fn eight_bit_mime(self, enabled: bool) -> Envelope {
        Envelope {
            eight_bit_mime: enabled,
            ..self
        }
    }

    /// Attaches delivery status notification parameters
    pub fn dsn(self, dsn: Dsn) -> Envelope {
        Envelope {
            dsn: Some(dsn),
            ..self
        }
    }

    /// Destination addresses of the envelope
    pub fn to(&self) -> &[EmailAddress] {
        self.forward_path.as_slice()
    }

    /// Source address of the envelope
    pub fn from(&self) -> Option<&EmailAddress> {
        self.reverse_path.as_ref()
    }

    /// Declared message size, if any
    pub fn declared_size(&self) -> Option<u64> {
        self.size
    }

    /// Whether BODY=8BITMIME was requested
    pub fn wants_eight_bit_mime(&self) -> bool {
        self.eight_bit_mime
    }

    /// Delivery status notification parameters, if any
    pub fn dsn_params(&self) -> Option<&Dsn> {
        self.dsn.as_ref()
    }

    /// Whether any envelope address needs SMTPUTF8 to go on the wire
    pub fn needs_smtputf8(&self) -> bool {
        self.reverse_path
            .iter()
            .chain(self.forward_path.iter())
            .any(|addr| !addr.is_ascii())
    }
}

/// Message buffer for sending.
#[pin_project(project = MessageProj)]
#[allow(missing_debug_implementations)]
pub enum Message {
    /// Message constructed from a reader.
    Reader(#[pin] Box<dyn Read + Send + Sync>),
    /// Message constructed from a byte vector.
    Bytes(#[pin] Cursor<Vec<u8>>),
}

impl Message {
    /// Creates a message body out of a byte buffer.
    pub fn from_bytes(message: impl Into<Vec<u8>>) -> Message {
        Message::Bytes(Cursor::new(message.into()))
    }

    /// Creates a message body out of a byte reader.
    pub fn from_reader(message: Box<dyn Read + Send + Sync>) -> Message {
        Message::Reader(message)
    }
}

#[cfg(feature = "runtime-tokio")]
impl Read for Message {
    #[allow(unsafe_code)]
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            MessageProj::Reader(mut rdr) => {
                // Probably safe..
                let r: Pin<&mut _> = unsafe { Pin::new_unchecked(&mut **rdr) };
                r.poll_read(cx, buf)
            }
            MessageProj::Bytes(rdr) => {
                let _: Pin<&mut _> = rdr;
                rdr.poll_read(cx, buf)
            }
        }
    }
}

#[cfg(feature = "runtime-async-std")]
impl Read for Message {
    #[allow(unsafe_code)]
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            MessageProj::Reader(mut rdr) => {
                // Probably safe..
                let r: Pin<&mut _> = unsafe { Pin::new_unchecked(&mut **rdr) };
                r.poll_read(cx, buf)
            }
            MessageProj::Bytes(rdr) => {
                let _: Pin<&mut _> = rdr;
                rdr.poll_read(cx, buf)
            }
        }
    }
}
