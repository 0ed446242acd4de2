//! Error and result type for the connection engine

use crate::envelope::EmailAddress;
use crate::response::Response;
use base64::DecodeError;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::string::FromUtf8Error;

/// Wire-facing error classification.
///
/// Every fatal failure of the engine maps onto one of these codes; the
/// rendering matches the conventional `E*` diagnostic strings so log
/// consumers can match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Transport could not be established or was lost, or the server sent 421
    Connection,
    /// Connection, greeting or idle timer fired
    Timeout,
    /// STARTTLS was refused or the TLS handshake failed
    Tls,
    /// The server deviated from the protocol
    Protocol,
    /// An AUTH exchange failed
    Auth,
    /// MAIL FROM / RCPT TO was rejected or the envelope is invalid
    Envelope,
    /// The message was rejected or violates a server limit
    Message,
    /// The caller-supplied body stream failed
    Stream,
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match self {
            ErrorCode::Connection => "ECONNECTION",
            ErrorCode::Timeout => "ETIMEDOUT",
            ErrorCode::Tls => "ETLS",
            ErrorCode::Protocol => "EPROTOCOL",
            ErrorCode::Auth => "EAUTH",
            ErrorCode::Envelope => "EENVELOPE",
            ErrorCode::Message => "EMESSAGE",
            ErrorCode::Stream => "ESTREAM",
        })
    }
}

/// Rejection of a single recipient, carried by partial-success results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientError {
    /// The recipient the server turned down
    pub recipient: EmailAddress,
    /// The server's reply for this recipient
    pub response: Response,
}

impl Display for RecipientError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.response.has_code(553) && !self.recipient.is_ascii() {
            return write!(
                f,
                "{}: Internationalized mailbox name not allowed",
                self.recipient
            );
        }
        write!(
            f,
            "{}: {}",
            self.recipient,
            self.response.first_line().unwrap_or("recipient rejected")
        )
    }
}

/// An enum of all error kinds.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Transport failure outside any server reply
    #[error("connection: {0}")]
    Connection(&'static str),
    /// The server announced shutdown with a 421 reply
    #[error("service not available: {}", .0.first_line().unwrap_or("server closing transmission channel"))]
    ServiceUnavailable(Response),
    /// The banner was not a 220 greeting
    #[error("unexpected greeting: {}", .0.first_line().unwrap_or("undetailed response"))]
    Greeting(Response),
    /// EHLO and HELO were both rejected, or EHLO failed while TLS is required
    #[error("invalid HELLO response: {}", .0.first_line().unwrap_or("undetailed response"))]
    Hello(Response),
    /// The server refused the STARTTLS command
    #[error("STARTTLS refused: {}", .0.first_line().unwrap_or("undetailed response"))]
    StartTlsRefused(Response),
    /// TLS handshake or configuration error
    #[error("tls: {0}")]
    Tls(#[from] async_native_tls::Error),
    /// The server rejected an RSET
    #[error("RSET rejected: {}", .0.first_line().unwrap_or("undetailed response"))]
    Reset(Response),
    /// Error parsing a response
    #[error("{0}")]
    ResponseParsing(&'static str),
    /// Parsing error
    #[error("parsing: {0:?}")]
    Parsing(nom::error::ErrorKind),
    /// Error parsing a base64 string in response
    #[error("challenge parsing: {0}")]
    ChallengeParsing(#[from] DecodeError),
    /// Error parsing UTF8 in response
    #[error("utf8: {0}")]
    Utf8Parsing(#[from] FromUtf8Error),
    /// The server rejected an authentication step
    #[error("authentication failed: {}", .0.first_line().unwrap_or("undetailed response"))]
    Auth(Response),
    /// A step of the envelope transaction was rejected
    #[error("{command} rejected: {}", .response.first_line().unwrap_or("undetailed response"))]
    Envelope {
        /// Command the server rejected
        command: &'static str,
        /// The server's reply
        response: Response,
    },
    /// SMTPUTF8 address refused by a server without proper support
    #[error("Internationalized mailbox name not allowed")]
    InternationalizedMailbox {
        /// Command the server rejected
        command: &'static str,
        /// The server's reply
        response: Response,
    },
    /// Every recipient of the envelope was rejected
    #[error("all recipients were rejected: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    AllRecipientsRejected(Vec<RecipientError>),
    /// The declared message size exceeds the server's SIZE limit
    #[error("message size {size} exceeds server limit of {limit}")]
    MessageTooBig {
        /// Declared envelope size
        size: u64,
        /// Advertised server limit
        limit: u64,
    },
    /// The message data was rejected after transfer
    #[error("message rejected: {}", .0.first_line().unwrap_or("undetailed response"))]
    Message(Response),
    /// The message body contained no bytes
    #[error("message is empty")]
    EmptyMessage,
    /// The caller-supplied body stream failed mid-transfer
    #[error("message stream: {0}")]
    Stream(io::Error),
    /// Address contains characters that cannot go on the wire
    #[error("invalid email address")]
    InvalidAddress,
    /// The envelope names no recipients
    #[error("envelope has no recipients")]
    NoRecipients,
    /// The DSN parameters cannot be sent
    #[error("{0}")]
    InvalidDsn(&'static str),
    /// IO error
    #[error("io: {0}")]
    Io(#[from] io::Error),
    /// Internal client error
    #[error("client: {0}")]
    Client(&'static str),
    /// DNS resolution error
    #[error("could not resolve hostname")]
    Resolution,
    #[cfg(feature = "runtime-tokio")]
    /// Timeout error
    #[error("timeout: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),
    #[cfg(feature = "runtime-async-std")]
    /// Timeout error
    #[error("timeout: {0}")]
    Timeout(#[from] async_std::future::TimeoutError),
}

impl Error {
    /// Classification of this error, `None` for local API misuse.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Io(err) if err.kind() == io::ErrorKind::TimedOut => Some(ErrorCode::Timeout),
            Error::Connection(_)
            | Error::ServiceUnavailable(_)
            | Error::Io(_)
            | Error::Resolution => Some(ErrorCode::Connection),
            Error::Timeout(_) => Some(ErrorCode::Timeout),
            Error::Tls(_) | Error::StartTlsRefused(_) => Some(ErrorCode::Tls),
            Error::Greeting(_)
            | Error::Hello(_)
            | Error::Reset(_)
            | Error::ResponseParsing(_)
            | Error::Parsing(_)
            | Error::Utf8Parsing(_) => Some(ErrorCode::Protocol),
            Error::Auth(_) | Error::ChallengeParsing(_) => Some(ErrorCode::Auth),
            Error::Envelope { .. }
            | Error::InternationalizedMailbox { .. }
            | Error::AllRecipientsRejected(_)
            | Error::InvalidAddress
            | Error::NoRecipients
            | Error::InvalidDsn(_) => Some(ErrorCode::Envelope),
            Error::MessageTooBig { .. } | Error::Message(_) | Error::EmptyMessage => {
                Some(ErrorCode::Message)
            }
            Error::Stream(_) => Some(ErrorCode::Stream),
            Error::Client(_) => None,
        }
    }
}

impl From<nom::Err<nom::error::Error<&str>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&str>>) -> Error {
        Error::Parsing(match err {
            nom::Err::Incomplete(_) => nom::error::ErrorKind::Complete,
            nom::Err::Failure(e) => e.code,
            nom::Err::Error(e) => e.code,
        })
    }
}

impl From<&'static str> for Error {
    fn from(string: &'static str) -> Error {
        Error::Client(string)
    }
}

/// SMTP result type
pub type SmtpResult = Result<Response, Error>;

#[cfg(test)]
mod test {
    use super::*;
    use crate::response::{Category, Code, Detail, Severity};

    fn response(code: Code, lines: &[&str]) -> Response {
        Response::new(code, lines.iter().map(|l| l.to_string()).collect())
    }

    #[test]
    fn test_error_response_to_string() {
        let err = Error::Auth(response(
            Code::new(
                Severity::PermanentNegativeCompletion,
                Category::Unspecified3,
                Detail::Five,
            ),
            &["5.7.8 Username and Password not accepted."],
        ));
        assert_eq!(
            format!("{}", err),
            "authentication failed: 5.7.8 Username and Password not accepted."
        );
        assert_eq!(err.code(), Some(ErrorCode::Auth));
    }

    #[test]
    fn test_code_rendering() {
        assert_eq!(format!("{}", ErrorCode::Connection), "ECONNECTION");
        assert_eq!(format!("{}", ErrorCode::Envelope), "EENVELOPE");
        assert_eq!(
            Error::Client("operation already in progress").code(),
            None
        );
        assert_eq!(
            Error::MessageTooBig {
                size: 200,
                limit: 100
            }
            .code(),
            Some(ErrorCode::Message)
        );
    }

    #[test]
    fn test_internationalized_mailbox_message() {
        let err = Error::InternationalizedMailbox {
            command: "MAIL FROM",
            response: response(
                Code::new(
                    Severity::PermanentNegativeCompletion,
                    Category::MailSystem,
                    Detail::Zero,
                ),
                &["bad mailbox"],
            ),
        };
        assert_eq!(format!("{}", err), "Internationalized mailbox name not allowed");
    }
}
