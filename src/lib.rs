//! Async implementation of the SMTP/LMTP client protocol engine in Rust.
//!
//! This crate drives a single connection to a mail relay through the full
//! [RFC 5321](https://tools.ietf.org/html/rfc5321) submission lifecycle:
//! greeting, capability negotiation, optional STARTTLS upgrade,
//! authentication, and one or more envelope/DATA transactions over the
//! same connection. [LMTP](https://tools.ietf.org/html/rfc2033) is
//! supported with its per-recipient delivery responses.
//!
//! It implements the following extensions:
//!
//! * 8BITMIME ([RFC 6152](https://tools.ietf.org/html/rfc6152))
//! * AUTH ([RFC 4954](http://tools.ietf.org/html/rfc4954)) with PLAIN, LOGIN,
//!   CRAM-MD5, XOAUTH2 and NTLM mechanisms
//! * STARTTLS ([RFC 2487](http://tools.ietf.org/html/rfc2487))
//! * SMTPUTF8 ([RFC 6531](http://tools.ietf.org/html/rfc6531))
//! * PIPELINING ([RFC 2920](<https://tools.ietf.org/html/rfc2920>))
//! * DSN ([RFC 3461](https://tools.ietf.org/html/rfc3461))
//! * SIZE ([RFC 1870](https://tools.ietf.org/html/rfc1870))

#![deny(
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    missing_debug_implementations,
    missing_docs,
    clippy::unwrap_used
)]

#[cfg(not(any(feature = "runtime-tokio", feature = "runtime-async-std")))]
compile_error!("one of 'runtime-async-std' or 'runtime-tokio' features must be enabled");

#[cfg(all(feature = "runtime-tokio", feature = "runtime-async-std"))]
compile_error!("only one of 'runtime-async-std' or 'runtime-tokio' features must be enabled");

pub mod authentication;
/// Provides encoding and decoding of SMTP/LMTP protocol lines.
pub mod codec;
pub mod commands;
mod connection;
mod envelope;
pub mod error;
pub mod extension;
pub mod mock;
pub mod net;
pub mod response;
mod stream;
pub mod util;

pub use crate::connection::{
    ClientSecurity, ConnectionConfig, SendInfo, ServerAddress, SmtpConnection, Stage, Timeouts,
    SMTP_PORT, SUBMISSIONS_PORT,
};
pub use crate::envelope::{Dsn, DsnNotify, DsnReturn, EmailAddress, Envelope, Message};

/// Run a test body on whichever runtime the crate was built for.
#[macro_export]
macro_rules! async_test {
    ($name:ident, $block:block) => {
        #[cfg(feature = "runtime-tokio")]
        #[tokio::test]
        async fn $name() {
            $block
        }

        #[cfg(feature = "runtime-async-std")]
        #[async_std::test]
        async fn $name() {
            $block
        }
    };
}
