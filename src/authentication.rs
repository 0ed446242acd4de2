//! Provides authentication mechanisms and credential types

use std::fmt::{self, Debug, Display, Formatter};
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;

/// Accepted authentication mechanisms
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Mechanism {
    /// PLAIN authentication mechanism
    /// RFC 4616: <https://tools.ietf.org/html/rfc4616>
    Plain,
    /// LOGIN authentication mechanism
    /// Obsolete but needed for some providers (like office365)
    /// <https://www.ietf.org/archive/id/draft-murchison-sasl-login-00.txt>
    Login,
    /// CRAM-MD5 challenge-response mechanism
    /// RFC 2195: <https://tools.ietf.org/html/rfc2195>
    CramMd5,
    /// Non-standard XOAUTH2 mechanism
    /// <https://developers.google.com/gmail/imap/xoauth2-protocol>
    Xoauth2,
    /// NTLM, selected when domain credentials are supplied; servers do
    /// not advertise it
    Ntlm,
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match *self {
            Mechanism::Plain => "PLAIN",
            Mechanism::Login => "LOGIN",
            Mechanism::CramMd5 => "CRAM-MD5",
            Mechanism::Xoauth2 => "XOAUTH2",
            Mechanism::Ntlm => "NTLM",
        })
    }
}

impl Mechanism {
    /// Does the mechanism send its first secret together with the AUTH
    /// command?
    pub fn supports_initial_response(self) -> bool {
        match self {
            Mechanism::Plain | Mechanism::Xoauth2 | Mechanism::Ntlm => true,
            Mechanism::Login | Mechanism::CramMd5 => false,
        }
    }
}

/// Base64 challenge servers send to ask for the LOGIN username
pub const LOGIN_USERNAME_CHALLENGE: &str = "VXNlcm5hbWU6";
/// Base64 challenge servers send to ask for the LOGIN password
pub const LOGIN_PASSWORD_CHALLENGE: &str = "UGFzc3dvcmQ6";

/// Source of the bearer token used by XOAUTH2.
#[derive(Clone)]
pub enum TokenSource {
    /// A fixed token string. A rejection is final.
    Static(String),
    /// A provider that can mint fresh tokens. After a rejection the
    /// engine retries once with a regenerated token.
    Provider(Arc<dyn TokenProvider>),
}

impl Debug for TokenSource {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            TokenSource::Static(_) => f.write_str("TokenSource::Static"),
            TokenSource::Provider(_) => f.write_str("TokenSource::Provider"),
        }
    }
}

/// Supplies OAuth2 bearer tokens to the XOAUTH2 exchange.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a token believed to be currently valid.
    async fn access_token(&self) -> Result<String, Error>;

    /// Mints a fresh token after the previous one was rejected.
    async fn refresh_token(&self) -> Result<String, Error>;
}

/// Formats NTLM messages.
///
/// The wire exchange is driven by the engine; building and parsing the
/// opaque NTLM message blobs is delegated to this collaborator.
pub trait NtlmProvider: Send + Sync {
    /// Builds the base64 Type 1 (negotiation) message.
    fn negotiate_message(&self, domain: &str, workstation: &str) -> String;

    /// Builds the base64 Type 3 (authentication) message from the
    /// server's Type 2 challenge.
    fn authenticate_message(
        &self,
        challenge: &str,
        username: &str,
        password: &str,
        domain: &str,
        workstation: &str,
    ) -> Result<String, Error>;
}

/// Contains user credentials, one variant per credential shape
#[derive(Clone)]
pub enum Credentials {
    /// Username and password, usable with PLAIN, LOGIN and CRAM-MD5
    Password {
        /// Authentication identity
        username: String,
        /// Shared secret
        password: String,
    },
    /// OAuth2 bearer identity for XOAUTH2
    Xoauth2 {
        /// Authentication identity
        username: String,
        /// Where tokens come from
        token: TokenSource,
    },
    /// Windows domain credentials for NTLM
    Ntlm {
        /// Authentication identity
        username: String,
        /// Shared secret
        password: String,
        /// NT domain
        domain: String,
        /// Workstation name sent in the Type 1 message
        workstation: String,
        /// Message formatter
        provider: Arc<dyn NtlmProvider>,
    },
}

impl Credentials {
    /// Creates password credentials
    pub fn new(username: String, password: String) -> Credentials {
        Credentials::Password { username, password }
    }

    /// The authentication identity, whatever the shape
    pub fn username(&self) -> &str {
        match self {
            Credentials::Password { username, .. }
            | Credentials::Xoauth2 { username, .. }
            | Credentials::Ntlm { username, .. } => username,
        }
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let shape = match self {
            Credentials::Password { .. } => "Password",
            Credentials::Xoauth2 { .. } => "Xoauth2",
            Credentials::Ntlm { .. } => "Ntlm",
        };
        f.debug_struct("Credentials")
            .field("shape", &shape)
            .field("username", &self.username())
            .finish()
    }
}

/// Builds the single-shot PLAIN secret.
///
/// The authorization identity is left empty for broad server
/// compatibility.
pub fn plain_secret(username: &str, password: &str) -> String {
    base64::encode(format!("\u{0}{}\u{0}{}", username, password))
}

/// Builds the LOGIN reply to the username challenge
pub fn login_username(username: &str) -> String {
    base64::encode(username)
}

/// Builds the LOGIN reply to the password challenge
pub fn login_password(password: &str) -> String {
    base64::encode(password)
}

/// Builds the CRAM-MD5 reply for an already-decoded challenge.
pub fn cram_md5_secret(username: &str, password: &str, decoded_challenge: &[u8]) -> String {
    let digest = hmac_md5(password.as_bytes(), decoded_challenge);
    let mut hex = String::with_capacity(32);
    for byte in digest.iter() {
        let _ = write!(hex, "{:02x}", byte);
    }
    base64::encode(format!("{} {}", username, hex))
}

/// Builds the XOAUTH2 initial client response.
pub fn xoauth2_secret(username: &str, access_token: &str) -> String {
    base64::encode(format!(
        "user={}\u{1}auth=Bearer {}\u{1}\u{1}",
        username, access_token
    ))
}

// RFC 2104 over MD5, block size 64.
fn hmac_md5(key: &[u8], message: &[u8]) -> [u8; 16] {
    let mut block = [0u8; 64];
    if key.len() > block.len() {
        block[..16].copy_from_slice(&md5::compute(key).0);
    } else {
        block[..key.len()].copy_from_slice(key);
    }

    let mut inner = md5::Context::new();
    let ipad: Vec<u8> = block.iter().map(|byte| byte ^ 0x36).collect();
    inner.consume(&ipad);
    inner.consume(message);

    let mut outer = md5::Context::new();
    let opad: Vec<u8> = block.iter().map(|byte| byte ^ 0x5c).collect();
    outer.consume(&opad);
    outer.consume(inner.compute().0);
    outer.compute().0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_plain_secret() {
        assert_eq!(plain_secret("user", "password"), "AHVzZXIAcGFzc3dvcmQ=");
    }

    #[test]
    fn test_login_secrets() {
        assert_eq!(login_username("alice"), "YWxpY2U=");
        assert_eq!(login_password("wonderland"), "d29uZGVybGFuZA==");
        assert_eq!(
            base64::decode(LOGIN_USERNAME_CHALLENGE).unwrap(),
            b"Username:"
        );
        assert_eq!(
            base64::decode(LOGIN_PASSWORD_CHALLENGE).unwrap(),
            b"Password:"
        );
    }

    #[test]
    fn test_cram_md5_rfc2195_example() {
        // Challenge and reply from the RFC 2195 example exchange.
        let reply = cram_md5_secret(
            "tim",
            "tanstaaftanstaaf",
            b"<1896.697170952@postoffice.reston.mci.net>",
        );
        assert_eq!(reply, "dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw");
        assert_eq!(
            String::from_utf8(base64::decode(&reply).unwrap()).unwrap(),
            "tim b913a602c7eda7a495b4e6e7334d3890"
        );
    }

    #[test]
    fn test_cram_md5_short_challenge() {
        let reply = cram_md5_secret("tim", "tanstaaftanstaaf", b"<12345@example.com>");
        assert_eq!(
            String::from_utf8(base64::decode(&reply).unwrap()).unwrap(),
            "tim 4ce92cc686dc5f572483571800a669fe"
        );
    }

    #[test]
    fn test_hmac_md5_long_key_is_hashed() {
        let key = [b'k'; 100];
        let direct = hmac_md5(&key, b"message");
        let prehashed = hmac_md5(&md5::compute(&key[..]).0, b"message");
        assert_eq!(direct, prehashed);
    }

    #[test]
    fn test_xoauth2_round_trip() {
        let secret = xoauth2_secret("someuser@example.com", "ya29.token");
        let decoded = base64::decode(&secret).unwrap();
        assert_eq!(
            decoded,
            b"user=someuser@example.com\x01auth=Bearer ya29.token\x01\x01"
        );
    }

    #[test]
    fn test_mechanism_initial_response() {
        assert!(Mechanism::Plain.supports_initial_response());
        assert!(Mechanism::Xoauth2.supports_initial_response());
        assert!(Mechanism::Ntlm.supports_initial_response());
        assert!(!Mechanism::Login.supports_initial_response());
        assert!(!Mechanism::CramMd5.supports_initial_response());
    }
}
