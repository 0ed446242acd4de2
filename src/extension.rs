//! ESMTP features

use crate::authentication::Mechanism;
use crate::envelope::{DsnNotify, DsnReturn};
use crate::error::Error;
use crate::response::Response;
use crate::util::XText;
use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::result::Result;

/// Client identifier, the parameter to `EHLO`
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum ClientId {
    /// A fully-qualified domain name
    Domain(String),
    /// An IPv4 address
    Ipv4(Ipv4Addr),
    /// An IPv6 address
    Ipv6(Ipv6Addr),
}

impl Default for ClientId {
    fn default() -> Self {
        // The most compatible identity when no FQDN is available.
        //
        // It passes Postfix checks
        // ```
        // smtpd_helo_restrictions = reject_invalid_helo_hostname, reject_non_fqdn_helo_hostname, reject_unknown_helo_hostname
        // smtpd_helo_required = yes
        // smtpd_delay_reject = no
        // ```
        Self::Ipv4(Ipv4Addr::new(127, 0, 0, 1))
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            ClientId::Domain(ref value) => f.write_str(value),
            ClientId::Ipv4(ref value) => write!(f, "[{}]", value),
            ClientId::Ipv6(ref value) => write!(f, "[IPv6:{}]", value),
        }
    }
}

impl ClientId {
    /// Creates a new `ClientId` from a fully qualified domain name
    pub fn new(domain: String) -> ClientId {
        ClientId::Domain(domain)
    }

    /// Defines a `ClientId` from the current machine hostname.
    ///
    /// The name is used only when it is a FQDN; a hostname that is an
    /// IPv4 literal becomes a bracketed address, anything else falls
    /// back to `[127.0.0.1]`.
    pub fn hostname() -> ClientId {
        match hostname::get().ok().and_then(|s| s.into_string().ok()) {
            Some(name) => {
                if let Ok(ip) = name.parse::<Ipv4Addr>() {
                    ClientId::Ipv4(ip)
                } else if name.contains('.') {
                    ClientId::Domain(name)
                } else {
                    ClientId::default()
                }
            }
            None => ClientId::default(),
        }
    }
}

/// Supported ESMTP keywords
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum Extension {
    /// PIPELINING keyword
    ///
    /// RFC 2920: <https://tools.ietf.org/html/rfc2920>
    Pipelining,
    /// 8BITMIME keyword
    ///
    /// RFC 6152: <https://tools.ietf.org/html/rfc6152>
    EightBitMime,
    /// SMTPUTF8 keyword
    ///
    /// RFC 6531: <https://tools.ietf.org/html/rfc6531>
    SmtpUtfEight,
    /// STARTTLS keyword
    ///
    /// RFC 2487: <https://tools.ietf.org/html/rfc2487>
    StartTls,
    /// DSN keyword
    ///
    /// RFC 3461: <https://tools.ietf.org/html/rfc3461>
    Dsn,
    /// SIZE keyword
    ///
    /// RFC 1870: <https://tools.ietf.org/html/rfc1870>
    Size,
}

impl Display for Extension {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            Extension::Pipelining => write!(f, "PIPELINING"),
            Extension::EightBitMime => write!(f, "8BITMIME"),
            Extension::SmtpUtfEight => write!(f, "SMTPUTF8"),
            Extension::StartTls => write!(f, "STARTTLS"),
            Extension::Dsn => write!(f, "DSN"),
            Extension::Size => write!(f, "SIZE"),
        }
    }
}

/// Contains information about an SMTP server, rebuilt from every EHLO
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerInfo {
    /// Server name
    ///
    /// The name given in the server banner
    pub name: String,
    /// ESMTP features supported by the server
    ///
    /// It contains the features supported by the server and known by the `Extension` module.
    pub features: HashSet<Extension>,
    /// AUTH mechanisms in the order the server advertised them
    pub auth_mechanisms: Vec<Mechanism>,
    /// Advertised SIZE limit in bytes, `0` when absent or unlimited
    pub max_message_size: u64,
}

impl Display for ServerInfo {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{} with {}",
            self.name,
            if self.features.is_empty() {
                "no supported features".to_string()
            } else {
                format!("{:?}", self.features)
            }
        )
    }
}

impl ServerInfo {
    /// Parses an EHLO response to create a `ServerInfo`
    pub fn from_response(response: &Response) -> Result<ServerInfo, Error> {
        let name = match response.first_word() {
            Some(name) => name,
            None => return Err(Error::ResponseParsing("Could not read server name")),
        };

        let mut features: HashSet<Extension> = HashSet::new();
        let mut auth_mechanisms: Vec<Mechanism> = Vec::new();
        let mut max_message_size = 0;

        for line in response.message.as_slice() {
            if line.is_empty() {
                continue;
            }

            let split: Vec<&str> = line.split_whitespace().collect();
            let keyword = split.first().map(|word| word.to_ascii_uppercase());
            match keyword.as_deref() {
                Some("PIPELINING") => {
                    features.insert(Extension::Pipelining);
                }
                Some("8BITMIME") => {
                    features.insert(Extension::EightBitMime);
                }
                Some("SMTPUTF8") => {
                    features.insert(Extension::SmtpUtfEight);
                }
                Some("STARTTLS") => {
                    features.insert(Extension::StartTls);
                }
                Some("DSN") => {
                    features.insert(Extension::Dsn);
                }
                Some("SIZE") => {
                    features.insert(Extension::Size);
                    max_message_size = split
                        .get(1)
                        .and_then(|value| value.parse().ok())
                        .unwrap_or(0);
                }
                Some("AUTH") => {
                    for mechanism in &split[1..] {
                        let mechanism = match mechanism.to_ascii_uppercase().as_str() {
                            "PLAIN" => Some(Mechanism::Plain),
                            "LOGIN" => Some(Mechanism::Login),
                            "CRAM-MD5" => Some(Mechanism::CramMd5),
                            "XOAUTH2" => Some(Mechanism::Xoauth2),
                            _ => None,
                        };
                        if let Some(mechanism) = mechanism {
                            if !auth_mechanisms.contains(&mechanism) {
                                auth_mechanisms.push(mechanism);
                            }
                        }
                    }
                }
                _ => (),
            };
        }

        Ok(ServerInfo {
            name: name.to_string(),
            features,
            auth_mechanisms,
            max_message_size,
        })
    }

    /// Checks if the server supports an ESMTP feature
    pub fn supports_feature(&self, keyword: Extension) -> bool {
        self.features.contains(&keyword)
    }

    /// Checks if the server supports an AUTH mechanism
    pub fn supports_auth_mechanism(&self, mechanism: Mechanism) -> bool {
        self.auth_mechanisms.contains(&mechanism)
    }
}

/// A `MAIL FROM` extension parameter
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum MailParameter {
    /// `BODY` parameter
    Body(MailBodyParameter),
    /// `SIZE` parameter
    Size(u64),
    /// `SMTPUTF8` parameter
    SmtpUtfEight,
    /// `RET` DSN parameter
    Ret(DsnReturn),
    /// `ENVID` DSN parameter
    Envid(String),
    /// Custom parameter
    Other {
        /// Parameter keyword
        keyword: String,
        /// Parameter value
        value: Option<String>,
    },
}

impl Display for MailParameter {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            MailParameter::Body(ref value) => write!(f, "BODY={}", value),
            MailParameter::Size(size) => write!(f, "SIZE={}", size),
            MailParameter::SmtpUtfEight => f.write_str("SMTPUTF8"),
            MailParameter::Ret(ref value) => write!(f, "RET={}", value),
            MailParameter::Envid(ref value) => write!(f, "ENVID={}", XText(value)),
            MailParameter::Other {
                ref keyword,
                value: Some(ref value),
            } => write!(f, "{}={}", keyword, XText(value)),
            MailParameter::Other {
                ref keyword,
                value: None,
            } => f.write_str(keyword),
        }
    }
}

/// Values for the `BODY` parameter to `MAIL FROM`
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub enum MailBodyParameter {
    /// `7BIT`
    SevenBit,
    /// `8BITMIME`
    EightBitMime,
}

impl Display for MailBodyParameter {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            MailBodyParameter::SevenBit => f.write_str("7BIT"),
            MailBodyParameter::EightBitMime => f.write_str("8BITMIME"),
        }
    }
}

/// A `RCPT TO` extension parameter
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum RcptParameter {
    /// `NOTIFY` DSN parameter
    Notify(DsnNotify),
    /// `ORCPT` DSN parameter, carrying the original recipient address
    Orcpt(String),
    /// Custom parameter
    Other {
        /// Parameter keyword
        keyword: String,
        /// Parameter value
        value: Option<String>,
    },
}

impl Display for RcptParameter {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            RcptParameter::Notify(ref value) => write!(f, "NOTIFY={}", value),
            RcptParameter::Orcpt(ref value) => write!(f, "ORCPT=rfc822;{}", XText(value)),
            RcptParameter::Other {
                ref keyword,
                value: Some(ref value),
            } => write!(f, "{}={}", keyword, XText(value)),
            RcptParameter::Other {
                ref keyword,
                value: None,
            } => f.write_str(keyword),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{ClientId, Extension, MailParameter, RcptParameter, ServerInfo};
    use crate::authentication::Mechanism;
    use crate::envelope::{DsnNotify, DsnReturn};
    use crate::response::{Category, Code, Detail, Response, Severity};

    fn ehlo_response(lines: &[&str]) -> Response {
        Response::new(
            Code::new(
                Severity::PositiveCompletion,
                Category::MailSystem,
                Detail::Zero,
            ),
            lines.iter().map(|line| line.to_string()).collect(),
        )
    }

    #[test]
    fn test_clientid_fmt() {
        assert_eq!(
            format!("{}", ClientId::new("test".to_string())),
            "test".to_string()
        );
        assert_eq!(
            format!("{}", ClientId::Ipv4(std::net::Ipv4Addr::new(127, 0, 0, 1))),
            "[127.0.0.1]".to_string()
        );
    }

    #[test]
    fn test_extension_fmt() {
        assert_eq!(
            format!("{}", Extension::Pipelining),
            "PIPELINING".to_string()
        );
        assert_eq!(
            format!("{}", Extension::EightBitMime),
            "8BITMIME".to_string()
        );
        assert_eq!(format!("{}", Extension::Dsn), "DSN".to_string());
    }

    #[test]
    fn test_serverinfo() {
        let response = ehlo_response(&["me", "8BITMIME", "SIZE 42"]);

        let server_info = ServerInfo::from_response(&response).unwrap();
        assert_eq!(server_info.name, "me");
        assert_eq!(server_info.max_message_size, 42);
        assert!(server_info.supports_feature(Extension::EightBitMime));
        assert!(server_info.supports_feature(Extension::Size));
        assert!(!server_info.supports_feature(Extension::StartTls));
        assert!(server_info.auth_mechanisms.is_empty());
    }

    #[test]
    fn test_serverinfo_auth_order() {
        let response = ehlo_response(&[
            "me",
            "AUTH LOGIN PLAIN XOAUTH2 OTHER",
            "AUTH PLAIN CRAM-MD5",
            "8BITMIME",
        ]);

        let server_info = ServerInfo::from_response(&response).unwrap();
        assert_eq!(
            server_info.auth_mechanisms,
            vec![
                Mechanism::Login,
                Mechanism::Plain,
                Mechanism::Xoauth2,
                Mechanism::CramMd5
            ]
        );
        assert!(server_info.supports_auth_mechanism(Mechanism::Plain));
        assert!(!server_info.supports_auth_mechanism(Mechanism::Ntlm));
    }

    #[test]
    fn test_serverinfo_case_insensitive() {
        let response = ehlo_response(&["me", "starttls", "Size 1000", "auth plain"]);

        let server_info = ServerInfo::from_response(&response).unwrap();
        assert!(server_info.supports_feature(Extension::StartTls));
        assert_eq!(server_info.max_message_size, 1000);
        assert_eq!(server_info.auth_mechanisms, vec![Mechanism::Plain]);
    }

    #[test]
    fn test_size_without_value() {
        let response = ehlo_response(&["me", "SIZE"]);
        let server_info = ServerInfo::from_response(&response).unwrap();
        assert!(server_info.supports_feature(Extension::Size));
        assert_eq!(server_info.max_message_size, 0);
    }

    #[test]
    fn test_dsn_parameters_fmt() {
        assert_eq!(
            format!("{}", MailParameter::Ret(DsnReturn::Headers)),
            "RET=HDRS"
        );
        assert_eq!(
            format!("{}", MailParameter::Envid("abc=123".to_string())),
            "ENVID=abc+3D123"
        );
        assert_eq!(
            format!(
                "{}",
                RcptParameter::Notify(DsnNotify::Events {
                    success: false,
                    failure: true,
                    delay: true
                })
            ),
            "NOTIFY=FAILURE,DELAY"
        );
        assert_eq!(
            format!("{}", RcptParameter::Orcpt("user@example.org".to_string())),
            "ORCPT=rfc822;user@example.org"
        );
    }
}
