//! SMTP/LMTP commands

use crate::authentication::Mechanism;
use crate::envelope::EmailAddress;
use crate::extension::{ClientId, MailParameter, RcptParameter};
use std::convert::AsRef;
use std::fmt::{self, Display, Formatter};

/// EHLO command
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct EhloCommand {
    client_id: ClientId,
}

impl Display for EhloCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "EHLO {}\r\n", self.client_id)
    }
}

impl EhloCommand {
    /// Creates a EHLO command
    pub fn new(client_id: ClientId) -> EhloCommand {
        EhloCommand { client_id }
    }
}

/// LHLO command, the LMTP greeting (RFC 2033)
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct LhloCommand {
    client_id: ClientId,
}

impl Display for LhloCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "LHLO {}\r\n", self.client_id)
    }
}

impl LhloCommand {
    /// Creates a LHLO command
    pub fn new(client_id: ClientId) -> LhloCommand {
        LhloCommand { client_id }
    }
}

/// HELO command, fallback for servers that reject EHLO
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct HeloCommand {
    client_id: ClientId,
}

impl Display for HeloCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "HELO {}\r\n", self.client_id)
    }
}

impl HeloCommand {
    /// Creates a HELO command
    pub fn new(client_id: ClientId) -> HeloCommand {
        HeloCommand { client_id }
    }
}

/// STARTTLS command
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct StarttlsCommand;

impl Display for StarttlsCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("STARTTLS\r\n")
    }
}

/// MAIL command
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct MailCommand {
    sender: Option<EmailAddress>,
    parameters: Vec<MailParameter>,
}

impl Display for MailCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "MAIL FROM:<{}>",
            self.sender.as_ref().map(AsRef::as_ref).unwrap_or("")
        )?;
        for parameter in &self.parameters {
            write!(f, " {}", parameter)?;
        }
        f.write_str("\r\n")
    }
}

impl MailCommand {
    /// Creates a MAIL command
    pub fn new(sender: Option<EmailAddress>, parameters: Vec<MailParameter>) -> MailCommand {
        MailCommand { sender, parameters }
    }
}

/// RCPT command
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct RcptCommand {
    recipient: EmailAddress,
    parameters: Vec<RcptParameter>,
}

impl Display for RcptCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "RCPT TO:<{}>", self.recipient)?;
        for parameter in &self.parameters {
            write!(f, " {}", parameter)?;
        }
        f.write_str("\r\n")
    }
}

impl RcptCommand {
    /// Creates an RCPT command
    pub fn new(recipient: EmailAddress, parameters: Vec<RcptParameter>) -> RcptCommand {
        RcptCommand {
            recipient,
            parameters,
        }
    }
}

/// DATA command
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct DataCommand;

impl Display for DataCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("DATA\r\n")
    }
}

/// QUIT command
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct QuitCommand;

impl Display for QuitCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("QUIT\r\n")
    }
}

/// NOOP command
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct NoopCommand;

impl Display for NoopCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("NOOP\r\n")
    }
}

/// RSET command
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct RsetCommand;

impl Display for RsetCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("RSET\r\n")
    }
}

/// AUTH command, optionally carrying an already-encoded initial response
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct AuthCommand {
    mechanism: Mechanism,
    initial_response: Option<String>,
}

impl Display for AuthCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "AUTH {}", self.mechanism)?;
        if let Some(initial_response) = &self.initial_response {
            write!(f, " {}", initial_response)?;
        }
        f.write_str("\r\n")
    }
}

impl AuthCommand {
    /// Creates an AUTH command. The initial response must already be
    /// encoded the way the mechanism requires.
    pub fn new(mechanism: Mechanism, initial_response: Option<String>) -> AuthCommand {
        AuthCommand {
            mechanism,
            initial_response,
        }
    }
}

/// One client line of an AUTH challenge-response exchange
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct AuthResponseCommand {
    response: String,
}

impl Display for AuthResponseCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}\r\n", self.response)
    }
}

impl AuthResponseCommand {
    /// Creates a challenge reply line, already encoded. An empty reply
    /// renders as a bare line, which cancels a pending challenge.
    pub fn new(response: String) -> AuthResponseCommand {
        AuthResponseCommand { response }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::authentication::plain_secret;
    use crate::envelope::{DsnNotify, DsnReturn};
    use crate::extension::MailBodyParameter;

    #[test]
    fn test_display() {
        let id = ClientId::Domain("localhost".to_string());
        let id_ipv4 = ClientId::Ipv4(std::net::Ipv4Addr::new(127, 0, 0, 1));
        let email = EmailAddress::new("test@example.com".to_string()).unwrap();
        let mail_parameter = MailParameter::Other {
            keyword: "TEST".to_string(),
            value: Some("value".to_string()),
        };
        assert_eq!(
            format!("{}", EhloCommand::new(id.clone())),
            "EHLO localhost\r\n"
        );
        assert_eq!(
            format!("{}", EhloCommand::new(id_ipv4)),
            "EHLO [127.0.0.1]\r\n"
        );
        assert_eq!(
            format!("{}", LhloCommand::new(id.clone())),
            "LHLO localhost\r\n"
        );
        assert_eq!(format!("{}", HeloCommand::new(id)), "HELO localhost\r\n");
        assert_eq!(
            format!("{}", MailCommand::new(Some(email.clone()), vec![])),
            "MAIL FROM:<test@example.com>\r\n"
        );
        assert_eq!(
            format!("{}", MailCommand::new(None, vec![])),
            "MAIL FROM:<>\r\n"
        );
        assert_eq!(
            format!(
                "{}",
                MailCommand::new(Some(email.clone()), vec![MailParameter::Size(42)])
            ),
            "MAIL FROM:<test@example.com> SIZE=42\r\n"
        );
        assert_eq!(
            format!(
                "{}",
                MailCommand::new(
                    Some(email.clone()),
                    vec![
                        MailParameter::Size(42),
                        MailParameter::Body(MailBodyParameter::EightBitMime),
                        mail_parameter,
                    ],
                )
            ),
            "MAIL FROM:<test@example.com> SIZE=42 BODY=8BITMIME TEST=value\r\n"
        );
        assert_eq!(
            format!(
                "{}",
                MailCommand::new(
                    Some(email.clone()),
                    vec![
                        MailParameter::Ret(DsnReturn::Full),
                        MailParameter::Envid("tracker".to_string()),
                    ],
                )
            ),
            "MAIL FROM:<test@example.com> RET=FULL ENVID=tracker\r\n"
        );
        assert_eq!(
            format!("{}", RcptCommand::new(email.clone(), vec![])),
            "RCPT TO:<test@example.com>\r\n"
        );
        assert_eq!(
            format!(
                "{}",
                RcptCommand::new(
                    email,
                    vec![RcptParameter::Notify(DsnNotify::Events {
                        success: true,
                        failure: true,
                        delay: false
                    })]
                )
            ),
            "RCPT TO:<test@example.com> NOTIFY=SUCCESS,FAILURE\r\n"
        );
        assert_eq!(format!("{}", QuitCommand), "QUIT\r\n");
        assert_eq!(format!("{}", DataCommand), "DATA\r\n");
        assert_eq!(format!("{}", NoopCommand), "NOOP\r\n");
        assert_eq!(format!("{}", RsetCommand), "RSET\r\n");
        assert_eq!(
            format!(
                "{}",
                AuthCommand::new(Mechanism::Plain, Some(plain_secret("user", "password")))
            ),
            "AUTH PLAIN AHVzZXIAcGFzc3dvcmQ=\r\n"
        );
        assert_eq!(
            format!("{}", AuthCommand::new(Mechanism::Login, None)),
            "AUTH LOGIN\r\n"
        );
        assert_eq!(
            format!("{}", AuthResponseCommand::new("dGVzdA==".to_string())),
            "dGVzdA==\r\n"
        );
        assert_eq!(
            format!("{}", AuthResponseCommand::new(String::new())),
            "\r\n"
        );
    }
}
