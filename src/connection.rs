//! The connection state machine driving a full mail relay session

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::Rng;

use crate::authentication::{
    self, Credentials, Mechanism, NtlmProvider, TokenSource, LOGIN_PASSWORD_CHALLENGE,
    LOGIN_USERNAME_CHALLENGE,
};
use crate::commands::{
    AuthCommand, AuthResponseCommand, DataCommand, EhloCommand, HeloCommand, LhloCommand,
    MailCommand, NoopCommand, QuitCommand, RcptCommand, RsetCommand, StarttlsCommand,
};
use crate::envelope::{EmailAddress, Envelope, Message};
use crate::error::{Error, ErrorCode, RecipientError};
use crate::extension::{
    ClientId, Extension, MailBodyParameter, MailParameter, RcptParameter, ServerInfo,
};
use crate::net::{ClientTlsParameters, Connector, NetworkStream};
use crate::response::{Response, Severity};
use crate::stream::SmtpStream;

#[cfg(feature = "runtime-async-std")]
use async_std::io::{Read, ReadExt, Write};
#[cfg(feature = "runtime-tokio")]
use tokio::io::{AsyncRead as Read, AsyncReadExt, AsyncWrite as Write};

// Registered port numbers:
// https://www.iana.
// org/assignments/service-names-port-numbers/service-names-port-numbers.xhtml

/// Default smtp port
pub const SMTP_PORT: u16 = 25;
/// Default submission over TLS port
pub const SUBMISSIONS_PORT: u16 = 465;

/// How to apply TLS to a client connection
#[derive(Debug)]
pub enum ClientSecurity {
    /// Insecure connection only, STARTTLS is never attempted
    None,
    /// Start insecure and use `STARTTLS` when available
    Opportunistic(ClientTlsParameters),
    /// Start insecure and require `STARTTLS`.
    ///
    /// The upgrade is attempted even when the server does not advertise
    /// STARTTLS; a refusal is fatal, and EHLO may not fall back to HELO.
    Required(ClientTlsParameters),
    /// Use TLS wrapped connection
    Wrapper(ClientTlsParameters),
}

/// Server location
#[derive(Clone, Debug)]
pub struct ServerAddress {
    /// Hostname to connect to
    pub host: String,
    /// Port, `0` picks the default for the security mode
    pub port: u16,
}

impl ServerAddress {
    /// Creates a new server address
    pub fn new(host: String, port: u16) -> ServerAddress {
        ServerAddress { host, port }
    }
}

/// Time limits for the phases of the connection
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    /// Limit for establishing the transport
    pub connection: Duration,
    /// Limit for the server banner after connecting
    pub greeting: Duration,
    /// Idle limit for every later response
    pub idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            connection: Duration::from_secs(120),
            greeting: Duration::from_secs(30),
            idle: Duration::from_secs(600),
        }
    }
}

/// Lifecycle stage of a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Created, transport not yet opened
    Init,
    /// Transport open, banner not yet read
    Connected,
    /// EHLO/LHLO accepted, capabilities known
    Greeted,
    /// Ready for `login`, `send`, `reset` or `quit`
    Ready,
    /// An envelope transaction is in flight
    Sending,
    /// Terminal; every operation but `close` is refused
    Closed,
}

/// Contains client configuration
#[derive(Debug)]
pub struct ConnectionConfig {
    /// Server to connect to
    server: ServerAddress,
    /// TLS security configuration
    security: ClientSecurity,
    /// Speak LMTP instead of SMTP
    lmtp: bool,
    /// Name sent during EHLO
    hello_name: ClientId,
    /// Optional enforced authentication mechanism
    auth_method: Option<Mechanism>,
    /// Stop after the RCPT phase, never sending DATA
    envelope_only: bool,
    /// Phase time limits
    timeouts: Timeouts,
    /// Local address to bind before connecting
    local_addr: Option<SocketAddr>,
}

impl ConnectionConfig {
    /// Creates a configuration for the given host.
    ///
    /// Defaults are: port picked from the security mode (25, or 465 for
    /// implicit TLS), no TLS, SMTP, the machine hostname for EHLO, no
    /// mechanism override, and the standard timeouts.
    pub fn new(host: impl Into<String>) -> ConnectionConfig {
        ConnectionConfig {
            server: ServerAddress::new(host.into(), 0),
            security: ClientSecurity::None,
            lmtp: false,
            hello_name: ClientId::hostname(),
            auth_method: None,
            envelope_only: false,
            timeouts: Timeouts::default(),
            local_addr: None,
        }
    }

    /// Set an explicit port
    pub fn port(self, port: u16) -> ConnectionConfig {
        ConnectionConfig {
            server: ServerAddress::new(self.server.host.clone(), port),
            ..self
        }
    }

    /// Set the TLS security mode
    pub fn security(self, security: ClientSecurity) -> ConnectionConfig {
        ConnectionConfig { security, ..self }
    }

    /// Speak LMTP instead of SMTP
    pub fn lmtp(self, lmtp: bool) -> ConnectionConfig {
        ConnectionConfig { lmtp, ..self }
    }

    /// Set the name used during EHLO
    pub fn hello_name(self, name: ClientId) -> ConnectionConfig {
        ConnectionConfig {
            hello_name: name,
            ..self
        }
    }

    /// Force an authentication mechanism instead of negotiating one
    pub fn auth_method(self, mechanism: Mechanism) -> ConnectionConfig {
        ConnectionConfig {
            auth_method: Some(mechanism),
            ..self
        }
    }

    /// Verify the envelope only: stop after RCPT, never send DATA
    pub fn envelope_only(self, enabled: bool) -> ConnectionConfig {
        ConnectionConfig {
            envelope_only: enabled,
            ..self
        }
    }

    /// Override the phase time limits
    pub fn timeouts(self, timeouts: Timeouts) -> ConnectionConfig {
        ConnectionConfig { timeouts, ..self }
    }

    /// Bind to a local address before connecting
    pub fn local_addr(self, addr: SocketAddr) -> ConnectionConfig {
        ConnectionConfig {
            local_addr: Some(addr),
            ..self
        }
    }

    fn effective_port(&self) -> u16 {
        if self.server.port != 0 {
            return self.server.port;
        }
        match self.security {
            ClientSecurity::Wrapper(_) => SUBMISSIONS_PORT,
            _ => SMTP_PORT,
        }
    }
}

/// Outcome of one envelope/DATA transaction
#[derive(Clone, Debug)]
pub struct SendInfo {
    /// Recipients the server accepted and, for LMTP, delivered
    pub accepted: Vec<EmailAddress>,
    /// Recipients the server turned down
    pub rejected: Vec<EmailAddress>,
    /// The server replies behind each rejection
    pub rejected_errors: Vec<RecipientError>,
    /// The reply that completed the transaction
    pub response: Response,
    /// Time spent on MAIL FROM and the RCPT phase
    pub envelope_time: Duration,
    /// Time spent transferring the message, `None` in envelope-only mode
    pub message_time: Option<Duration>,
    /// Encoded bytes put on the wire, `None` in envelope-only mode
    pub message_size: Option<u64>,
}

/// A single client connection to a mail relay.
///
/// Owns the transport for its whole life, including across a STARTTLS
/// upgrade, and steps through the [`Stage`] lifecycle. One logical owner
/// drives it at a time; every operation reports its outcome exactly once
/// through its return value.
#[derive(Debug)]
pub struct SmtpConnection<S: Read + Write + Unpin = NetworkStream> {
    /// Random identity used to correlate log lines
    id: String,
    config: ConnectionConfig,
    stream: Option<SmtpStream<S>>,
    /// Information about the server, rebuilt on every EHLO
    server_info: Option<ServerInfo>,
    stage: Stage,
    secure: bool,
    authenticated: bool,
}

impl<S: Read + Write + Unpin> SmtpConnection<S> {
    fn create(config: ConnectionConfig) -> Self {
        SmtpConnection {
            id: connection_id(),
            config,
            stream: None,
            server_info: None,
            stage: Stage::Init,
            secure: false,
            authenticated: false,
        }
    }

    /// Connection id used in log lines
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle stage
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Is the transport TLS-wrapped?
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Has an AUTH exchange completed?
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// What the server advertised in its last EHLO reply
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Tears the connection apart, returning the transport
    pub fn into_inner(self) -> Option<S> {
        self.stream.map(SmtpStream::into_inner)
    }

    fn stream_mut(&mut self) -> Result<&mut SmtpStream<S>, Error> {
        self.stream
            .as_mut()
            .ok_or(Error::Connection("connection is not established"))
    }

    fn info(&self) -> Result<&ServerInfo, Error> {
        self.server_info
            .as_ref()
            .ok_or(Error::Client("hello was not yet exchanged"))
    }

    fn supports_feature(&self, keyword: Extension) -> bool {
        self.server_info
            .as_ref()
            .map(|info| info.supports_feature(keyword))
            .unwrap_or_default()
    }

    fn expect_ready(&self) -> Result<(), Error> {
        if self.stage == Stage::Ready {
            Ok(())
        } else {
            Err(Error::Client("connection is not ready for this operation"))
        }
    }

    /// Sends EHLO (or LHLO for LMTP) and rebuilds the capability
    /// registry; falls back to HELO where that is allowed.
    async fn hello(&mut self) -> Result<(), Error> {
        let client_id = self.config.hello_name.clone();
        let response = if self.config.lmtp {
            self.stream_mut()?
                .command(LhloCommand::new(client_id))
                .await?
        } else {
            self.stream_mut()?
                .command(EhloCommand::new(client_id))
                .await?
        };

        let response = if response.is_positive() {
            response
        } else if response.has_code(421) {
            return Err(Error::ServiceUnavailable(response));
        } else if self.config.lmtp {
            // LMTP knows no HELO
            return Err(Error::Hello(response));
        } else if let ClientSecurity::Required(_) = self.config.security {
            // downgrading to HELO would lose STARTTLS
            return Err(Error::Hello(response));
        } else {
            let client_id = self.config.hello_name.clone();
            let fallback = self
                .stream_mut()?
                .command(HeloCommand::new(client_id))
                .await?;
            if !fallback.is_positive() {
                if fallback.has_code(421) {
                    return Err(Error::ServiceUnavailable(fallback));
                }
                return Err(Error::Hello(fallback));
            }
            fallback
        };

        let server_info = ServerInfo::from_response(&response)?;
        debug!("{} server {}", self.id, server_info);
        self.server_info = Some(server_info);
        self.stage = Stage::Greeted;
        Ok(())
    }

    /// Authenticates with the given credentials.
    ///
    /// The mechanism is the configured override when set, otherwise it
    /// is derived from the credential shape and the server's advertised
    /// list.
    pub async fn login(&mut self, credentials: &Credentials) -> Result<(), Error> {
        self.expect_ready()?;
        let mechanism = self.select_mechanism(credentials)?;
        debug!("{} authenticating with {}", self.id, mechanism);

        match (mechanism, credentials) {
            (Mechanism::Plain, Credentials::Password { username, password }) => {
                self.auth_plain(username, password).await?;
            }
            (Mechanism::Login, Credentials::Password { username, password }) => {
                self.auth_login(username, password).await?;
            }
            (Mechanism::CramMd5, Credentials::Password { username, password }) => {
                self.auth_cram_md5(username, password).await?;
            }
            (Mechanism::Xoauth2, Credentials::Xoauth2 { username, token }) => {
                self.auth_xoauth2(username, token).await?;
            }
            (
                Mechanism::Ntlm,
                Credentials::Ntlm {
                    username,
                    password,
                    domain,
                    workstation,
                    provider,
                },
            ) => {
                self.auth_ntlm(username, password, domain, workstation, provider.as_ref())
                    .await?;
            }
            _ => {
                return Err(Error::Client(
                    "authentication mechanism does not match the supplied credentials",
                ))
            }
        }

        self.authenticated = true;
        info!("{} authenticated", self.id);
        Ok(())
    }

    fn select_mechanism(&self, credentials: &Credentials) -> Result<Mechanism, Error> {
        if let Some(mechanism) = self.config.auth_method {
            let compatible = match (mechanism, credentials) {
                (
                    Mechanism::Plain | Mechanism::Login | Mechanism::CramMd5,
                    Credentials::Password { .. },
                ) => true,
                (Mechanism::Xoauth2, Credentials::Xoauth2 { .. }) => true,
                (Mechanism::Ntlm, Credentials::Ntlm { .. }) => true,
                _ => false,
            };
            if !compatible {
                return Err(Error::Client(
                    "authentication mechanism does not match the supplied credentials",
                ));
            }
            return Ok(mechanism);
        }

        match credentials {
            Credentials::Xoauth2 { .. } => Ok(Mechanism::Xoauth2),
            Credentials::Ntlm { .. } => Ok(Mechanism::Ntlm),
            Credentials::Password { .. } => Ok(self
                .info()?
                .auth_mechanisms
                .iter()
                .copied()
                .find(|mechanism| {
                    matches!(
                        mechanism,
                        Mechanism::Plain | Mechanism::Login | Mechanism::CramMd5
                    )
                })
                .unwrap_or(Mechanism::Plain)),
        }
    }

    async fn auth_plain(&mut self, username: &str, password: &str) -> Result<(), Error> {
        let secret = authentication::plain_secret(username, password);
        let response = self
            .stream_mut()?
            .command(AuthCommand::new(Mechanism::Plain, Some(secret)))
            .await?;
        auth_result(response)
    }

    async fn auth_login(&mut self, username: &str, password: &str) -> Result<(), Error> {
        let response = self
            .stream_mut()?
            .command(AuthCommand::new(Mechanism::Login, None))
            .await?;
        if !response.has_code(334) || response.first_word() != Some(LOGIN_USERNAME_CHALLENGE) {
            return Err(Error::Auth(response));
        }

        let reply = authentication::login_username(username);
        let response = self
            .stream_mut()?
            .command(AuthResponseCommand::new(reply))
            .await?;
        if !response.has_code(334) || response.first_word() != Some(LOGIN_PASSWORD_CHALLENGE) {
            return Err(Error::Auth(response));
        }

        let reply = authentication::login_password(password);
        let response = self
            .stream_mut()?
            .command(AuthResponseCommand::new(reply))
            .await?;
        auth_result(response)
    }

    async fn auth_cram_md5(&mut self, username: &str, password: &str) -> Result<(), Error> {
        let response = self
            .stream_mut()?
            .command(AuthCommand::new(Mechanism::CramMd5, None))
            .await?;
        if !response.has_code(334) {
            return Err(Error::Auth(response));
        }
        let challenge = response
            .first_word()
            .ok_or(Error::ResponseParsing("Could not read auth challenge"))?;
        let decoded = base64::decode(challenge)?;

        let reply = authentication::cram_md5_secret(username, password, &decoded);
        let response = self
            .stream_mut()?
            .command(AuthResponseCommand::new(reply))
            .await?;
        auth_result(response)
    }

    async fn auth_xoauth2(&mut self, username: &str, token: &TokenSource) -> Result<(), Error> {
        let access_token = match token {
            TokenSource::Static(token) => token.clone(),
            TokenSource::Provider(provider) => provider.access_token().await?,
        };

        match self.xoauth2_attempt(username, &access_token).await {
            Err(Error::Auth(response)) => match token {
                // a fixed token cannot get better, give up
                TokenSource::Static(_) => Err(Error::Auth(response)),
                TokenSource::Provider(provider) => {
                    let pause = Duration::from_millis(rand::thread_rng().gen_range(1_000..5_000));
                    debug!(
                        "{} XOAUTH2 rejected, retrying with a fresh token in {:?}",
                        self.id, pause
                    );
                    sleep(pause).await;
                    let access_token = provider.refresh_token().await?;
                    self.xoauth2_attempt(username, &access_token).await
                }
            },
            other => other,
        }
    }

    async fn xoauth2_attempt(&mut self, username: &str, access_token: &str) -> Result<(), Error> {
        let secret = authentication::xoauth2_secret(username, access_token);
        let mut response = self
            .stream_mut()?
            .command(AuthCommand::new(Mechanism::Xoauth2, Some(secret)))
            .await?;
        if response.has_code(334) {
            // the challenge carries error details; an empty line makes
            // the next reply final
            response = self
                .stream_mut()?
                .command(AuthResponseCommand::new(String::new()))
                .await?;
        }
        auth_result(response)
    }

    async fn auth_ntlm(
        &mut self,
        username: &str,
        password: &str,
        domain: &str,
        workstation: &str,
        provider: &dyn NtlmProvider,
    ) -> Result<(), Error> {
        let negotiate = provider.negotiate_message(domain, workstation);
        let response = self
            .stream_mut()?
            .command(AuthCommand::new(Mechanism::Ntlm, Some(negotiate)))
            .await?;
        if !response.has_code(334) {
            return Err(Error::Auth(response));
        }
        let challenge = response
            .first_word()
            .ok_or(Error::ResponseParsing("Could not read auth challenge"))?;

        let authenticate =
            provider.authenticate_message(challenge, username, password, domain, workstation)?;
        let authenticate = authenticate
            .strip_prefix("NTLM ")
            .unwrap_or(authenticate.as_str())
            .to_string();

        let response = self
            .stream_mut()?
            .command(AuthResponseCommand::new(authenticate))
            .await?;
        auth_result(response)
    }

    /// Runs one envelope/DATA transaction and reports per-recipient
    /// results.
    ///
    /// Recipient rejections are not fatal while at least one recipient
    /// is accepted; they are carried in the returned [`SendInfo`].
    pub async fn send(&mut self, envelope: Envelope, message: Message) -> Result<SendInfo, Error> {
        self.expect_ready()?;
        self.stage = Stage::Sending;

        let result = self.send_inner(&envelope, message).await;
        match &result {
            Ok(_) => self.stage = Stage::Ready,
            Err(err) => match err.code() {
                // the transaction failed but the session is intact
                Some(ErrorCode::Envelope) | Some(ErrorCode::Message) | None => {
                    self.stage = Stage::Ready
                }
                _ => self.stage = Stage::Closed,
            },
        }
        result
    }

    async fn send_inner(
        &mut self,
        envelope: &Envelope,
        message: Message,
    ) -> Result<SendInfo, Error> {
        let supports_utf8 = self.supports_feature(Extension::SmtpUtfEight);
        let supports_8bit = self.supports_feature(Extension::EightBitMime);
        let supports_dsn = self.supports_feature(Extension::Dsn);
        let supports_size = self.supports_feature(Extension::Size);
        let pipelining = self.supports_feature(Extension::Pipelining);
        let max_size = self
            .server_info
            .as_ref()
            .map(|info| info.max_message_size)
            .unwrap_or(0);

        if let Some(size) = envelope.declared_size() {
            if max_size > 0 && size > max_size {
                return Err(Error::MessageTooBig {
                    size,
                    limit: max_size,
                });
            }
        }

        if let Some(dsn) = envelope.dsn_params() {
            if dsn.notify.map(|notify| notify.is_empty()).unwrap_or(false) {
                return Err(Error::InvalidDsn("DSN NOTIFY must select at least one event"));
            }
        }

        let using_smtputf8 = envelope.needs_smtputf8() && supports_utf8;
        let envelope_start = Instant::now();

        // MAIL FROM
        let mut mail_params = vec![];
        if using_smtputf8 {
            mail_params.push(MailParameter::SmtpUtfEight);
        }
        if envelope.wants_eight_bit_mime() && supports_8bit {
            mail_params.push(MailParameter::Body(MailBodyParameter::EightBitMime));
        }
        if supports_size {
            if let Some(size) = envelope.declared_size() {
                mail_params.push(MailParameter::Size(size));
            }
        }
        if supports_dsn {
            if let Some(dsn) = envelope.dsn_params() {
                if let Some(ret) = dsn.ret {
                    mail_params.push(MailParameter::Ret(ret));
                }
                if let Some(envid) = &dsn.envid {
                    mail_params.push(MailParameter::Envid(envid.clone()));
                }
            }
        }

        let response = self
            .stream_mut()?
            .command(MailCommand::new(envelope.from().cloned(), mail_params))
            .await?;
        if !response.is_positive() {
            if response.has_code(421) {
                return Err(Error::ServiceUnavailable(response));
            }
            let sender_non_ascii = envelope
                .from()
                .map(|from| !from.is_ascii())
                .unwrap_or(false);
            if using_smtputf8 && sender_non_ascii && response.has_code(550) {
                return Err(Error::InternationalizedMailbox {
                    command: "MAIL FROM",
                    response,
                });
            }
            return Err(Error::Envelope {
                command: "MAIL FROM",
                response,
            });
        }

        // RCPT TO, pipelined when the server allows it
        let rcpt_params = |_recipient: &EmailAddress| -> Vec<RcptParameter> {
            let mut params = vec![];
            if supports_dsn {
                if let Some(dsn) = envelope.dsn_params() {
                    if let Some(notify) = dsn.notify {
                        params.push(RcptParameter::Notify(notify));
                    }
                    if let Some(orcpt) = &dsn.orcpt {
                        params.push(RcptParameter::Orcpt(orcpt.clone()));
                    }
                }
            }
            params
        };

        let mut accepted = vec![];
        let mut rejected = vec![];
        let mut rejected_errors: Vec<RecipientError> = vec![];
        let mut last_response = None;

        if pipelining {
            for recipient in envelope.to() {
                let params = rcpt_params(recipient);
                self.stream_mut()?
                    .send_command(RcptCommand::new(recipient.clone(), params))
                    .await?;
            }
            for recipient in envelope.to() {
                let response = self.stream_mut()?.read_response().await?;
                sort_recipient(
                    recipient,
                    &response,
                    &mut accepted,
                    &mut rejected,
                    &mut rejected_errors,
                );
                last_response = Some(response);
            }
        } else {
            for recipient in envelope.to() {
                let params = rcpt_params(recipient);
                let response = self
                    .stream_mut()?
                    .command(RcptCommand::new(recipient.clone(), params))
                    .await?;
                debug!("{} to=<{}> {}", self.id, recipient, response.code);
                sort_recipient(
                    recipient,
                    &response,
                    &mut accepted,
                    &mut rejected,
                    &mut rejected_errors,
                );
                last_response = Some(response);
            }
        }

        if accepted.is_empty() {
            return Err(Error::AllRecipientsRejected(rejected_errors));
        }

        let envelope_time = envelope_start.elapsed();

        let last_response =
            last_response.ok_or(Error::Client("envelope has no recipients"))?;

        if self.config.envelope_only {
            return Ok(SendInfo {
                accepted,
                rejected,
                rejected_errors,
                response: last_response,
                envelope_time,
                message_time: None,
                message_size: None,
            });
        }

        // The body is buffered up front so an empty or failing source is
        // caught while the session can still recover with RSET.
        let mut message = message;
        let mut body = Vec::new();
        message
            .read_to_end(&mut body)
            .await
            .map_err(Error::Stream)?;
        if body.is_empty() {
            return Err(Error::EmptyMessage);
        }

        // DATA; some servers reply 250 instead of 354
        let response = self.stream_mut()?.command(DataCommand).await?;
        if !response.is_positive() {
            return Err(Error::Message(response));
        }

        let message_start = Instant::now();
        let message_size = self.stream_mut()?.message(&body[..]).await?;

        let response = if self.config.lmtp {
            // LMTP delivers one reply per accepted recipient
            let mut delivered = vec![];
            let mut last = None;
            for recipient in accepted.drain(..) {
                let response = self.stream_mut()?.read_response().await?;
                if response.is_positive() {
                    delivered.push(recipient);
                } else {
                    rejected.push(recipient.clone());
                    rejected_errors.push(RecipientError {
                        recipient,
                        response: response.clone(),
                    });
                }
                last = Some(response);
            }
            accepted = delivered;
            if accepted.is_empty() {
                return Err(Error::AllRecipientsRejected(rejected_errors));
            }
            last.ok_or(Error::Client("envelope has no recipients"))?
        } else {
            let response = self.stream_mut()?.read_response().await?;
            if !response.is_positive() {
                return Err(Error::Message(response));
            }
            response
        };

        debug!(
            "{} status=sent ({})",
            self.id,
            response.first_line().unwrap_or("no response")
        );

        Ok(SendInfo {
            accepted,
            rejected,
            rejected_errors,
            response,
            envelope_time,
            message_time: Some(message_start.elapsed()),
            message_size: Some(message_size),
        })
    }

    /// Aborts the current mail transaction, clearing any envelope state
    /// on the server.
    pub async fn reset(&mut self) -> Result<(), Error> {
        self.expect_ready()?;
        let response = self.stream_mut()?.command(RsetCommand).await?;
        if !response.is_positive() {
            return Err(Error::Reset(response));
        }
        Ok(())
    }

    /// Probes the connection without touching any state.
    pub async fn noop(&mut self) -> Result<(), Error> {
        self.expect_ready()?;
        let response = self.stream_mut()?.command(NoopCommand).await?;
        if !response.is_positive() {
            return Err(Error::ResponseParsing("unexpected response to NOOP"));
        }
        Ok(())
    }

    /// Polite shutdown: QUIT, then close.
    ///
    /// The goodbye reply is read leniently since many servers just drop
    /// the link.
    pub async fn quit(&mut self) -> Result<(), Error> {
        if self.stage != Stage::Closed {
            if let Some(stream) = self.stream.as_mut() {
                let _ = stream.command(QuitCommand).await;
            }
        }
        self.close().await
    }

    /// Immediate shutdown. Idempotent; the first call tears the
    /// transport down, later calls do nothing.
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.stage == Stage::Closed {
            return Ok(());
        }
        self.stage = Stage::Closed;
        self.server_info = None;
        if self.stream.take().is_some() {
            debug!("{} connection closed", self.id);
        }
        Ok(())
    }
}

impl SmtpConnection<NetworkStream> {
    /// Opens the transport and drives the connection to the ready
    /// state: banner, EHLO/LHLO and the optional STARTTLS upgrade with
    /// its re-EHLO.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, Error> {
        let mut connection = SmtpConnection::create(config);

        let port = connection.config.effective_port();
        let addr = resolve(&connection.config.server.host, port).await?;
        debug!("{} connecting to {}", connection.id, addr);

        let tls_parameters = match &connection.config.security {
            ClientSecurity::Wrapper(ref tls_parameters) => Some(tls_parameters),
            _ => None,
        };
        let stream = NetworkStream::connect(
            &addr,
            connection.config.local_addr,
            Some(connection.config.timeouts.connection),
            tls_parameters,
        )
        .await?;

        connection.attach(stream);
        if let Err(err) = connection.handshake().await {
            let _ = connection.close().await;
            return Err(err);
        }
        Ok(connection)
    }
}

impl<S: Read + Write + Unpin + Connector> SmtpConnection<S> {
    /// Runs the session handshake over an already-connected stream.
    pub async fn with_stream(config: ConnectionConfig, stream: S) -> Result<Self, Error> {
        let mut connection = SmtpConnection::create(config);
        connection.attach(stream);
        if let Err(err) = connection.handshake().await {
            let _ = connection.close().await;
            return Err(err);
        }
        Ok(connection)
    }

    fn attach(&mut self, stream: S) {
        self.secure = stream.is_encrypted();
        let mut stream = SmtpStream::new(stream, self.id.clone());
        stream.set_timeout(Some(self.config.timeouts.idle));
        self.stream = Some(stream);
        self.stage = Stage::Connected;
    }

    async fn handshake(&mut self) -> Result<(), Error> {
        let greeting_timeout = self.config.timeouts.greeting;
        let greeting = self
            .stream_mut()?
            .read_response_with_timeout(Some(&greeting_timeout))
            .await?;
        if !greeting.has_code(220) {
            if greeting.has_code(421) {
                return Err(Error::ServiceUnavailable(greeting));
            }
            return Err(Error::Greeting(greeting));
        }
        debug!(
            "{} greeted by {}",
            self.id,
            greeting.first_line().unwrap_or("")
        );

        self.hello().await?;
        self.try_tls().await?;

        self.stage = Stage::Ready;
        debug!("{} connection ready", self.id);
        Ok(())
    }

    async fn try_tls(&mut self) -> Result<(), Error> {
        if self.secure {
            return Ok(());
        }

        let advertised = self.supports_feature(Extension::StartTls);
        let (attempt, required) = match self.config.security {
            ClientSecurity::None | ClientSecurity::Wrapper(_) => (false, false),
            ClientSecurity::Opportunistic(_) => (advertised, false),
            ClientSecurity::Required(_) => (true, true),
        };
        if !attempt {
            return Ok(());
        }

        let response = self.stream_mut()?.command(StarttlsCommand).await?;
        if !response.is_positive() {
            if required {
                return Err(Error::StartTlsRefused(response));
            }
            debug!("{} STARTTLS refused, continuing in plaintext", self.id);
            return Ok(());
        }

        // After the 220 nothing more may be written or read on the
        // plaintext stream; it is consumed whole by the handshake.
        let stream = self
            .stream
            .take()
            .ok_or(Error::Connection("connection is not established"))?
            .into_inner();
        let tls_parameters: &ClientTlsParameters = match &self.config.security {
            ClientSecurity::Opportunistic(ref tls_parameters)
            | ClientSecurity::Required(ref tls_parameters) => tls_parameters,
            _ => return Err(Error::Client("STARTTLS attempted without TLS parameters")),
        };
        let upgraded = stream.upgrade_tls(tls_parameters).await?;
        self.attach(upgraded);
        debug!("{} connection encrypted", self.id);

        // the capability registry must be rebuilt on the new channel
        self.hello().await
    }
}

fn auth_result(response: Response) -> Result<(), Error> {
    match response.code.severity {
        Severity::PositiveCompletion => Ok(()),
        _ => Err(Error::Auth(response)),
    }
}

fn sort_recipient(
    recipient: &EmailAddress,
    response: &Response,
    accepted: &mut Vec<EmailAddress>,
    rejected: &mut Vec<EmailAddress>,
    rejected_errors: &mut Vec<RecipientError>,
) {
    if response.is_positive() {
        accepted.push(recipient.clone());
    } else {
        rejected.push(recipient.clone());
        rejected_errors.push(RecipientError {
            recipient: recipient.clone(),
            response: response.clone(),
        });
    }
}

fn connection_id() -> String {
    let bytes: [u8; 8] = rand::random();
    base64::encode(bytes)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, Error> {
    #[cfg(feature = "runtime-tokio")]
    let mut addresses = tokio::net::lookup_host((host, port)).await?;
    #[cfg(feature = "runtime-async-std")]
    let mut addresses = async_std::net::ToSocketAddrs::to_socket_addrs(&(host, port)).await?;

    addresses.next().ok_or(Error::Resolution)
}

async fn sleep(duration: Duration) {
    #[cfg(feature = "runtime-tokio")]
    tokio::time::sleep(duration).await;
    #[cfg(feature = "runtime-async-std")]
    async_std::task::sleep(duration).await;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::MockStream;
    use std::collections::HashSet;

    fn ready_connection(auth_mechanisms: Vec<Mechanism>) -> SmtpConnection<MockStream> {
        let mut connection =
            SmtpConnection::<MockStream>::create(ConnectionConfig::new("relay.test"));
        connection.server_info = Some(ServerInfo {
            name: "relay.test".to_string(),
            features: HashSet::new(),
            auth_mechanisms,
            max_message_size: 0,
        });
        connection.stage = Stage::Ready;
        connection
    }

    #[test]
    fn test_connection_id_shape() {
        let id = connection_id();
        assert!(!id.is_empty());
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_effective_port() {
        assert_eq!(ConnectionConfig::new("x.test").effective_port(), 25);
        assert_eq!(ConnectionConfig::new("x.test").port(2525).effective_port(), 2525);
        let secure = ConnectionConfig::new("x.test").security(ClientSecurity::Wrapper(
            ClientTlsParameters::new("x.test".to_string(), async_native_tls::TlsConnector::new()),
        ));
        assert_eq!(secure.effective_port(), 465);
    }

    #[test]
    fn test_mechanism_selection_prefers_advertised_order() {
        let credentials = Credentials::new("user".to_string(), "password".to_string());

        let connection = ready_connection(vec![Mechanism::Login, Mechanism::Plain]);
        assert_eq!(
            connection.select_mechanism(&credentials).unwrap(),
            Mechanism::Login
        );

        let connection = ready_connection(vec![Mechanism::Xoauth2]);
        assert_eq!(
            connection.select_mechanism(&credentials).unwrap(),
            Mechanism::Plain
        );
    }

    #[test]
    fn test_mechanism_selection_follows_credential_shape() {
        let connection = ready_connection(vec![Mechanism::Plain]);
        let credentials = Credentials::Xoauth2 {
            username: "user".to_string(),
            token: TokenSource::Static("token".to_string()),
        };
        assert_eq!(
            connection.select_mechanism(&credentials).unwrap(),
            Mechanism::Xoauth2
        );
    }

    #[test]
    fn test_mechanism_override_must_match_credentials() {
        let mut connection = ready_connection(vec![Mechanism::Plain]);
        connection.config = ConnectionConfig::new("relay.test").auth_method(Mechanism::Xoauth2);
        let credentials = Credentials::new("user".to_string(), "password".to_string());
        assert!(connection.select_mechanism(&credentials).is_err());

        connection.config = ConnectionConfig::new("relay.test").auth_method(Mechanism::CramMd5);
        assert_eq!(
            connection.select_mechanism(&credentials).unwrap(),
            Mechanism::CramMd5
        );
    }
}
