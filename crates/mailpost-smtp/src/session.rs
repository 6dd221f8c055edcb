//! SMTP session state machine.
//!
//! A [`Session`] performs one submission over one connection, moving through
//! the states below in strict order with no retries:
//!
//! ```text
//! Disconnected → Connected → SecureChannelEstablished → Authenticated
//!   → SenderDeclared → RecipientsDeclared → DataStreaming → Completed
//! ```
//!
//! The first failure moves the session to [`State::Failed`] with the step
//! that failed, closes the connection, and is returned to the caller.

use std::fmt;

use crate::config::{Security, SessionConfig};
use crate::connection::{Client, Plaintext, Secured, connect, connect_tls};
use crate::error::{Error, Result};
use crate::message::Mail;
use crate::types::{Address, Reply};

/// Protocol step of a session, used to report where a failure happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Opening the transport and reading the greeting.
    Connect,
    /// Upgrading the plaintext connection with STARTTLS.
    StartTls,
    /// Credential exchange.
    Authenticate,
    /// Declaring the sender.
    MailFrom,
    /// Declaring one recipient.
    RcptTo(String),
    /// Asking permission to send the message.
    Data,
    /// Writing the message and the end-of-data marker.
    Transfer,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::StartTls => f.write_str("STARTTLS"),
            Self::Authenticate => f.write_str("AUTH"),
            Self::MailFrom => f.write_str("MAIL FROM"),
            Self::RcptTo(recipient) => write!(f, "RCPT TO <{recipient}>"),
            Self::Data => f.write_str("DATA"),
            Self::Transfer => f.write_str("message transfer"),
        }
    }
}

/// Session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// No connection yet.
    Disconnected,
    /// Transport open, greeting and EHLO exchanged.
    Connected,
    /// Channel encrypted, by implicit TLS or STARTTLS.
    SecureChannelEstablished,
    /// Credentials accepted.
    Authenticated,
    /// `MAIL FROM` accepted.
    SenderDeclared,
    /// Every `RCPT TO` accepted.
    RecipientsDeclared,
    /// `DATA` accepted; the message is being written.
    DataStreaming,
    /// Message accepted by the server.
    Completed,
    /// Session aborted at the given step.
    Failed(Step),
}

impl State {
    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Disconnected"),
            Self::Connected => f.write_str("Connected"),
            Self::SecureChannelEstablished => f.write_str("SecureChannelEstablished"),
            Self::Authenticated => f.write_str("Authenticated"),
            Self::SenderDeclared => f.write_str("SenderDeclared"),
            Self::RecipientsDeclared => f.write_str("RecipientsDeclared"),
            Self::DataStreaming => f.write_str("DataStreaming"),
            Self::Completed => f.write_str("Completed"),
            Self::Failed(step) => write!(f, "Failed({step})"),
        }
    }
}

/// Proof of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    reply: Reply,
    recipients: usize,
}

impl Receipt {
    /// The server's reply to the end-of-data marker, usually with a queue id.
    #[must_use]
    pub const fn reply(&self) -> &Reply {
        &self.reply
    }

    /// Number of recipients the server accepted.
    #[must_use]
    pub const fn recipients(&self) -> usize {
        self.recipients
    }
}

/// Connection right after the transport was opened.
enum Opened {
    Plaintext(Client<Plaintext>),
    Encrypted(Client<Secured>),
}

/// One send operation over one connection.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    mail: Mail,
    sender: Address,
    recipients: Vec<Address>,
    history: Vec<State>,
}

impl Session {
    /// Creates a session.
    ///
    /// An empty sender falls back to the authenticated username. Envelope
    /// addresses are checked here, before any network activity.
    ///
    /// # Errors
    ///
    /// Returns an error if the sender or a recipient cannot be used as an
    /// envelope address.
    pub fn new(config: SessionConfig, mail: Mail) -> Result<Self> {
        let mail = mail.with_default_sender(config.credentials().username());
        let sender = Address::new(mail.sender())?;
        let recipients = mail
            .recipients()
            .iter()
            .map(|r| Address::new(r.as_str()))
            .collect::<Result<Vec<_>>>()?;
        if recipients.is_empty() {
            return Err(Error::Config("at least one recipient is required".into()));
        }

        Ok(Self {
            config,
            mail,
            sender,
            recipients,
            history: vec![State::Disconnected],
        })
    }

    /// The message, with the sender resolved.
    #[must_use]
    pub const fn mail(&self) -> &Mail {
        &self.mail
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &State {
        self.history.last().unwrap_or(&State::Disconnected)
    }

    /// Every state visited so far, in order, starting with `Disconnected`.
    #[must_use]
    pub fn history(&self) -> &[State] {
        &self.history
    }

    /// Runs the session to completion.
    ///
    /// # Errors
    ///
    /// Returns the first failure, annotated with the [`Step`] it happened in.
    /// A session can only be sent once.
    pub async fn send(&mut self) -> Result<Receipt> {
        if *self.state() != State::Disconnected {
            return Err(Error::Protocol(format!(
                "session already used (state {})",
                self.state()
            )));
        }

        let result = self.run().await;
        if let Err(error) = &result {
            let step = error.step().cloned().unwrap_or(Step::Connect);
            tracing::debug!(%step, %error, "SMTP session failed");
            self.advance(State::Failed(step));
        }
        result
    }

    async fn run(&mut self) -> Result<Receipt> {
        let opened = self.open().await.map_err(|e| e.during(Step::Connect))?;
        self.advance(State::Connected);

        let client = match opened {
            Opened::Encrypted(client) => client,
            Opened::Plaintext(client) => client
                .starttls(
                    self.config.endpoint().host(),
                    self.config.tls(),
                    self.config.connect_timeout(),
                )
                .await
                .map_err(|e| e.during(Step::StartTls))?,
        };
        if !client.is_encrypted() {
            return Err(Error::Protocol("Channel is not encrypted".into()).during(Step::StartTls));
        }
        tracing::debug!(server = %client.server_info().hostname, "Secure channel established");
        self.advance(State::SecureChannelEstablished);

        let client = client
            .authenticate(self.config.credentials())
            .await
            .map_err(|e| e.during(Step::Authenticate))?;
        self.advance(State::Authenticated);

        let client = client
            .mail_from(self.sender.clone())
            .await
            .map_err(|e| e.during(Step::MailFrom))?;
        self.advance(State::SenderDeclared);

        let (first, rest) = self
            .recipients
            .split_first()
            .ok_or_else(|| Error::Config("at least one recipient is required".into()))?;
        let mut client = client
            .rcpt_to(first.clone())
            .await
            .map_err(|e| e.during(Step::RcptTo(first.to_string())))?;
        for recipient in rest {
            client = client
                .rcpt_to(recipient.clone())
                .await
                .map_err(|e| e.during(Step::RcptTo(recipient.to_string())))?;
        }
        self.advance(State::RecipientsDeclared);

        let client = client.data().await.map_err(|e| e.during(Step::Data))?;
        self.advance(State::DataStreaming);

        let payload = self.mail.compose();
        let (client, reply) = client
            .send_message(&payload)
            .await
            .map_err(|e| e.during(Step::Transfer))?;
        tracing::info!(
            code = %reply.code,
            status = reply.enhanced_status().unwrap_or("-"),
            "Message accepted"
        );

        if let Err(e) = client.quit().await {
            tracing::warn!(error = %e, "QUIT failed after delivery");
        }
        self.advance(State::Completed);

        Ok(Receipt {
            reply,
            recipients: self.recipients.len(),
        })
    }

    /// Opens the transport using the configured security mode and exchanges
    /// greeting and EHLO.
    async fn open(&self) -> Result<Opened> {
        let endpoint = self.config.endpoint();
        let name = self.config.client_name();
        tracing::info!(%endpoint, security = %self.config.security(), "Connecting");

        match self.config.security() {
            Security::Implicit => {
                let stream = connect_tls(
                    endpoint,
                    self.config.tls(),
                    self.config.connect_timeout(),
                    self.config.io_timeout(),
                )
                .await?;
                let client = Client::from_tls_stream(stream).await?.ehlo(name).await?;
                Ok(Opened::Encrypted(client))
            }
            Security::StartTls => {
                let stream = connect(
                    endpoint,
                    self.config.connect_timeout(),
                    self.config.io_timeout(),
                )
                .await?;
                let client = Client::from_stream(stream).await?.ehlo(name).await?;
                Ok(Opened::Plaintext(client))
            }
        }
    }

    fn advance(&mut self, next: State) {
        tracing::debug!(from = %self.state(), to = %next, "SMTP session transition");
        self.history.push(next);
    }
}

/// Sends one message: builds a [`Session`] and runs it.
///
/// # Errors
///
/// Returns the first configuration, transport or protocol failure.
pub async fn send_mail(config: SessionConfig, mail: Mail) -> Result<Receipt> {
    Session::new(config, mail)?.send().await
}
