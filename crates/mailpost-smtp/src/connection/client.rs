//! Type-state SMTP client.
//!
//! Each protocol state is a distinct type, so commands can only be issued in
//! the order the submission session allows. In particular there is no way to
//! authenticate a [`Client<Plaintext>`]: it has to become a
//! [`Client<Secured>`] first.
//!
//! A negative reply at any step sends a best-effort `QUIT` and shuts the
//! connection down before the error is returned. Transport errors drop the
//! stream, which closes the socket.

use super::{ServerInfo, SmtpStream};
use crate::command::{Command, encode_data};
use crate::config::{Credentials, DEFAULT_CLIENT_NAME, TlsConfig};
use crate::error::{Error, Result};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyClass, ReplyCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::time::Duration;

/// Type-state marker for a greeted, unencrypted connection.
#[derive(Debug)]
pub struct Plaintext;

/// Type-state marker for an encrypted connection (implicit TLS or STARTTLS).
#[derive(Debug)]
pub struct Secured;

/// Type-state marker for authenticated state.
#[derive(Debug)]
pub struct Authenticated;

/// Type-state marker for an accepted `MAIL FROM`.
#[derive(Debug)]
pub struct SenderDeclared;

/// Type-state marker for at least one accepted `RCPT TO`.
#[derive(Debug)]
pub struct RecipientsDeclared;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct DataStreaming;

/// Type-state marker for a message accepted by the server.
#[derive(Debug)]
pub struct Delivered;

/// SMTP client with type-state pattern.
#[derive(Debug)]
pub struct Client<State> {
    stream: SmtpStream,
    server_info: ServerInfo,
    client_name: String,
    _state: PhantomData<State>,
}

impl Client<Plaintext> {
    /// Creates a client from a plaintext stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is already encrypted, if reading the
    /// greeting fails, or if the server does not greet with 220.
    pub async fn from_stream(stream: SmtpStream) -> Result<Self> {
        if stream.is_encrypted() {
            return Err(Error::Protocol(
                "Encrypted stream passed as plaintext; use Client::from_tls_stream".into(),
            ));
        }
        Self::greet(stream).await
    }

    /// Sends EHLO and discovers server capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if both EHLO and the HELO fallback fail.
    pub async fn ehlo(self, client_name: &str) -> Result<Self> {
        self.hello(client_name).await
    }

    /// Upgrades the connection to TLS using STARTTLS.
    ///
    /// The certificate is verified against `hostname`. EHLO is sent again on
    /// the encrypted channel and the capabilities learned before the upgrade
    /// are discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not advertised, if the server answers
    /// anything but 220, or if the TLS handshake fails. The connection is
    /// never left unencrypted.
    pub async fn starttls(
        self,
        hostname: &str,
        tls: &TlsConfig,
        handshake_timeout: Duration,
    ) -> Result<Client<Secured>> {
        if !self.server_info.supports_starttls() {
            return Err(self.abort(Error::NotSupported("STARTTLS".into())).await);
        }

        let (client, _) = self.expect(Command::StartTls, is_service_ready).await?;

        let Self {
            stream,
            server_info,
            client_name,
            ..
        } = client;
        let stream = stream
            .upgrade_to_tls(hostname, tls, handshake_timeout)
            .await?;

        let secured = Client::<Secured> {
            stream,
            server_info,
            client_name: client_name.clone(),
            _state: PhantomData,
        };
        secured.hello(&client_name).await
    }
}

impl Client<Secured> {
    /// Creates a client from an implicit-TLS stream and reads the greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is not encrypted, if reading the
    /// greeting fails, or if the server does not greet with 220.
    pub async fn from_tls_stream(stream: SmtpStream) -> Result<Self> {
        if !stream.is_encrypted() {
            return Err(Error::Protocol(
                "Plaintext stream passed as encrypted; use Client::from_stream".into(),
            ));
        }
        Self::greet(stream).await
    }

    /// Sends EHLO and discovers server capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if both EHLO and the HELO fallback fail.
    pub async fn ehlo(self, client_name: &str) -> Result<Self> {
        self.hello(client_name).await
    }

    /// Authenticates with username and password.
    ///
    /// Uses PLAIN, or LOGIN when that is the only usable mechanism the server
    /// advertises.
    ///
    /// # Errors
    ///
    /// Returns an error if no usable mechanism is advertised or the server
    /// rejects the credentials. The server's reply text is kept verbatim.
    pub async fn authenticate(self, credentials: &Credentials) -> Result<Client<Authenticated>> {
        let mechanism = match self.server_info.auth_mechanism() {
            Ok(mechanism) => mechanism,
            Err(e) => return Err(self.abort(e).await),
        };
        tracing::debug!(%mechanism, username = credentials.username(), "Authenticating");

        let client = match mechanism {
            AuthMechanism::Plain => {
                self.auth_plain(credentials.username(), credentials.password())
                    .await?
            }
            AuthMechanism::Login => {
                self.auth_login(credentials.username(), credentials.password())
                    .await?
            }
        };
        Ok(client.transition())
    }

    async fn auth_plain(self, username: &str, password: &str) -> Result<Self> {
        // PLAIN response: \0username\0password
        let encoded = STANDARD.encode(format!("\0{username}\0{password}"));
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some(encoded),
        };
        let (client, _) = self.expect(cmd, Reply::is_success).await?;
        Ok(client)
    }

    async fn auth_login(self, username: &str, password: &str) -> Result<Self> {
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Login,
            initial_response: None,
        };
        let (client, _) = self.expect(cmd, is_auth_challenge).await?;

        let cmd = Command::AuthResponse(STANDARD.encode(username));
        let (client, _) = client.expect(cmd, is_auth_challenge).await?;

        let cmd = Command::AuthResponse(STANDARD.encode(password));
        let (client, _) = client.expect(cmd, Reply::is_success).await?;
        Ok(client)
    }
}

impl Client<Authenticated> {
    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(self, from: Address) -> Result<Client<SenderDeclared>> {
        let (client, _) = self
            .expect(Command::MailFrom { from }, Reply::is_success)
            .await?;
        Ok(client.transition())
    }
}

impl Client<SenderDeclared> {
    /// Adds the first recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(self, to: Address) -> Result<Client<RecipientsDeclared>> {
        let (client, _) = self
            .expect(Command::RcptTo { to }, Reply::is_success)
            .await?;
        Ok(client.transition())
    }
}

impl Client<RecipientsDeclared> {
    /// Adds another recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(self, to: Address) -> Result<Self> {
        let (client, _) = self
            .expect(Command::RcptTo { to }, Reply::is_success)
            .await?;
        Ok(client)
    }

    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not answer DATA with 354.
    pub async fn data(self) -> Result<Client<DataStreaming>> {
        let (client, _) = self.expect(Command::Data, is_start_data).await?;
        Ok(client.transition())
    }
}

impl Client<DataStreaming> {
    /// Sends the message content and completes the transaction.
    ///
    /// The message is dot-stuffed and CRLF-normalized; the terminating "."
    /// line is added automatically. Returns the server's acceptance reply.
    ///
    /// # Errors
    ///
    /// Returns an error if writing the message fails or the server rejects it.
    pub async fn send_message(mut self, message: &[u8]) -> Result<(Client<Delivered>, Reply)> {
        let payload = encode_data(message);
        tracing::trace!(bytes = payload.len(), "C: <message data>");
        self.stream.write_all(&payload).await?;

        let reply = self.stream.read_reply().await?;
        tracing::trace!(%reply, "S:");

        if !reply.is_success() {
            return Err(self.abort(Error::from_reply(&reply)).await);
        }

        Ok((self.transition(), reply))
    }
}

// Common implementation for all states
impl<S> Client<S> {
    /// Server hostname and the capabilities from the latest EHLO.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Returns true if the channel is encrypted.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.stream.is_encrypted()
    }

    async fn greet(mut stream: SmtpStream) -> Result<Self> {
        let greeting = stream.read_reply().await?;

        // Extract hostname from greeting (first word after code)
        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();

        let client = Self {
            stream,
            server_info: ServerInfo {
                hostname,
                extensions: HashSet::new(),
            },
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            _state: PhantomData,
        };

        if !is_service_ready(&greeting) {
            return Err(client.abort(Error::from_reply(&greeting)).await);
        }
        tracing::debug!(server = %client.server_info.hostname, "Server greeting received");
        Ok(client)
    }

    /// EHLO, falling back to HELO when the server does not know EHLO.
    async fn hello(mut self, client_name: &str) -> Result<Self> {
        self.client_name = client_name.to_string();

        let cmd = Command::Ehlo {
            hostname: client_name.to_string(),
        };
        let reply = self.send_command(&cmd).await?;

        if reply.is_success() {
            // Skip the first line, which is the server's greeting text
            self.server_info.extensions = reply
                .message
                .iter()
                .skip(1)
                .map(|line| Extension::parse(line))
                .collect();
            return Ok(self);
        }

        if reply.code.class() != ReplyClass::PermanentNegative {
            return Err(self.abort(Error::from_reply(&reply)).await);
        }

        tracing::debug!(code = %reply.code, "EHLO refused, falling back to HELO");
        let cmd = Command::Helo {
            hostname: client_name.to_string(),
        };
        let (mut client, _) = self.expect(cmd, Reply::is_success).await?;
        client.server_info.extensions.clear();
        Ok(client)
    }

    /// Sends a command and hands back the client if `accept` approves the reply.
    async fn expect(mut self, cmd: Command, accept: fn(&Reply) -> bool) -> Result<(Self, Reply)> {
        let reply = self.send_command(&cmd).await?;
        if accept(&reply) {
            Ok((self, reply))
        } else {
            Err(self.abort(Error::from_reply(&reply)).await)
        }
    }

    async fn send_command(&mut self, cmd: &Command) -> Result<Reply> {
        tracing::trace!(command = ?cmd, "C:");
        self.stream.write_all(&cmd.serialize()).await?;
        let reply = self.stream.read_reply().await?;
        tracing::trace!(%reply, "S:");
        Ok(reply)
    }

    /// Best-effort `QUIT` and shutdown after a failed step.
    async fn abort(mut self, error: Error) -> Error {
        tracing::debug!(%error, "Closing connection after failure");
        if let Err(e) = self.send_command(&Command::Quit).await {
            tracing::debug!(error = %e, "QUIT after failure not acknowledged");
        }
        self.stream.shutdown().await;
        error
    }

    fn transition<T>(self) -> Client<T> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            client_name: self.client_name,
            _state: PhantomData,
        }
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails. The connection is closed
    /// either way.
    pub async fn quit(mut self) -> Result<()> {
        let result = self.send_command(&Command::Quit).await;
        self.stream.shutdown().await;

        let reply = result?;
        if !reply.is_success() {
            return Err(Error::from_reply(&reply));
        }
        Ok(())
    }
}

fn is_service_ready(reply: &Reply) -> bool {
    reply.code == ReplyCode::SERVICE_READY
}

fn is_auth_challenge(reply: &Reply) -> bool {
    reply.code == ReplyCode::AUTH_CONTINUE
}

fn is_start_data(reply: &Reply) -> bool {
    reply.code == ReplyCode::START_DATA
}
