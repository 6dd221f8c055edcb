//! Error types for SMTP operations.

use std::io;
use std::time::Duration;

use crate::session::Step;
use crate::types::{Reply, ReplyClass, ReplyCode};

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid configuration, detected before any network activity.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Host cannot be used for certificate verification.
    #[error("Invalid server name: {0}")]
    InvalidServerName(String),

    /// Connect, handshake, read or write did not finish in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Server closed the connection while a reply was expected.
    #[error("Connection closed by server")]
    ConnectionClosed,

    /// Server returned error response.
    #[error("SMTP error {code}: {message}")]
    SmtpError {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Protocol error (unexpected or malformed response).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Feature not supported by server.
    #[error("Server does not support {0}")]
    NotSupported(String),

    /// A failure annotated with the session step it happened in.
    #[error("{step} failed: {cause}")]
    Step {
        /// Step that was being performed.
        step: Step,
        /// Underlying failure.
        cause: Box<Self>,
    },
}

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid input; no connection was attempted.
    Configuration,
    /// Connecting, TLS handshake, timeouts, lost connection.
    Transport,
    /// Negative or unexpected server reply.
    Protocol,
    /// Transport failure while the message payload was being written.
    Io,
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::SmtpError {
            code,
            message: message.into(),
        }
    }

    /// Creates an SMTP error carrying the server's reply verbatim.
    #[must_use]
    pub fn from_reply(reply: &Reply) -> Self {
        Self::smtp_error(reply.code.as_u16(), reply.message_text())
    }

    /// Annotates the error with the step it happened in.
    #[must_use]
    pub fn during(self, step: Step) -> Self {
        Self::Step {
            step,
            cause: Box::new(self),
        }
    }

    /// Returns the step the error happened in, if known.
    #[must_use]
    pub const fn step(&self) -> Option<&Step> {
        match self {
            Self::Step { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Returns the error without its step annotation.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Step { cause, .. } => cause.root(),
            other => other,
        }
    }

    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::InvalidAddress(_) => ErrorKind::Configuration,
            Self::Io(_)
            | Self::Tls(_)
            | Self::InvalidServerName(_)
            | Self::Timeout(_)
            | Self::ConnectionClosed => ErrorKind::Transport,
            Self::SmtpError { .. } | Self::Protocol(_) | Self::NotSupported(_) => {
                ErrorKind::Protocol
            }
            Self::Step {
                step: Step::Transfer,
                cause,
            } if cause.kind() == ErrorKind::Transport => ErrorKind::Io,
            Self::Step { cause, .. } => cause.kind(),
        }
    }

    /// Returns the server reply code, if the server rejected a command.
    #[must_use]
    pub fn reply_code(&self) -> Option<u16> {
        match self.root() {
            Self::SmtpError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.reply_class() == Some(ReplyClass::PermanentNegative)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.reply_class() == Some(ReplyClass::TransientNegative)
    }

    fn reply_class(&self) -> Option<ReplyClass> {
        self.reply_code().map(|code| ReplyCode::new(code).class())
    }
}
