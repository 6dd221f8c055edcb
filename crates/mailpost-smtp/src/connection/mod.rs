//! SMTP connection management with type-state pattern.

mod client;
mod stream;

pub use client::{
    Authenticated, Client, DataStreaming, Delivered, Plaintext, RecipientsDeclared, Secured,
    SenderDeclared,
};
pub use stream::{SmtpStream, connect, connect_tls};

use crate::error::{Error, Result};
use crate::types::{AuthMechanism, Extension};
use std::collections::HashSet;

/// Server capabilities from EHLO response.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Supported extensions. Empty when the server only answered `HELO`.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Returns the advertised authentication mechanisms, if the server sent
    /// an `AUTH` keyword at all.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Option<&[AuthMechanism]> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Auth(mechanisms) => Some(mechanisms.as_slice()),
            _ => None,
        })
    }

    /// Picks the mechanism for the credential exchange.
    ///
    /// PLAIN is preferred. Servers that advertise no `AUTH` line get PLAIN
    /// too and decide for themselves; LOGIN is used only when it is the sole
    /// usable mechanism.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if the server advertises `AUTH` with
    /// neither PLAIN nor LOGIN.
    pub fn auth_mechanism(&self) -> Result<AuthMechanism> {
        match self.auth_mechanisms() {
            None => Ok(AuthMechanism::Plain),
            Some(mechanisms) if mechanisms.contains(&AuthMechanism::Plain) => {
                Ok(AuthMechanism::Plain)
            }
            Some(mechanisms) if mechanisms.contains(&AuthMechanism::Login) => {
                Ok(AuthMechanism::Login)
            }
            Some(_) => Err(Error::NotSupported("AUTH PLAIN or AUTH LOGIN".into())),
        }
    }
}
