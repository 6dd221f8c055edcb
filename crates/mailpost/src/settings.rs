//! Turns parsed flags into a session configuration and a message.

use std::time::Duration;

use mailpost_smtp::{
    Credentials, Endpoint, Error, Mail, Result, Security, SessionConfig, TlsConfig,
};

use crate::cli::Cli;

/// Everything needed for one send.
#[derive(Debug)]
pub struct Settings {
    pub config: SessionConfig,
    pub mail: Mail,
}

impl Settings {
    /// Validates the flags. Nothing here touches the network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the host or username is missing, the
    /// message is incomplete, or the CA file cannot be loaded, and
    /// [`Error::InvalidAddress`] for a malformed sender or recipient.
    pub fn resolve(cli: Cli) -> Result<Self> {
        let host = cli.host.unwrap_or_default();
        let username = cli.user.unwrap_or_default();
        if host.trim().is_empty() || username.trim().is_empty() {
            return Err(Error::Config(
                "SMTP server host, port and username required".into(),
            ));
        }

        let mut tls = TlsConfig::default();
        if let Some(path) = &cli.ca_cert {
            let added = tls.add_pem_file(path)?;
            tracing::debug!(path = %path.display(), added, "Loaded CA certificates");
        }

        let config = SessionConfig::builder(
            Endpoint::new(host.trim(), cli.port)?,
            Credentials::new(username.trim(), cli.password)?,
        )
        .security(Security::from_direct_tls(cli.ssl))
        .io_timeout(Duration::from_secs(cli.timeout))
        .tls(tls)
        .build()?;

        let mail = Mail::builder()
            .sender(cli.sender.unwrap_or_default().trim())
            .recipients(cli.recipients.iter().map(|r| r.trim()))
            .subject(cli.subject.unwrap_or_default())
            .body(cli.body.unwrap_or_default())
            .build()?;

        Ok(Self { config, mail })
    }
}
