//! Session configuration types.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::CertificateDer;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::error::{Error, Result};

/// Name sent in `EHLO` unless configured otherwise.
pub const DEFAULT_CLIENT_NAME: &str = "localhost";

/// Mail server host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host is empty or the port is zero.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into().trim().to_string();
        if host.is_empty() {
            return Err(Error::Config("SMTP server host is required".into()));
        }
        if port == 0 {
            return Err(Error::Config("SMTP server port must be non-zero".into()));
        }
        Ok(Self { host, port })
    }

    /// Server hostname, also used for certificate verification.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Server port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the `host:port` connection target.
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Username and password for the credential exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Creates credentials. The password may be empty; the server decides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the username is empty.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let username = username.into();
        if username.trim().is_empty() {
            return Err(Error::Config("SMTP username is required".into()));
        }
        Ok(Self {
            username,
            password: password.into(),
        })
    }

    /// Login name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How the channel gets encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// Start with plaintext, upgrade with STARTTLS (port 587).
    #[default]
    StartTls,
    /// TLS from the start (port 465).
    Implicit,
}

impl Security {
    /// Maps the "use direct TLS" switch onto a security mode.
    #[must_use]
    pub const fn from_direct_tls(direct: bool) -> Self {
        if direct { Self::Implicit } else { Self::StartTls }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartTls => f.write_str("STARTTLS"),
            Self::Implicit => f.write_str("SSL/TLS"),
        }
    }
}

/// Trust anchors used to verify the server certificate.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    roots: RootCertStore,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            roots: RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            },
        }
    }
}

impl TlsConfig {
    /// Trusts an additional DER certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be parsed.
    pub fn add_root_certificate(&mut self, cert: CertificateDer<'static>) -> Result<()> {
        self.roots.add(cert)?;
        Ok(())
    }

    /// Trusts every certificate in a PEM file and returns how many were added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or holds no
    /// usable certificate.
    pub fn add_pem_file(&mut self, path: &Path) -> Result<usize> {
        let file = File::open(path).map_err(|e| {
            Error::Config(format!("cannot open CA certificate {}: {e}", path.display()))
        })?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(file))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| {
                Error::Config(format!("cannot read CA certificate {}: {e}", path.display()))
            })?;
        if certs.is_empty() {
            return Err(Error::Config(format!(
                "no certificate found in {}",
                path.display()
            )));
        }

        let count = certs.len();
        for cert in certs {
            self.add_root_certificate(cert).map_err(|e| {
                Error::Config(format!("invalid CA certificate in {}: {e}", path.display()))
            })?;
        }
        Ok(count)
    }

    /// Number of trusted roots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Returns true if no root is trusted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub(crate) fn connector(&self) -> TlsConnector {
        let config = ClientConfig::builder()
            .with_root_certificates(self.roots.clone())
            .with_no_client_auth();

        TlsConnector::from(Arc::new(config))
    }
}

/// Everything a session needs besides the message.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    endpoint: Endpoint,
    credentials: Credentials,
    security: Security,
    client_name: String,
    connect_timeout: Duration,
    io_timeout: Duration,
    tls: TlsConfig,
}

impl SessionConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(endpoint: Endpoint, credentials: Credentials) -> SessionConfigBuilder {
        SessionConfigBuilder::new(endpoint, credentials)
    }

    /// Server endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Credentials for authentication.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Security mode.
    #[must_use]
    pub const fn security(&self) -> Security {
        self.security
    }

    /// Name sent in `EHLO`.
    #[must_use]
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Bound on TCP connect plus TLS handshake.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Bound on each reply read and each write.
    #[must_use]
    pub const fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// Trust anchors for the server certificate.
    #[must_use]
    pub const fn tls(&self) -> &TlsConfig {
        &self.tls
    }
}

/// Builder for session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    endpoint: Endpoint,
    credentials: Credentials,
    security: Security,
    client_name: String,
    connect_timeout: Duration,
    io_timeout: Duration,
    tls: TlsConfig,
}

impl SessionConfigBuilder {
    /// Creates a new builder using STARTTLS and default timeouts.
    #[must_use]
    pub fn new(endpoint: Endpoint, credentials: Credentials) -> Self {
        Self {
            endpoint,
            credentials,
            security: Security::default(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            connect_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(60),
            tls: TlsConfig::default(),
        }
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the name sent in `EHLO`.
    #[must_use]
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the I/O timeout.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Sets the trust anchors.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the client name cannot be sent in `EHLO`
    /// or a timeout is zero.
    pub fn build(self) -> Result<SessionConfig> {
        if self.client_name.is_empty()
            || self
                .client_name
                .chars()
                .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(Error::Config(format!(
                "invalid client name {:?}",
                self.client_name
            )));
        }
        if self.connect_timeout.is_zero() || self.io_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }

        Ok(SessionConfig {
            endpoint: self.endpoint,
            credentials: self.credentials,
            security: self.security,
            client_name: self.client_name,
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
            tls: self.tls,
        })
    }
}
