//! Low-level SMTP stream handling.

use std::io;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;

use crate::config::{Endpoint, TlsConfig};
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::Reply;

/// Maximum reply line length, terminator included.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Upper bound on the lines read for one reply, blank lines included.
const MAX_REPLY_LINES: usize = 512;

/// SMTP stream (TCP or TLS) with a per-operation I/O timeout.
#[derive(Debug)]
pub struct SmtpStream {
    channel: Channel,
    io_timeout: Duration,
}

#[derive(Debug)]
enum Channel {
    Tcp(BufReader<TcpStream>),
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
}

impl SmtpStream {
    /// Returns true once the channel is encrypted.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        matches!(self.channel, Channel::Tls(_))
    }

    /// Reads one complete, possibly multi-line, reply.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails, times out, or hits end of stream,
    /// or if the reply is oversized or malformed.
    pub async fn read_reply(&mut self) -> Result<Reply> {
        let limit = self.io_timeout;
        match &mut self.channel {
            Channel::Tcp(reader) => read_reply(reader, limit).await,
            Channel::Tls(reader) => read_reply(reader.as_mut(), limit).await,
        }
    }

    /// Writes data to the stream and flushes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or times out.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let limit = self.io_timeout;
        let write = async {
            match &mut self.channel {
                Channel::Tcp(reader) => {
                    reader.get_mut().write_all(data).await?;
                    reader.get_mut().flush().await
                }
                Channel::Tls(reader) => {
                    reader.get_mut().write_all(data).await?;
                    reader.get_mut().flush().await
                }
            }
        };
        timeout(limit, write)
            .await
            .map_err(|_| Error::Timeout(limit))??;
        Ok(())
    }

    /// Upgrades a TCP stream to TLS after a successful `STARTTLS`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is already encrypted, if the server
    /// sent data ahead of the handshake, or if the TLS handshake fails.
    pub async fn upgrade_to_tls(
        self,
        hostname: &str,
        tls: &TlsConfig,
        handshake_timeout: Duration,
    ) -> Result<Self> {
        let reader = match self.channel {
            Channel::Tcp(reader) => reader,
            Channel::Tls(_) => return Err(Error::Protocol("Already using TLS".into())),
        };

        // Plaintext bytes buffered after the 220 reply must not leak into the
        // encrypted session.
        if !reader.buffer().is_empty() {
            return Err(Error::Protocol(
                "Server sent unexpected data after STARTTLS reply".into(),
            ));
        }

        let tls_stream = handshake(reader.into_inner(), hostname, tls, handshake_timeout).await?;
        Ok(Self {
            channel: Channel::Tls(Box::new(BufReader::new(tls_stream))),
            io_timeout: self.io_timeout,
        })
    }

    /// Closes the connection, sending a TLS `close_notify` first when encrypted.
    /// Errors are ignored: the peer may already be gone.
    pub async fn shutdown(&mut self) {
        let limit = self.io_timeout;
        let result = match &mut self.channel {
            Channel::Tcp(reader) => timeout(limit, reader.get_mut().shutdown()).await,
            Channel::Tls(reader) => timeout(limit, reader.get_mut().shutdown()).await,
        };
        if let Ok(Err(e)) = result {
            tracing::debug!(error = %e, "Connection shutdown failed");
        }
    }
}

/// Connects to an SMTP server over plain TCP.
///
/// # Errors
///
/// Returns an error if the connection fails or times out.
pub async fn connect(
    endpoint: &Endpoint,
    connect_timeout: Duration,
    io_timeout: Duration,
) -> Result<SmtpStream> {
    let tcp_stream = open_tcp(endpoint, connect_timeout).await?;
    Ok(SmtpStream {
        channel: Channel::Tcp(BufReader::new(tcp_stream)),
        io_timeout,
    })
}

/// Connects to an SMTP server over TLS (implicit TLS on port 465).
///
/// The server certificate is verified against `endpoint.host()`.
///
/// # Errors
///
/// Returns an error if the connection or TLS handshake fails or times out.
pub async fn connect_tls(
    endpoint: &Endpoint,
    tls: &TlsConfig,
    connect_timeout: Duration,
    io_timeout: Duration,
) -> Result<SmtpStream> {
    let tcp_stream = open_tcp(endpoint, connect_timeout).await?;
    let tls_stream = handshake(tcp_stream, endpoint.host(), tls, connect_timeout).await?;
    Ok(SmtpStream {
        channel: Channel::Tls(Box::new(BufReader::new(tls_stream))),
        io_timeout,
    })
}

async fn open_tcp(endpoint: &Endpoint, limit: Duration) -> Result<TcpStream> {
    let addr = endpoint.address();
    tracing::debug!(%addr, "Opening TCP connection");
    let stream = timeout(limit, TcpStream::connect(&addr))
        .await
        .map_err(|_| Error::Timeout(limit))??;
    Ok(stream)
}

async fn handshake(
    tcp_stream: TcpStream,
    hostname: &str,
    tls: &TlsConfig,
    limit: Duration,
) -> Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::InvalidServerName(hostname.to_string()))?;

    let tls_stream = timeout(limit, tls.connector().connect(server_name, tcp_stream))
        .await
        .map_err(|_| Error::Timeout(limit))?
        .map_err(handshake_error)?;
    tracing::debug!(%hostname, "TLS handshake complete");
    Ok(tls_stream)
}

/// tokio-rustls reports handshake failures as I/O errors wrapping the
/// underlying [`rustls::Error`].
fn handshake_error(err: io::Error) -> Error {
    match err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        Some(tls_err) => Error::Tls(tls_err.clone()),
        None => Error::Io(err),
    }
}

/// Reads reply lines up to the last one, skipping blank lines, and parses
/// them.
async fn read_reply<R>(reader: &mut R, limit: Duration) -> Result<Reply>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    for _ in 0..MAX_REPLY_LINES {
        let line = read_line(reader, limit).await?;
        if line.is_empty() {
            continue;
        }
        let is_last = is_last_reply_line(&line);
        lines.push(line);
        if is_last {
            return parse_reply(&lines);
        }
    }
    Err(Error::Protocol(format!(
        "Reply exceeds {MAX_REPLY_LINES} lines"
    )))
}

/// Reads one line, bounded by `limit` and [`MAX_LINE_LENGTH`], and strips
/// the line terminator.
async fn read_line<R>(reader: &mut R, limit: Duration) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut bounded = (&mut *reader).take(MAX_LINE_LENGTH as u64 + 1);
    let read = timeout(limit, bounded.read_until(b'\n', &mut line))
        .await
        .map_err(|_| Error::Timeout(limit))??;
    if read == 0 {
        return Err(Error::ConnectionClosed);
    }
    if line.len() > MAX_LINE_LENGTH {
        return Err(Error::Protocol(format!(
            "Reply line exceeds {MAX_LINE_LENGTH} bytes"
        )));
    }
    let line = String::from_utf8(line)
        .map_err(|_| Error::Protocol("Reply line is not valid UTF-8".into()))?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
