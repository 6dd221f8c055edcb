//! In-process SMTP server for exercising the client over loopback.
//!
//! The server accepts a single connection, speaks just enough SMTP for a
//! submission session, performs real TLS (STARTTLS or implicit) with a
//! self-signed certificate for `localhost`, and records every line it
//! receives together with whether the channel was encrypted at the time.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;

use mailpost_smtp::{Credentials, Endpoint, Security, SessionConfig, TlsConfig};

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "secret";

/// How the fake server behaves.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub implicit_tls: bool,
    pub greet: bool,
    pub advertise_starttls: bool,
    pub reject_starttls: bool,
    /// Answer to STARTTLS in place of the 220 go-ahead; TLS is not started.
    pub starttls_reply: Option<&'static str>,
    /// Mechanisms listed after `AUTH` in the EHLO reply; empty for none.
    pub auth: &'static str,
    pub password: &'static str,
    pub reject_sender: bool,
    pub reject_recipient: Option<&'static str>,
    /// Refuse DATA instead of answering 354.
    pub reject_data: bool,
    /// Reject the message after the end-of-data marker.
    pub reject_message: bool,
    /// Hang up after the first line of message data, without a reply.
    pub drop_during_data: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            implicit_tls: false,
            greet: true,
            advertise_starttls: true,
            reject_starttls: false,
            starttls_reply: None,
            auth: "PLAIN LOGIN",
            password: PASSWORD,
            reject_sender: false,
            reject_recipient: None,
            reject_data: false,
            reject_message: false,
            drop_during_data: false,
        }
    }
}

/// A line received by the server.
#[derive(Debug, Clone)]
pub struct Received {
    pub line: String,
    pub encrypted: bool,
}

/// Everything the server saw during the session.
#[derive(Debug, Default)]
pub struct Transcript {
    pub commands: Vec<Received>,
    /// Raw bytes between `354` and the end-of-data marker.
    pub data: Option<Vec<u8>>,
    pub quit: bool,
}

impl Transcript {
    /// Upper-cased first word of every received line.
    pub fn verbs(&self) -> Vec<String> {
        self.commands
            .iter()
            .map(|c| {
                c.line
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_ascii_uppercase()
            })
            .collect()
    }

    pub fn position(&self, verb: &str) -> Option<usize> {
        self.verbs().iter().position(|v| v == verb)
    }

    pub fn find(&self, verb: &str) -> Option<&Received> {
        self.position(verb).map(|i| &self.commands[i])
    }

    pub fn lines_starting_with(&self, prefix: &str) -> Vec<&str> {
        self.commands
            .iter()
            .map(|c| c.line.as_str())
            .filter(|line| line.starts_with(prefix))
            .collect()
    }
}

enum Outcome {
    StartTls,
    Closed,
}

pub struct FakeServer {
    port: u16,
    certificate: CertificateDer<'static>,
    task: JoinHandle<Transcript>,
}

/// Routes client logs to the test harness so failures show the session.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("mailpost_smtp=trace")
        .with_test_writer()
        .try_init();
}

impl FakeServer {
    pub async fn start(behavior: Behavior) -> Self {
        init_tracing();
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("generate certificate");
        let certificate = certified.cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.signing_key.serialize_der(),
        ));

        let tls_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![certificate.clone()], key)
            .expect("server TLS config");
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let task = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            serve(tcp, acceptor, behavior).await
        });

        Self {
            port,
            certificate,
            task,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("localhost", self.port).unwrap()
    }

    /// Trust store that accepts this server's certificate.
    pub fn tls(&self) -> TlsConfig {
        let mut tls = TlsConfig::default();
        tls.add_root_certificate(self.certificate.clone()).unwrap();
        tls
    }

    pub fn config(&self, security: Security) -> SessionConfig {
        SessionConfig::builder(
            self.endpoint(),
            Credentials::new(USERNAME, PASSWORD).unwrap(),
        )
        .security(security)
        .tls(self.tls())
        .connect_timeout(Duration::from_secs(5))
        .io_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
    }

    /// Waits for the session to end and returns what the server saw.
    pub async fn transcript(self) -> Transcript {
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server finished")
            .expect("server task")
    }
}

/// Returns a loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn serve(tcp: TcpStream, acceptor: TlsAcceptor, behavior: Behavior) -> Transcript {
    let mut transcript = Transcript::default();

    if behavior.implicit_tls {
        let Ok(tls) = acceptor.accept(tcp).await else {
            return transcript;
        };
        let mut io = BufReader::new(tls);
        reply(&mut io, "220 localhost ESMTP fake\r\n").await;
        converse(&mut io, true, &behavior, &mut transcript).await;
        return transcript;
    }

    let mut io = BufReader::new(tcp);
    if !behavior.greet {
        // Stay silent until the client gives up.
        while next_line(&mut io).await.is_some() {}
        return transcript;
    }

    reply(&mut io, "220 localhost ESMTP fake\r\n").await;
    if let Outcome::StartTls = converse(&mut io, false, &behavior, &mut transcript).await {
        let Ok(tls) = acceptor.accept(io.into_inner()).await else {
            return transcript;
        };
        let mut io = BufReader::new(tls);
        converse(&mut io, true, &behavior, &mut transcript).await;
    }
    transcript
}

async fn converse<S>(
    io: &mut BufReader<S>,
    encrypted: bool,
    behavior: &Behavior,
    transcript: &mut Transcript,
) -> Outcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(line) = next_line(io).await {
        transcript.commands.push(Received {
            line: line.clone(),
            encrypted,
        });
        let upper = line.to_ascii_uppercase();
        let verb = upper.split_whitespace().next().unwrap_or_default();

        match verb {
            "EHLO" => {
                let mut response = String::from("250-localhost greets you\r\n");
                if !encrypted && behavior.advertise_starttls {
                    response.push_str("250-STARTTLS\r\n");
                }
                if !behavior.auth.is_empty() {
                    response.push_str(&format!("250-AUTH {}\r\n", behavior.auth));
                }
                response.push_str("250 8BITMIME\r\n");
                reply(io, &response).await;
            }
            "HELO" => reply(io, "250 localhost\r\n").await,
            "STARTTLS" => {
                if behavior.reject_starttls {
                    reply(io, "454 4.7.0 TLS not available due to local problem\r\n").await;
                } else if let Some(response) = behavior.starttls_reply {
                    reply(io, &format!("{response}\r\n")).await;
                } else {
                    reply(io, "220 2.0.0 Ready to start TLS\r\n").await;
                    return Outcome::StartTls;
                }
            }
            "AUTH" => {
                let accepted = if upper.starts_with("AUTH PLAIN") {
                    let encoded = line.split_whitespace().nth(2).unwrap_or_default();
                    decode(encoded) == format!("\0{USERNAME}\0{}", behavior.password)
                } else {
                    reply(io, "334 VXNlcm5hbWU6\r\n").await;
                    let user = next_line(io).await.unwrap_or_default();
                    reply(io, "334 UGFzc3dvcmQ6\r\n").await;
                    let pass = next_line(io).await.unwrap_or_default();
                    for answer in [&user, &pass] {
                        transcript.commands.push(Received {
                            line: answer.clone(),
                            encrypted,
                        });
                    }
                    decode(&user) == USERNAME && decode(&pass) == behavior.password
                };
                if accepted && encrypted {
                    reply(io, "235 2.7.0 Authentication successful\r\n").await;
                } else {
                    reply(io, "535 5.7.8 Authentication credentials invalid\r\n").await;
                }
            }
            "MAIL" if behavior.reject_sender => {
                reply(io, "553 5.7.1 Sender address rejected: not owned by user\r\n").await;
            }
            "MAIL" => reply(io, "250 2.1.0 Ok\r\n").await,
            "RCPT" => match behavior.reject_recipient {
                Some(rejected) if line.contains(rejected) => {
                    let response = format!(
                        "550 5.1.1 <{rejected}>: Recipient address rejected: User unknown\r\n"
                    );
                    reply(io, &response).await;
                }
                _ => reply(io, "250 2.1.5 Ok\r\n").await,
            },
            "DATA" if behavior.reject_data => {
                reply(io, "554 5.5.1 Error: no valid recipients\r\n").await;
            }
            "DATA" if behavior.drop_during_data => {
                reply(io, "354 End data with <CR><LF>.<CR><LF>\r\n").await;
                let mut partial = Vec::new();
                let _ = io.read_until(b'\n', &mut partial).await;
                transcript.data = Some(partial);
                return Outcome::Closed;
            }
            "DATA" => {
                reply(io, "354 End data with <CR><LF>.<CR><LF>\r\n").await;
                transcript.data = Some(read_data(io).await);
                if behavior.reject_message {
                    reply(io, "554 5.7.1 Message rejected as spam\r\n").await;
                } else {
                    reply(io, "250 2.0.0 Ok: queued as 4F2A1C\r\n").await;
                }
            }
            "QUIT" => {
                transcript.quit = true;
                reply(io, "221 2.0.0 Bye\r\n").await;
                return Outcome::Closed;
            }
            _ => reply(io, "502 5.5.2 Error: command not recognized\r\n").await,
        }
    }
    Outcome::Closed
}

async fn next_line<S>(io: &mut BufReader<S>) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut line = String::new();
    match io.read_line(&mut line).await {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

async fn read_data<S>(io: &mut BufReader<S>) -> Vec<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut data = Vec::new();
    loop {
        let mut line = Vec::new();
        match io.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) if line == b".\r\n" => break,
            Ok(_) => data.extend_from_slice(&line),
        }
    }
    data
}

async fn reply<S>(io: &mut BufReader<S>, text: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let stream = io.get_mut();
    let _ = stream.write_all(text.as_bytes()).await;
    let _ = stream.flush().await;
}

fn decode(encoded: &str) -> String {
    STANDARD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default()
}
