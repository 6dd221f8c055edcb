//! # mailpost-smtp
//!
//! A one-shot SMTP submission client: compose a single message, open one
//! connection, authenticate, and hand the message to the server.
//!
//! ## Features
//!
//! - **Linear session state machine**: connect, secure the channel,
//!   authenticate, declare sender and recipients, stream the message, quit
//! - **Type-state client**: authentication is only available on an encrypted
//!   connection, so credentials can never be sent in the clear
//! - **TLS support**: implicit TLS (port 465) and STARTTLS (port 587)
//! - **Authentication**: PLAIN, with LOGIN as fallback
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailpost_smtp::{Credentials, Endpoint, Mail, Security, SessionConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> mailpost_smtp::Result<()> {
//!     let config = SessionConfig::builder(
//!         Endpoint::new("smtp.example.com", 587)?,
//!         Credentials::new("alice", "secret")?,
//!     )
//!     .security(Security::StartTls)
//!     .build()?;
//!
//!     let mail = Mail::builder()
//!         .to("bob@example.com")
//!         .subject("Hi")
//!         .body("Hello")
//!         .build()?;
//!
//!     let receipt = mailpost_smtp::send_mail(config, mail).await?;
//!     println!("{}", receipt.reply());
//!     Ok(())
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! Disconnected ─→ Connected ─→ SecureChannelEstablished ─→ Authenticated
//!                                                              │
//!   Completed ←─ DataStreaming ←─ RecipientsDeclared ←─ SenderDeclared
//!
//! any non-terminal state ─→ Failed(step)
//! ```
//!
//! ## Modules
//!
//! - [`command`]: SMTP command serialization and data-phase encoding
//! - [`connection`]: Transport and type-state client
//! - [`message`]: Mail model and message composer
//! - [`parser`]: Reply parser
//! - [`session`]: Session state machine
//! - [`types`]: Core SMTP types (addresses, extensions, replies)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
mod config;
pub mod connection;
mod error;
pub mod message;
pub mod parser;
pub mod session;
pub mod types;

pub use config::{
    Credentials, DEFAULT_CLIENT_NAME, Endpoint, Security, SessionConfig, SessionConfigBuilder,
    TlsConfig,
};
pub use connection::{
    Authenticated, Client, DataStreaming, Delivered, Plaintext, RecipientsDeclared, Secured,
    SenderDeclared, ServerInfo, SmtpStream,
};
pub use error::{Error, ErrorKind, Result};
pub use message::{Mail, MailBuilder, compose};
pub use session::{Receipt, Session, State, Step, send_mail};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyClass, ReplyCode};
