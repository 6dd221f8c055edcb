//! Command-line interface.

use std::path::PathBuf;

use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser};

/// Send one message through an SMTP submission server.
///
/// Every option can also be set through the environment variable shown in
/// its help; an explicit flag wins over the environment.
#[derive(Debug, Parser)]
#[command(name = "mailpost")]
#[command(author, version, about)]
pub struct Cli {
    /// SMTP server host name
    #[arg(short = 'H', long, env = "SMTP_HOST", value_name = "HOSTNAME")]
    pub host: Option<String>,

    /// SMTP server port
    #[arg(short, long, env = "SMTP_PORT", default_value_t = 587)]
    pub port: u16,

    /// Username for authentication
    #[arg(short, long, env = "SMTP_USERNAME", value_name = "USERNAME")]
    pub user: Option<String>,

    /// Password for authentication
    #[arg(long, env = "SMTP_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Use TLS from the first byte instead of STARTTLS
    #[arg(long, env = "SMTP_SSL", action = ArgAction::SetTrue, value_parser = FalseyValueParser::new())]
    pub ssl: bool,

    /// Recipient addresses (repeatable, or comma-separated)
    #[arg(
        short = 't',
        long,
        env = "SMTP_RECIPIENTS",
        value_name = "EMAIL",
        value_delimiter = ','
    )]
    pub recipients: Vec<String>,

    /// Sender address [default: the authenticated user]
    #[arg(short = 'f', long, env = "SMTP_SENDER", value_name = "EMAIL")]
    pub sender: Option<String>,

    /// Message subject
    #[arg(short, long, env = "SMTP_SUBJECT")]
    pub subject: Option<String>,

    /// Message body
    #[arg(short, long, env = "SMTP_BODY")]
    pub body: Option<String>,

    /// Extra PEM file of trusted CA certificates
    #[arg(long, env = "SMTP_CA_CERT", value_name = "PEM")]
    pub ca_cert: Option<PathBuf>,

    /// Seconds to wait for each server reply
    #[arg(long, env = "SMTP_TIMEOUT", value_name = "SECONDS", default_value_t = 60)]
    pub timeout: u64,

    /// More logging on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
