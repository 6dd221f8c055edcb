//! `mailpost` - send one message through an SMTP server.
//!
//! Connects with STARTTLS (or implicit TLS with `--ssl`), authenticates,
//! submits the message and exits 0, or prints the failure and exits 1.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;
mod settings;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;
use mailpost_smtp::{ErrorKind, Security, send_mail};
use settings::Settings;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            if err
                .downcast_ref::<mailpost_smtp::Error>()
                .is_some_and(|e| e.kind() == ErrorKind::Configuration)
            {
                eprintln!("Run 'mailpost --help' for usage.");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Settings { config, mail } = Settings::resolve(cli)?;

    let port = config.endpoint().port().to_string();
    match config.security() {
        Security::Implicit => println!("Using SSL/TLS on port {port:?}"),
        Security::StartTls => println!("Using STARTTLS on port {port:?}"),
    }

    let server = config.endpoint().to_string();
    let receipt = send_mail(config, mail)
        .await
        .with_context(|| format!("Failed to send mail via {server}"))?;
    info!(reply = %receipt.reply(), recipients = receipt.recipients(), "Delivered");

    println!("Mail sent successfully");
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("mailpost={level},mailpost_smtp={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
