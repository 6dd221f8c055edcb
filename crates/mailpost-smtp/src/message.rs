//! Mail model and message composer.
//!
//! The composer is a pure function from [`Mail`] to the bytes that follow
//! `DATA`. Delivery addressing comes from the envelope (`RCPT TO`), never
//! from the `To:` header built here.

use std::fmt::Write;

use crate::error::{Error, Result};
use crate::types::Address;

/// A single message: sender, ordered recipients, subject and body.
///
/// Built with [`Mail::builder`]; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    sender: String,
    recipients: Vec<String>,
    subject: String,
    body: String,
}

impl Mail {
    /// Creates a mail builder.
    #[must_use]
    pub fn builder() -> MailBuilder {
        MailBuilder::default()
    }

    /// Sender address. Empty until resolved with [`Mail::with_default_sender`].
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Recipient addresses, in the order they are declared to the server.
    #[must_use]
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Subject line.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Message body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Falls back to `username` when no sender was given.
    #[must_use]
    pub fn with_default_sender(mut self, username: &str) -> Self {
        if self.sender.is_empty() {
            self.sender = username.to_string();
        }
        self
    }

    /// Composes the wire-format message. See [`compose`].
    #[must_use]
    pub fn compose(&self) -> Vec<u8> {
        compose(self)
    }
}

/// Builds the message bytes sent after `DATA`:
///
/// ```text
/// From: <sender>\r\n
/// To: <r1>;<r2>;...\r\n
/// Subject: <subject>\r\n
/// \r\n
/// <body>
/// ```
///
/// The `To:` line is left out when there are no recipients.
#[must_use]
pub fn compose(mail: &Mail) -> Vec<u8> {
    let mut message = String::with_capacity(mail.body.len() + 64);

    let _ = write!(message, "From: {}\r\n", mail.sender);
    if !mail.recipients.is_empty() {
        let _ = write!(message, "To: {}\r\n", mail.recipients.join(";"));
    }
    let _ = write!(message, "Subject: {}\r\n", mail.subject);

    // Empty line between headers and body
    message.push_str("\r\n");
    message.push_str(&mail.body);

    message.into_bytes()
}

/// Builder for [`Mail`].
#[derive(Debug, Clone, Default)]
pub struct MailBuilder {
    sender: String,
    recipients: Vec<String>,
    subject: String,
    body: String,
}

impl MailBuilder {
    /// Sets the sender. Leave unset to send as the authenticated user.
    #[must_use]
    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.recipients.push(recipient.into());
        self
    }

    /// Adds several recipients, keeping their order.
    #[must_use]
    pub fn recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipients
            .extend(recipients.into_iter().map(Into::into));
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds the mail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if there is no recipient, a recipient is
    /// blank, the subject is empty or spans more than one line, or the body
    /// is empty. Returns [`Error::InvalidAddress`] if the sender or a
    /// recipient could not be written into a header or envelope command.
    pub fn build(self) -> Result<Mail> {
        if self.recipients.is_empty() {
            return Err(Error::Config("at least one recipient is required".into()));
        }
        if self.recipients.iter().any(|r| r.trim().is_empty()) {
            return Err(Error::Config("recipient address cannot be blank".into()));
        }
        for recipient in &self.recipients {
            Address::new(recipient.as_str())?;
        }
        if !self.sender.is_empty() {
            Address::new(self.sender.as_str())?;
        }
        if self.subject.is_empty() {
            return Err(Error::Config("subject can't be empty".into()));
        }
        if self.subject.contains(['\r', '\n']) {
            return Err(Error::Config("subject must be a single line".into()));
        }
        if self.body.is_empty() {
            return Err(Error::Config("body can't be empty".into()));
        }

        Ok(Mail {
            sender: self.sender,
            recipients: self.recipients,
            subject: self.subject,
            body: self.body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mail() -> Mail {
        Mail::builder()
            .to("bob@example.com")
            .subject("Hi")
            .body("Hello")
            .build()
            .unwrap()
    }

    #[test]
    fn compose_with_fallback_sender() {
        let mail = mail().with_default_sender("alice");
        assert_eq!(
            compose(&mail),
            b"From: alice\r\nTo: bob@example.com\r\nSubject: Hi\r\n\r\nHello"
        );
    }

    #[test]
    fn explicit_sender_wins_over_fallback() {
        let mail = Mail::builder()
            .sender("carol@example.com")
            .to("bob@example.com")
            .subject("Hi")
            .body("Hello")
            .build()
            .unwrap()
            .with_default_sender("alice");
        assert_eq!(mail.sender(), "carol@example.com");
    }

    #[test]
    fn recipients_joined_with_semicolon() {
        let mail = Mail::builder()
            .sender("alice@example.com")
            .recipients(["bob@example.com", "carol@example.com"])
            .to("dave@example.com")
            .subject("Status")
            .body("All good")
            .build()
            .unwrap();
        let text = String::from_utf8(mail.compose()).unwrap();
        assert!(text.contains("\r\nTo: bob@example.com;carol@example.com;dave@example.com\r\n"));
    }

    #[test]
    fn to_header_omitted_without_recipients() {
        let mail = Mail {
            sender: "alice".to_string(),
            recipients: Vec::new(),
            subject: "Hi".to_string(),
            body: "Hello".to_string(),
        };
        assert_eq!(compose(&mail), b"From: alice\r\nSubject: Hi\r\n\r\nHello");
    }

    #[test]
    fn build_requires_recipient() {
        let result = Mail::builder().subject("Hi").body("Hello").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn build_rejects_blank_recipient() {
        let result = Mail::builder().to(" ").subject("Hi").body("Hello").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn build_requires_subject_and_body() {
        let no_subject = Mail::builder().to("bob@example.com").body("Hello").build();
        assert!(matches!(no_subject, Err(Error::Config(_))));

        let no_body = Mail::builder().to("bob@example.com").subject("Hi").build();
        assert!(matches!(no_body, Err(Error::Config(_))));
    }

    #[test]
    fn build_rejects_multiline_subject() {
        for subject in ["Hi\r\nTo: eve@example.com", "Hi\nBcc: eve@example.com", "Hi\r"] {
            let result = Mail::builder()
                .to("bob@example.com")
                .subject(subject)
                .body("Hello")
                .build();
            assert!(matches!(result, Err(Error::Config(_))), "{subject:?}");
        }
    }

    #[test]
    fn build_checks_addresses() {
        let injected_recipient = Mail::builder()
            .to("bob@example.com\r\nRCPT TO:<eve@example.com>")
            .subject("Hi")
            .body("Hello")
            .build();
        assert!(matches!(injected_recipient, Err(Error::InvalidAddress(_))));

        let injected_sender = Mail::builder()
            .sender("alice\r\nBcc: eve@example.com")
            .to("bob@example.com")
            .subject("Hi")
            .body("Hello")
            .build();
        assert!(matches!(injected_sender, Err(Error::InvalidAddress(_))));

        let bracketed = Mail::builder()
            .to("<bob@example.com>")
            .subject("Hi")
            .body("Hello")
            .build();
        assert!(matches!(bracketed, Err(Error::InvalidAddress(_))));
    }

    #[test]
    fn built_mail_has_one_header_block() {
        let mail = mail().with_default_sender("alice");
        let message = compose(&mail);
        let headers = String::from_utf8(header_section(&message).to_vec()).unwrap();
        let names: Vec<&str> = headers
            .split("\r\n")
            .filter(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':').map(|(name, _)| name))
            .collect();
        assert_eq!(names, ["From", "To", "Subject"]);
    }

    fn header_section(message: &[u8]) -> &[u8] {
        let end = message
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .unwrap();
        &message[..end + 2]
    }

    proptest! {
        #[test]
        fn to_header_lists_every_recipient_in_order(
            recipients in prop::collection::vec("[a-z]{1,8}@[a-z]{1,8}\\.com", 1..6),
            subject in "[A-Za-z0-9 ]{1,20}",
            body in "[A-Za-z0-9 .\r\n]{1,80}",
        ) {
            let mail = Mail::builder()
                .sender("alice")
                .recipients(recipients.clone())
                .subject(subject)
                .body(body)
                .build()
                .unwrap();
            let message = compose(&mail);
            let headers = String::from_utf8(header_section(&message).to_vec()).unwrap();

            let to_lines: Vec<&str> = headers
                .split("\r\n")
                .filter(|line| line.starts_with("To: "))
                .collect();
            prop_assert_eq!(to_lines.len(), 1);
            let expected = format!("To: {}", recipients.join(";"));
            prop_assert_eq!(to_lines[0], expected.as_str());
        }

        #[test]
        fn headers_are_crlf_terminated_then_blank_line(
            subject in "[A-Za-z0-9 ]{1,20}",
            body in "[A-Za-z0-9 .\r\n]{1,80}",
        ) {
            let mail = Mail::builder()
                .to("bob@example.com")
                .subject(subject)
                .body(body.clone())
                .build()
                .unwrap()
                .with_default_sender("alice");
            let message = compose(&mail);
            let headers = header_section(&message);

            prop_assert!(headers.ends_with(b"\r\n"));
            prop_assert_eq!(headers.split(|&b| b == b'\n').count(), 4);
            prop_assert!(!headers.windows(2).any(|w| w[1] == b'\n' && w[0] != b'\r'));
            prop_assert_eq!(&message[headers.len()..headers.len() + 2], b"\r\n");
            prop_assert_eq!(&message[headers.len() + 2..], body.as_bytes());
        }
    }
}
