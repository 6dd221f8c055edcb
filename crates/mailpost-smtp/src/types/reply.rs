//! Server replies.

use std::fmt;

/// A complete, possibly multi-line, server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three-digit reply code.
    pub code: ReplyCode,
    /// Text of each line, without code and separator.
    pub message: Vec<String>,
}

impl Reply {
    /// Creates a reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(code: ReplyCode, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// True for 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code.class() == ReplyClass::Positive
    }

    /// Lines joined with `\n`, exactly as the server sent them.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.message.join("\n")
    }

    /// RFC 3463 enhanced status code (`5.7.8`) leading the first line, if any.
    #[must_use]
    pub fn enhanced_status(&self) -> Option<&str> {
        let word = self.message.first()?.split_whitespace().next()?;
        let mut parts = word.split('.');
        let well_formed = parts
            .next()
            .is_some_and(|class| matches!(class, "2" | "4" | "5"))
            && parts.clone().count() == 2
            && parts.all(|p| !p.is_empty() && p.len() <= 3 && p.bytes().all(|b| b.is_ascii_digit()));
        well_formed.then_some(word)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message_text())
    }
}

/// First-digit class of a reply code (RFC 5321 section 4.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    /// 2yz: the command was accepted.
    Positive,
    /// 3yz: the server waits for more input (354, 334).
    Intermediate,
    /// 4yz: temporary failure; the same command may succeed later.
    TransientNegative,
    /// 5yz: the command will not be accepted as sent.
    PermanentNegative,
    /// Any other first digit.
    Unknown,
}

/// Three-digit reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// 220 greeting, also the go-ahead for the TLS handshake after STARTTLS.
    pub const SERVICE_READY: Self = Self(220);
    /// 334 SASL challenge.
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 go ahead with the message.
    pub const START_DATA: Self = Self(354);

    /// Wraps a numeric code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// The numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Classifies the code by its first digit.
    #[must_use]
    pub const fn class(self) -> ReplyClass {
        match self.0 / 100 {
            2 => ReplyClass::Positive,
            3 => ReplyClass::Intermediate,
            4 => ReplyClass::TransientNegative,
            5 => ReplyClass::PermanentNegative,
            _ => ReplyClass::Unknown,
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}
