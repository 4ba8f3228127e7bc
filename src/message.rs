//! Message contract and lifecycle metadata.
//!
//! Applications describe their protocol units by implementing [`Message`]
//! (how a message becomes bytes and which rules it must satisfy). The
//! framework never looks inside a message; it only tracks the metadata kept
//! in an [`Envelope`]:
//!
//! - creation time (fixed when the envelope is built)
//! - retry counter (bumped by the application before a resend)
//! - validation outcome (recorded by the frame buffer right after decode)
//!
//! # Example
//!
//! ```
//! use linewire::message::Envelope;
//! use linewire::protocol::line::TextLine;
//!
//! let mut outbound = Envelope::new(TextLine::new("ping"));
//! assert_eq!(outbound.increment_retries(), 1);
//! assert!(outbound.is_valid());
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;
use std::time::SystemTime;

use bytes::BytesMut;

use crate::error::Result;
use crate::server::SessionId;

/// A single application-level protocol unit.
pub trait Message: Send + Sync + 'static {
    /// Append the wire representation of this message to `dst`.
    fn encode(&self, dst: &mut BytesMut) -> Result<()>;

    /// Check protocol rules, returning every violation found.
    fn validate(&self) -> Vec<Violation> {
        Vec::new()
    }
}

/// One broken rule on a decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Name of the offending field.
    pub field: String,
    /// Human-readable reason.
    pub reason: String,
}

impl Violation {
    /// Create a new violation.
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// A message together with its lifecycle metadata.
#[derive(Debug, Clone)]
pub struct Envelope<M> {
    message: M,
    created_at: SystemTime,
    retries: u32,
    violations: Vec<Violation>,
}

impl<M> Envelope<M> {
    /// Wrap a message, stamping the creation time.
    pub fn new(message: M) -> Self {
        Self {
            message,
            created_at: SystemTime::now(),
            retries: 0,
            violations: Vec::new(),
        }
    }

    /// Get a reference to the wrapped message.
    #[inline]
    pub fn message(&self) -> &M {
        &self.message
    }

    /// Unwrap the message, dropping the metadata.
    pub fn into_message(self) -> M {
        self.message
    }

    /// When this envelope was created.
    #[inline]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// How many times the application has retried this message.
    #[inline]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Bump the retry counter, returning the new value.
    pub fn increment_retries(&mut self) -> u32 {
        self.retries = self.retries.saturating_add(1);
        self.retries
    }

    /// Violations recorded at decode time (empty for outbound messages).
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// True iff no violations were recorded.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub(crate) fn set_violations(&mut self, violations: Vec<Violation>) {
        self.violations = violations;
    }
}

impl<M> From<M> for Envelope<M> {
    fn from(message: M) -> Self {
        Envelope::new(message)
    }
}

impl<M> Deref for Envelope<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.message
    }
}

/// A decoded message tagged with the session it arrived on.
#[derive(Debug, Clone)]
pub struct Inbound<M> {
    /// Session the message was read from.
    pub session: SessionId,
    /// Remote address of that session.
    pub remote_addr: SocketAddr,
    /// The message and its metadata.
    pub envelope: Envelope<M>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Dummy(u8);

    #[test]
    fn test_new_envelope_defaults() {
        let before = SystemTime::now();
        let env = Envelope::new(Dummy(7));

        assert_eq!(env.retries(), 0);
        assert!(env.is_valid());
        assert!(env.violations().is_empty());
        assert!(env.created_at() >= before);
        assert_eq!(env.message().0, 7);
    }

    #[test]
    fn test_increment_retries() {
        let mut env = Envelope::new(Dummy(1));
        assert_eq!(env.increment_retries(), 1);
        assert_eq!(env.increment_retries(), 2);
        assert_eq!(env.retries(), 2);
    }

    #[test]
    fn test_violations_make_invalid() {
        let mut env = Envelope::new(Dummy(1));
        env.set_violations(vec![Violation::new("text", "not valid UTF-8")]);

        assert!(!env.is_valid());
        assert_eq!(env.violations().len(), 1);
        assert_eq!(env.violations()[0].to_string(), "text: not valid UTF-8");
    }

    #[test]
    fn test_created_at_survives_retries() {
        let mut env = Envelope::new(Dummy(1));
        let created = env.created_at();
        env.increment_retries();
        assert_eq!(env.created_at(), created);
    }

    #[test]
    fn test_from_and_deref() {
        let env: Envelope<Dummy> = Dummy(9).into();
        assert_eq!(env.0, 9);
        assert_eq!(env.into_message().0, 9);
    }
}
