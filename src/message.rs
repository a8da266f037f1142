//! Chat message envelope
//!
//! The wire carries plain UTF-8 text. Before relaying, the hub prefixes each
//! message with its sender: `"[sender]: text"`. Receivers treat the result as
//! opaque display text.

use std::fmt;
use std::sync::Arc;

/// Sender name plus raw text, rendered as `"[sender]: text"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub sender: &'a str,
    pub text: &'a str,
}

impl<'a> Envelope<'a> {
    pub fn new(sender: &'a str, text: &'a str) -> Self {
        Self { sender, text }
    }

    /// Render once into a shareable payload for fan-out
    pub fn to_payload(&self) -> Arc<str> {
        Arc::from(self.to_string())
    }
}

impl fmt::Display for Envelope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]: {}", self.sender, self.text)
    }
}
