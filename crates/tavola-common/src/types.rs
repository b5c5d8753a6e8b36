//! Common types for Tavola

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for delivery log entries
pub type LogId = Uuid;

/// Unique identifier for retry queue entries
pub type QueueId = Uuid;

/// Unique identifier for bookings (foreign correlation only)
pub type BookingId = Uuid;

/// Unique identifier for contact form submissions (foreign correlation only)
pub type ContactId = Uuid;

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string
    ///
    /// This is a shape check only (one `@`, non-empty parts, a dot in the
    /// domain, no whitespace); the provider performs real validation.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.chars().any(char::is_whitespace) {
            return None;
        }
        let (local, domain) = s.split_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return None;
        }
        if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
            return None;
        }
        Some(Self::new(local, domain))
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

/// Format a sender as `Name <address>`, or the bare address when no name is set
pub fn format_mailbox(name: Option<&str>, address: &str) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{} <{}>", name, address),
        None => address.to_string(),
    }
}
