//! Send error classes

use thiserror::Error;

/// Outcome of a failed send attempt
///
/// Only `Transient` and `Timeout` feed the in-call backoff loop. The other
/// classes cannot be fixed by waiting a couple of seconds and go straight to
/// the retry queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Provider or network failure that may succeed on a later attempt
    #[error("{0}")]
    Transient(String),

    /// Failure that retrying the same request will not fix (unknown template,
    /// missing credential or sender, rejected address)
    #[error("{0}")]
    Permanent(String),

    /// Daily or hourly sending quota exhausted
    #[error("{0}")]
    QuotaExceeded(String),

    /// The attempt did not finish within the attempt timeout. The provider
    /// may still have accepted the message.
    #[error("Email sending timeout")]
    Timeout,
}

impl SendError {
    /// Whether the immediate backoff loop should try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Transient(_) | SendError::Timeout)
    }

    /// Short class name for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            SendError::Transient(_) => "transient",
            SendError::Permanent(_) => "permanent",
            SendError::QuotaExceeded(_) => "quota_exceeded",
            SendError::Timeout => "timeout",
        }
    }
}
