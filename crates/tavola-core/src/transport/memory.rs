//! Scripted in-process transport

use super::{MailTransport, OutgoingEmail, TransportReceipt};
use crate::error::SendError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// What the next send should do
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Accept(String),
    Fail(SendError),
    /// Never complete, so the caller's timeout fires
    Hang,
}

/// Records every message and replays scripted outcomes in order
///
/// Once the script runs out the fallback outcome is used for every send.
pub struct MemoryTransport {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    fallback: ScriptedOutcome,
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl MemoryTransport {
    /// Accept every message with a generated id
    pub fn accepting() -> Self {
        Self::with_fallback(ScriptedOutcome::Accept(String::new()))
    }

    /// Fail every message with the same error
    pub fn failing(error: SendError) -> Self {
        Self::with_fallback(ScriptedOutcome::Fail(error))
    }

    pub fn with_fallback(fallback: ScriptedOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queue outcomes consumed before the fallback applies
    pub fn script(self, outcomes: impl IntoIterator<Item = ScriptedOutcome>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.extend(outcomes);
        }
        self
    }

    /// Every message handed to `send`, including failed ones
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn attempts(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl MailTransport for MemoryTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<TransportReceipt, SendError> {
        let (outcome, attempt) = {
            let mut sent = self
                .sent
                .lock()
                .map_err(|_| SendError::Transient("transport state poisoned".to_string()))?;
            sent.push(email.clone());
            let next = self
                .script
                .lock()
                .map_err(|_| SendError::Transient("transport state poisoned".to_string()))?
                .pop_front();
            (next.unwrap_or_else(|| self.fallback.clone()), sent.len())
        };

        match outcome {
            ScriptedOutcome::Accept(id) if id.is_empty() => Ok(TransportReceipt {
                message_id: format!("mem-{}", attempt),
            }),
            ScriptedOutcome::Accept(id) => Ok(TransportReceipt { message_id: id }),
            ScriptedOutcome::Fail(error) => Err(error),
            ScriptedOutcome::Hang => {
                std::future::pending::<()>().await;
                Err(SendError::Timeout)
            }
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
