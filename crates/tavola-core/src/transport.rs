//! Mail transports
//!
//! A transport performs exactly one network send of a fully rendered
//! message. Retries, timeouts and logging belong to the orchestrator.

mod log;
mod memory;
mod resend;
mod smtp;

pub use self::log::LogTransport;
pub use memory::{MemoryTransport, ScriptedOutcome};
pub use resend::ResendTransport;
pub use smtp::SmtpTransport;

use crate::error::SendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tavola_common::config::EmailConfig;
use tavola_storage::models::EmailSettings;
use uuid::Uuid;

/// A rendered message ready for a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    /// Sender, either a bare address or `Name <address>`
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub reply_to: Option<String>,
    /// Stable across every attempt of one logical send
    pub idempotency_key: Option<Uuid>,
}

/// Provider acknowledgement of a send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReceipt {
    pub message_id: String,
}

/// Mail transport trait
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Attempt one send
    async fn send(&self, email: &OutgoingEmail) -> Result<TransportReceipt, SendError>;

    /// Provider name for logs
    fn name(&self) -> &'static str;
}

/// Builds the transport on first use
///
/// Construction reads the settings store, so a credential added after start
/// is picked up by the next attempt as long as no transport was built yet.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        settings: Option<&EmailSettings>,
    ) -> Result<Arc<dyn MailTransport>, SendError>;
}

/// Factory driven by the `email` configuration section
pub struct ConfiguredTransportFactory {
    config: EmailConfig,
}

impl ConfiguredTransportFactory {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for ConfiguredTransportFactory {
    async fn create(
        &self,
        settings: Option<&EmailSettings>,
    ) -> Result<Arc<dyn MailTransport>, SendError> {
        match self.config.provider.as_str() {
            "resend" => {
                let api_key = settings
                    .and_then(|s| s.api_key.clone())
                    .filter(|k| !k.trim().is_empty())
                    .or_else(|| self.config.api_key.clone())
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| {
                        SendError::Permanent(
                            "Email service not configured: missing API key".to_string(),
                        )
                    })?;
                Ok(Arc::new(ResendTransport::new(
                    self.config.api_url.clone(),
                    api_key,
                )?))
            }
            "smtp" => Ok(Arc::new(SmtpTransport::new(&self.config.smtp)?)),
            "log" => Ok(Arc::new(LogTransport::new())),
            other => Err(SendError::Permanent(format!(
                "Email service not configured: unknown provider '{}'",
                other
            ))),
        }
    }
}

/// Factory that always hands out the same transport
pub struct StaticTransportFactory {
    transport: Arc<dyn MailTransport>,
}

impl StaticTransportFactory {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl TransportFactory for StaticTransportFactory {
    async fn create(
        &self,
        _settings: Option<&EmailSettings>,
    ) -> Result<Arc<dyn MailTransport>, SendError> {
        Ok(self.transport.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str, api_key: Option<&str>) -> EmailConfig {
        EmailConfig {
            provider: provider.to_string(),
            api_key: api_key.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resend_requires_api_key() {
        let factory = ConfiguredTransportFactory::new(config("resend", None));
        let err = factory.create(None).await.err().unwrap();
        assert_eq!(
            err,
            SendError::Permanent("Email service not configured: missing API key".to_string())
        );
    }

    #[tokio::test]
    async fn test_settings_key_takes_precedence() {
        let factory = ConfiguredTransportFactory::new(config("resend", None));
        let settings = EmailSettings {
            api_key: Some("re_test".to_string()),
            ..Default::default()
        };
        let transport = factory.create(Some(&settings)).await.unwrap();
        assert_eq!(transport.name(), "resend");
    }

    #[tokio::test]
    async fn test_log_and_unknown_providers() {
        let factory = ConfiguredTransportFactory::new(config("log", None));
        assert_eq!(factory.create(None).await.unwrap().name(), "log");

        let factory = ConfiguredTransportFactory::new(config("pigeon", None));
        assert!(matches!(
            factory.create(None).await,
            Err(SendError::Permanent(_))
        ));
    }
}
