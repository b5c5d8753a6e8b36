//! Outbox hand-off for call sites that must not wait on email
//!
//! Booking and contact handlers submit requests here and return at once. The
//! worker drains the channel into `send_email_robust`, running up to
//! `concurrency` sends at a time. When the channel is full or the worker is
//! gone the request is written to the retry queue instead, so a submission is
//! never silently lost. On shutdown whatever is still buffered goes to the
//! retry queue as well, and in-flight sends get a grace period to finish.

use crate::service::{EmailSendRequest, EmailService};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tavola_common::config::OutboxConfig;
use tavola_common::types::QueueId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

const MAX_CONCURRENCY: usize = 1024;

/// What happened to a submitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Handed to the worker
    Dispatched,
    /// Written to the retry queue for the next sweep
    Deferred(QueueId),
    /// Neither the worker nor the queue accepted it
    Dropped,
}

/// Sending half of the outbox
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<EmailSendRequest>,
    service: Arc<EmailService>,
}

/// Receiving half; run it on its own task
pub struct OutboxWorker {
    rx: mpsc::Receiver<EmailSendRequest>,
    service: Arc<EmailService>,
    limit: Arc<Semaphore>,
    concurrency: u32,
    shutdown_grace: Duration,
}

impl Outbox {
    /// Create an outbox with a bounded channel
    pub fn new(service: Arc<EmailService>, config: &OutboxConfig) -> (Outbox, OutboxWorker) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let concurrency = config.concurrency.clamp(1, MAX_CONCURRENCY);
        (
            Outbox {
                tx,
                service: service.clone(),
            },
            OutboxWorker {
                rx,
                service,
                limit: Arc::new(Semaphore::new(concurrency)),
                concurrency: concurrency as u32,
                shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
            },
        )
    }

    /// Submit a request without waiting for it to be sent
    pub async fn submit(&self, request: EmailSendRequest) -> SubmitOutcome {
        let request = match self.tx.try_send(request) {
            Ok(()) => return SubmitOutcome::Dispatched,
            Err(TrySendError::Full(request)) => {
                warn!(template_key = %request.template_key, "Outbox full, deferring email to retry queue");
                request
            }
            Err(TrySendError::Closed(request)) => {
                warn!(template_key = %request.template_key, "Outbox closed, deferring email to retry queue");
                request
            }
        };

        defer(&self.service, &request).await
    }
}

async fn defer(service: &EmailService, request: &EmailSendRequest) -> SubmitOutcome {
    match service.enqueue_deferred(request).await {
        Ok(row) => SubmitOutcome::Deferred(row.id),
        Err(e) => {
            error!(
                template_key = %request.template_key,
                recipient = %request.recipient_email,
                error = %e,
                "Failed to defer email, dropping it"
            );
            SubmitOutcome::Dropped
        }
    }
}

async fn deliver(service: &EmailService, request: EmailSendRequest) {
    let outcome = service.send_email_robust(request).await;
    if outcome.success {
        debug!(log_id = ?outcome.log_id, "Outbox email sent");
    } else {
        warn!(
            queued = outcome.queued,
            error = ?outcome.error,
            "Outbox email not sent"
        );
    }
}

impl OutboxWorker {
    /// Drain requests until `shutdown` resolves or every `Outbox` handle is
    /// dropped
    ///
    /// Requests still buffered when the loop ends are written to the retry
    /// queue. Sends already running are awaited for at most the configured
    /// grace period.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(concurrency = self.concurrency, "Outbox worker started");
        tokio::pin!(shutdown);

        loop {
            let permit = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                permit = self.limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let request = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                request = self.rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let service = self.service.clone();
            tokio::spawn(async move {
                deliver(&service, request).await;
                drop(permit);
            });
        }

        self.rx.close();
        let mut spilled = 0usize;
        while let Ok(request) = self.rx.try_recv() {
            if let SubmitOutcome::Deferred(_) = defer(&self.service, &request).await {
                spilled += 1;
            }
        }
        if spilled > 0 {
            info!(spilled, "Moved buffered outbox emails to the retry queue");
        }

        match tokio::time::timeout(self.shutdown_grace, self.limit.acquire_many(self.concurrency))
            .await
        {
            Ok(_) => info!("Outbox worker stopped"),
            Err(_) => warn!(
                grace_secs = self.shutdown_grace.as_secs(),
                "Outbox worker stopped with sends still in flight"
            ),
        }
    }

    #[cfg(test)]
    pub(crate) async fn recv(&mut self) -> Option<EmailSendRequest> {
        self.rx.recv().await
    }
}
