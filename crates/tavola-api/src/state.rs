//! Shared handler state

use std::sync::Arc;
use tavola_core::{EmailService, Outbox};
use tavola_storage::DatabasePool;

/// Application state shared by all handlers
pub struct AppState {
    pub service: Arc<EmailService>,
    pub outbox: Outbox,
    /// Absent when running on in-process stores
    pub db_pool: Option<DatabasePool>,
}
