//! Tavola Storage - Database access for the email delivery core
//!
//! This crate owns the delivery log, the retry queue, the template store,
//! the email settings (including the daily quota counter) and the
//! restaurant branding store. Every store is a repository trait with a
//! Postgres implementation and an in-process implementation.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use models::*;
pub use repository::*;
